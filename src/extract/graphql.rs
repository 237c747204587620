//! Paginated GraphQL extractor
//!
//! Each raw table has its own query document at `<query_dir>/<table>.graphql`.
//! Queries receive `$start_date`, `$end_date` (exclusive), `$limit` and
//! `$offset`; pages are requested until one comes back short. The first
//! array-valued field under `data` holds the rows. Nested objects are
//! flattened with `__` separators and arrays are kept as JSON text.

use super::{prepare_rows, ExtractSetupError, RawTable, RAW_TABLES};
use crate::planner::Period;
use crate::scd::SourceRow;
use crate::stage::{ExtractResult, Extractor, StageError};
use crate::warehouse::Warehouse;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default rows per page
pub const DEFAULT_PAGE_SIZE: u32 = 500;
/// Default per-request timeout (seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
/// HTTP connect timeout (seconds)
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Longest response excerpt kept in error messages
const ERROR_BODY_EXCERPT: usize = 200;

/// GraphQL endpoint settings
#[derive(Debug, Clone)]
pub struct GraphqlConfig {
    /// Endpoint URL
    pub endpoint: String,
    /// Bearer token, if the endpoint requires one
    pub api_key: Option<String>,
    /// Rows requested per page
    pub page_size: u32,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Directory holding `<table>.graphql` documents
    pub query_dir: PathBuf,
}

impl GraphqlConfig {
    /// Settings with default paging and timeout
    pub fn new(endpoint: impl Into<String>, query_dir: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            query_dir: query_dir.into(),
        }
    }

    /// Set the bearer token
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Set the page size
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the per-request timeout
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

/// Extractor posting query documents to a GraphQL endpoint
pub struct GraphqlExtractor {
    config: GraphqlConfig,
    client: Client,
    queries: Vec<(&'static RawTable, String)>,
    warehouse: Warehouse,
}

impl std::fmt::Debug for GraphqlExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphqlExtractor")
            .field("endpoint", &self.config.endpoint)
            .field("page_size", &self.config.page_size)
            .field(
                "tables",
                &self.queries.iter().map(|(t, _)| t.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl GraphqlExtractor {
    /// Build the client and load query documents
    pub fn new(config: GraphqlConfig, warehouse: Warehouse) -> Result<Self, ExtractSetupError> {
        if config.endpoint.trim().is_empty() {
            return Err(ExtractSetupError::Config("endpoint is required".to_string()));
        }
        if config.page_size == 0 {
            return Err(ExtractSetupError::Config(
                "page size must be at least 1".to_string(),
            ));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(config.request_timeout)
            .build()?;
        let queries = load_queries(&config.query_dir)?;

        Ok(Self {
            config,
            client,
            queries,
            warehouse,
        })
    }

    /// Tables that have a query document
    pub fn tables(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.queries.iter().map(|(t, _)| t.name)
    }

    async fn fetch_page(
        &self,
        query: &str,
        period: &Period,
        offset: u64,
    ) -> Result<Vec<SourceRow>, StageError> {
        let payload = json!({
            "query": query,
            "variables": {
                "start_date": period.start().to_string(),
                "end_date": period.end().to_string(),
                "limit": self.config.page_size,
                "offset": offset,
            }
        });

        let mut request = self.client.post(&self.config.endpoint).json(&payload);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| request_error(e, self.config.request_timeout))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| request_error(e, self.config.request_timeout))?;

        if let Some(err) = classify_status(status, &body) {
            return Err(err);
        }

        let document: Value = serde_json::from_str(&body)
            .map_err(|e| StageError::Schema(format!("malformed response body: {e}")))?;
        parse_page(&document)
    }

    async fn fetch_table(
        &self,
        table: &RawTable,
        query: &str,
        period: &Period,
    ) -> Result<Vec<SourceRow>, StageError> {
        let page_size = u64::from(self.config.page_size);
        let mut rows = Vec::new();
        let mut offset = 0u64;

        loop {
            let page = self.fetch_page(query, period, offset).await?;
            let fetched = page.len() as u64;
            rows.extend(page);
            debug!(table = %table.name, offset, fetched, "Fetched page");

            if fetched < page_size {
                break;
            }
            offset += page_size;
        }

        Ok(rows)
    }
}

impl GraphqlExtractor {
    /// Land one table's rows off the async workers
    async fn land(
        &self,
        table: &'static str,
        period: &Period,
        rows: Vec<SourceRow>,
    ) -> Result<u64, StageError> {
        let warehouse = self.warehouse.clone();
        let owned = period.clone();
        let source = self.name().to_string();
        let landed = tokio::task::spawn_blocking(move || warehouse.land(table, &owned, &source, &rows))
            .await
            .map_err(|e| StageError::Unavailable(format!("landing task failed: {e}")))??;
        Ok(landed)
    }
}

#[async_trait]
impl Extractor for GraphqlExtractor {
    fn name(&self) -> &str {
        "graphql"
    }

    async fn extract(&self, period: &Period) -> Result<ExtractResult, StageError> {
        let mut result = ExtractResult::default();

        for (table, query) in &self.queries {
            let rows = self.fetch_table(table, query, period).await?;
            let rows = prepare_rows(table, period, rows)?;
            let landed = self.land(table.name, period, rows).await?;
            result.tables.insert(table.name.to_string(), landed);
        }

        info!(
            period = %period.key(),
            rows = result.row_count(),
            "GraphQL extract complete"
        );
        Ok(result)
    }
}

fn load_queries(dir: &std::path::Path) -> Result<Vec<(&'static RawTable, String)>, ExtractSetupError> {
    let mut queries = Vec::new();
    for table in RAW_TABLES.iter() {
        let path = dir.join(format!("{}.graphql", table.name));
        match std::fs::read_to_string(&path) {
            Ok(text) => queries.push((table, text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(table = %table.name, path = %path.display(), "No query document, table skipped");
            }
            Err(e) => {
                return Err(ExtractSetupError::Query {
                    path,
                    message: e.to_string(),
                })
            }
        }
    }

    if queries.is_empty() {
        return Err(ExtractSetupError::NoQueries(dir.to_path_buf()));
    }
    Ok(queries)
}

fn request_error(e: reqwest::Error, timeout: Duration) -> StageError {
    if e.is_timeout() {
        StageError::Timeout(timeout)
    } else if e.is_decode() {
        StageError::Schema(e.to_string())
    } else {
        StageError::Network(e.to_string())
    }
}

/// Map a non-success HTTP status to a stage error
fn classify_status(status: StatusCode, body: &str) -> Option<StageError> {
    if status.is_success() {
        return None;
    }

    let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
    let message = format!("HTTP {status}: {excerpt}");
    Some(if status == StatusCode::TOO_MANY_REQUESTS {
        StageError::RateLimited(message)
    } else if status.is_server_error() {
        StageError::Unavailable(message)
    } else {
        StageError::Validation(message)
    })
}

/// Rows of one GraphQL response document
fn parse_page(document: &Value) -> Result<Vec<SourceRow>, StageError> {
    if let Some(errors) = document.get("errors") {
        let has_errors = errors.as_array().map_or(!errors.is_null(), |a| !a.is_empty());
        if has_errors {
            return Err(StageError::Validation(format!("GraphQL errors: {errors}")));
        }
    }

    let data = document
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| StageError::Schema("response has no data object".to_string()))?;
    let items = data
        .values()
        .find_map(Value::as_array)
        .ok_or_else(|| StageError::Schema("data has no array field".to_string()))?;

    items
        .iter()
        .map(|item| match item {
            Value::Object(obj) => {
                let mut row = SourceRow::new();
                flatten("", obj, &mut row);
                Ok(row)
            }
            other => Err(StageError::Schema(format!("row is not an object: {other}"))),
        })
        .collect()
}

fn flatten(prefix: &str, obj: &Map<String, Value>, out: &mut SourceRow) {
    for (key, value) in obj {
        let column = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}__{key}")
        };
        match value {
            Value::Object(nested) => flatten(&column, nested, out),
            Value::Array(_) => {
                out.insert(column, Value::String(value.to_string()));
            }
            scalar => {
                out.insert(column, scalar.clone());
            }
        }
    }
}
