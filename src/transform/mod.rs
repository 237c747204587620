//! Warehouse transformer: raw tables into the analytics star schema
//!
//! For a period, the latest landed row per identity is folded into
//! `dim_property` and `dim_entity` (SCD Type 2, effective on the period
//! start) and `fact_transaction` is upserted by recorder id. Re-running a
//! period over the same raw data changes nothing.

pub mod catalog;
pub mod fact;

pub use catalog::{dim_entity_spec, dim_property_spec, DIM_ENTITY, DIM_PROPERTY, FACT_TRANSACTION};
pub use fact::{build_fact, upsert_facts, TransactionCategory};

use crate::metrics;
use crate::planner::Period;
use crate::scd::{DimensionSpec, DimensionTable, MergeStats, SourceRow};
use crate::stage::{StageError, TransformResult, Transformer};
use crate::warehouse::Warehouse;
use async_trait::async_trait;
use catalog::{entity_row, PartyRole};
use fact::PartyCounts;
use serde_json::Value;
use tracing::{debug, info};

/// Builds analytics tables from the raw layer of a [`Warehouse`]
#[derive(Debug, Clone)]
pub struct WarehouseTransformer {
    warehouse: Warehouse,
}

impl WarehouseTransformer {
    /// Transformer over `warehouse`
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    fn merge_dimension(
        &self,
        spec: &DimensionSpec,
        batch: &[SourceRow],
        period: &Period,
    ) -> Result<(DimensionTable, MergeStats), StageError> {
        let mut dimension = self.warehouse.load_dimension(spec.table())?;
        let stats = dimension.merge(spec, batch, period.start())?;
        if stats.changed() > 0 {
            self.warehouse.save_dimension(&dimension)?;
        }
        metrics::record_scd_merge(spec.table(), stats.inserted, stats.expired);
        debug!(
            table = %spec.table(),
            inserted = stats.inserted,
            expired = stats.expired,
            corrected = stats.corrected,
            unchanged = stats.unchanged,
            "Dimension merged"
        );
        Ok((dimension, stats))
    }

    fn parties(&self, role: PartyRole, period_key: &str) -> Result<(Vec<SourceRow>, PartyCounts), StageError> {
        let raw = self
            .warehouse
            .latest_rows(role.table(), period_key, role.identity())?;

        let mut counts = PartyCounts::new();
        for row in &raw {
            if let Some(id) = row.get("recorder_id").and_then(Value::as_str) {
                *counts.entry(id.trim().to_string()).or_default() += 1;
            }
        }

        let entities = raw.iter().filter_map(|row| entity_row(role, row)).collect();
        Ok((entities, counts))
    }

    fn transform_blocking(&self, period: &Period) -> Result<TransformResult, StageError> {
        let key = period.key();
        let mut result = TransformResult::default();

        let properties = self
            .warehouse
            .latest_rows("properties", &key, "tax_assessor_id")?;
        let (dim_property, stats) = self.merge_dimension(&dim_property_spec(), &properties, period)?;
        result
            .tables_updated
            .insert(DIM_PROPERTY.to_string(), stats.changed());

        let (mut entities, grantor_counts) = self.parties(PartyRole::Grantor, &key)?;
        let (grantee_entities, grantee_counts) = self.parties(PartyRole::Grantee, &key)?;
        entities.extend(grantee_entities);
        let (_, stats) = self.merge_dimension(&dim_entity_spec(), &entities, period)?;
        result
            .tables_updated
            .insert(DIM_ENTITY.to_string(), stats.changed());

        let transactions = self
            .warehouse
            .latest_rows("transactions", &key, fact::RECORDER_ID)?;
        let facts = transactions
            .iter()
            .map(|raw| build_fact(raw, &dim_property, &grantor_counts, &grantee_counts))
            .collect::<Result<Vec<_>, _>>()?;

        let mut fact_table = self.warehouse.load_facts(FACT_TRANSACTION)?;
        let changed = upsert_facts(&mut fact_table, facts);
        if changed > 0 {
            self.warehouse.save_facts(FACT_TRANSACTION, &fact_table)?;
        }
        result
            .tables_updated
            .insert(FACT_TRANSACTION.to_string(), changed);

        Ok(result)
    }
}

#[async_trait]
impl Transformer for WarehouseTransformer {
    async fn transform(&self, period: &Period) -> Result<TransformResult, StageError> {
        let this = self.clone();
        let owned = period.clone();
        let result = tokio::task::spawn_blocking(move || this.transform_blocking(&owned))
            .await
            .map_err(|e| StageError::Unavailable(format!("transform task failed: {e}")))??;

        info!(
            period = %period.key(),
            rows = result.row_count(),
            "Transform complete"
        );
        Ok(result)
    }
}
