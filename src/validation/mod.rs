//! Data-quality validation of the analytics tables
//!
//! Each check counts passing rows out of a total and compares the pass rate
//! with a threshold: at or above is PASS, within 15 points below is WARN,
//! anything lower is FAIL. A report passes when no check fails.

pub mod checks;

pub use checks::{
    BusinessRuleChecks, ReferentialIntegrityChecks, RequiredFieldChecks, ScdHistoryChecks,
    UniquenessChecks,
};

use crate::scd::{DimensionTable, SourceRow};
use crate::transform::{DIM_ENTITY, DIM_PROPERTY, FACT_TRANSACTION};
use crate::warehouse::{Warehouse, WarehouseError};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// Points below the threshold that still count as a warning
pub const WARN_MARGIN: f64 = 15.0;

/// Default pass threshold for foreign-key checks
pub const DEFAULT_FK_THRESHOLD: f64 = 95.0;

/// Outcome of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    /// At or above threshold
    Pass,
    /// Slightly below threshold
    Warn,
    /// Well below threshold
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        })
    }
}

/// One recorded check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    /// Check family, e.g. `REQUIRED_FIELD`
    pub category: String,
    /// Human-readable check name
    pub name: String,
    /// Resulting status
    pub status: CheckStatus,
    /// Rows that passed
    pub passed: u64,
    /// Rows checked
    pub total: u64,
    /// Pass threshold in percent
    pub threshold: f64,
    /// Extra context
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl CheckResult {
    /// Pass rate in percent; an empty check counts as fully passing
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.passed as f64 * 100.0 / self.total as f64
        }
    }
}

/// Informational metric, never pass/fail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistic {
    /// Metric family
    pub category: String,
    /// Metric name
    pub metric: String,
    /// Value
    pub value: String,
}

/// Accumulated checks and statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// Checks in the order they ran
    pub checks: Vec<CheckResult>,
    /// Statistics in the order they were recorded
    pub statistics: Vec<Statistic>,
}

impl ValidationReport {
    /// Record a check and derive its status from `threshold`
    pub fn add_check(
        &mut self,
        category: &str,
        name: impl Into<String>,
        passed: u64,
        total: u64,
        threshold: f64,
        message: impl Into<String>,
    ) -> CheckStatus {
        let mut check = CheckResult {
            category: category.to_string(),
            name: name.into(),
            status: CheckStatus::Pass,
            passed,
            total,
            threshold,
            message: message.into(),
        };
        let pct = check.percentage();
        check.status = if pct >= threshold {
            CheckStatus::Pass
        } else if pct >= threshold - WARN_MARGIN {
            CheckStatus::Warn
        } else {
            CheckStatus::Fail
        };

        if check.status != CheckStatus::Pass {
            warn!(
                category = %check.category,
                check = %check.name,
                status = %check.status,
                passed,
                total,
                "Data-quality check below threshold"
            );
        }
        let status = check.status;
        self.checks.push(check);
        status
    }

    /// Record a statistic
    pub fn add_stat(&mut self, category: &str, metric: impl Into<String>, value: impl ToString) {
        self.statistics.push(Statistic {
            category: category.to_string(),
            metric: metric.into(),
            value: value.to_string(),
        });
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    /// Checks that passed
    pub fn passed_count(&self) -> usize {
        self.count(CheckStatus::Pass)
    }

    /// Checks that warned
    pub fn warning_count(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    /// Checks that failed
    pub fn failed_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    /// No check failed
    pub fn is_passing(&self) -> bool {
        self.failed_count() == 0
    }
}

/// Analytics tables loaded for validation
#[derive(Debug, Clone)]
pub struct AnalyticsSnapshot {
    /// Property dimension
    pub dim_property: DimensionTable,
    /// Entity dimension
    pub dim_entity: DimensionTable,
    /// Transaction facts
    pub fact_transaction: Vec<SourceRow>,
}

impl AnalyticsSnapshot {
    /// Load every analytics table from `warehouse`, damaged or not
    pub fn load(warehouse: &Warehouse) -> Result<Self, WarehouseError> {
        Ok(Self {
            dim_property: warehouse.inspect_dimension(DIM_PROPERTY)?,
            dim_entity: warehouse.inspect_dimension(DIM_ENTITY)?,
            fact_transaction: warehouse.load_facts(FACT_TRANSACTION)?,
        })
    }
}

/// A family of checks over an [`AnalyticsSnapshot`]
pub trait Validator: Send + Sync {
    /// Family name for logs
    fn name(&self) -> &str;

    /// Record this family's checks into `report`
    fn validate(&self, snapshot: &AnalyticsSnapshot, report: &mut ValidationReport);
}

/// Runs every check family against the warehouse
pub struct DataQualityValidator {
    warehouse: Warehouse,
    validators: Vec<Box<dyn Validator>>,
}

impl DataQualityValidator {
    /// Validator with the standard check families
    pub fn new(warehouse: Warehouse) -> Self {
        Self::with_fk_threshold(warehouse, DEFAULT_FK_THRESHOLD)
    }

    /// Standard check families with a custom foreign-key threshold (percent)
    pub fn with_fk_threshold(warehouse: Warehouse, threshold: f64) -> Self {
        Self {
            warehouse,
            validators: vec![
                Box::new(RequiredFieldChecks),
                Box::new(UniquenessChecks),
                Box::new(ScdHistoryChecks),
                Box::new(ReferentialIntegrityChecks::with_threshold(threshold)),
                Box::new(BusinessRuleChecks),
            ],
        }
    }

    /// Add another check family
    pub fn with_validator(mut self, validator: Box<dyn Validator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Load the analytics tables and run every family
    pub fn run(&self) -> Result<ValidationReport, WarehouseError> {
        let snapshot = AnalyticsSnapshot::load(&self.warehouse)?;
        Ok(self.run_on(&snapshot))
    }

    /// Run every family against an already loaded snapshot
    pub fn run_on(&self, snapshot: &AnalyticsSnapshot) -> ValidationReport {
        let mut report = ValidationReport::default();
        for validator in &self.validators {
            let before = report.checks.len();
            validator.validate(snapshot, &mut report);
            info!(
                validator = validator.name(),
                checks = report.checks.len() - before,
                "Check family complete"
            );
        }

        report.add_stat("CARDINALITY", "dim_property members", snapshot.dim_property.member_count());
        report.add_stat("CARDINALITY", "dim_property versions", snapshot.dim_property.len());
        report.add_stat("CARDINALITY", "dim_entity members", snapshot.dim_entity.member_count());
        report.add_stat("CARDINALITY", "fact_transaction rows", snapshot.fact_transaction.len());

        info!(
            passed = report.passed_count(),
            warnings = report.warning_count(),
            failed = report.failed_count(),
            "Validation complete"
        );
        report
    }
}
