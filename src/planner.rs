//! Monthly period planning
//!
//! Expands a requested date range into whole calendar months and classifies
//! each month against its checkpoint record.
//!
//! # Usage Example
//!
//! ```rust
//! use property_etl::planner::{plan_periods, YearMonth};
//! use chrono::NaiveDate;
//!
//! let start = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
//! let end = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
//! let periods = plan_periods(start, end).unwrap();
//!
//! assert_eq!(periods.len(), 3);
//! assert_eq!(periods[0].key(), "2024-01");
//! assert_eq!(periods[0].display_start(), start);
//! assert_eq!(periods[0].start(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
//! assert_eq!(periods[2].month(), "2024-03".parse::<YearMonth>().unwrap());
//! ```

use crate::checkpoint::{CheckpointRecord, PeriodStatus};
use crate::stage::Stage;
use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors raised while planning periods
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Not a `YYYY-MM` string or not a real month
    #[error("invalid year-month '{0}' (expected YYYY-MM)")]
    InvalidYearMonth(String),

    /// Range end is not after its start
    #[error("empty range: end {end} is not after start {start}")]
    EmptyRange {
        /// Requested start
        start: NaiveDate,
        /// Requested end
        end: NaiveDate,
    },

    /// Month arithmetic left chrono's representable range
    #[error("date out of range after {0}")]
    OutOfRange(NaiveDate),
}

/// A calendar month, stored as its first day
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth(NaiveDate);

impl YearMonth {
    /// Build from year and month (1-12)
    pub fn new(year: i32, month: u32) -> Result<Self, PlanError> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(Self)
            .ok_or_else(|| PlanError::InvalidYearMonth(format!("{year:04}-{month:02}")))
    }

    /// The month containing `date`
    pub fn containing(date: NaiveDate) -> Self {
        // day 1 always exists for a month chrono already represents
        Self(date.with_day(1).unwrap_or(date))
    }

    /// Year
    pub fn year(&self) -> i32 {
        self.0.year()
    }

    /// Month (1-12)
    pub fn month(&self) -> u32 {
        self.0.month()
    }

    /// First day of the month
    pub fn first_day(&self) -> NaiveDate {
        self.0
    }

    /// The following month
    pub fn next(&self) -> Result<Self, PlanError> {
        self.0
            .checked_add_months(Months::new(1))
            .map(Self)
            .ok_or(PlanError::OutOfRange(self.0))
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for YearMonth {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PlanError::InvalidYearMonth(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

impl TryFrom<String> for YearMonth {
    type Error = PlanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.to_string()
    }
}

/// One monthly processing window
///
/// Extraction always covers `[start, end)` for the whole month; the display
/// bounds are the requested range clipped to the month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    month: YearMonth,
    start: NaiveDate,
    end: NaiveDate,
    display_start: NaiveDate,
    display_end: NaiveDate,
}

impl Period {
    /// Whole-month period
    pub fn for_month(month: YearMonth) -> Result<Self, PlanError> {
        let start = month.first_day();
        let end = month.next()?.first_day();
        Ok(Self {
            month,
            start,
            end,
            display_start: start,
            display_end: end,
        })
    }

    /// Canonical checkpoint key (`YYYY-MM`)
    pub fn key(&self) -> String {
        self.month.to_string()
    }

    /// Calendar month
    pub fn month(&self) -> YearMonth {
        self.month
    }

    /// First day of the extraction window
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Exclusive end of the extraction window
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Requested start clipped to this month
    pub fn display_start(&self) -> NaiveDate {
        self.display_start
    }

    /// Requested exclusive end clipped to this month
    pub fn display_end(&self) -> NaiveDate {
        self.display_end
    }

    /// Whether `date` falls inside the extraction window
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}, {})", self.key(), self.display_start, self.display_end)
    }
}

/// Expand `[start, end)` into monthly periods, earliest first
pub fn plan_periods(start: NaiveDate, end: NaiveDate) -> Result<Vec<Period>, PlanError> {
    if end <= start {
        return Err(PlanError::EmptyRange { start, end });
    }

    let mut periods = Vec::new();
    let mut month = YearMonth::containing(start);
    while month.first_day() < end {
        let mut period = Period::for_month(month)?;
        period.display_start = period.start.max(start);
        period.display_end = period.end.min(end);
        periods.push(period);
        month = month.next()?;
    }
    Ok(periods)
}

/// Periods for an inclusive month range, as given on the command line
pub fn plan_months(first: YearMonth, last: YearMonth) -> Result<Vec<Period>, PlanError> {
    plan_periods(first.first_day(), last.next()?.first_day())
}

/// Knobs that influence classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    /// Re-execute completed periods
    pub force: bool,
    /// Only the extract stage is requested
    pub extract_only: bool,
    /// Highest retry count a period may reach
    pub max_period_retries: u32,
}

/// What the orchestrator should do with a period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanAction {
    /// Run the period starting at `from`
    Execute {
        /// First stage to run
        from: Stage,
        /// Retry count to record for this attempt
        retry_count: u32,
        /// Discard the prior record before running
        restart: bool,
    },
    /// Nothing to do
    Skip,
    /// Retry ceiling reached; permanently failed
    Exhausted {
        /// Retries already spent
        retry_count: u32,
    },
}

/// A period together with its classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPeriod {
    /// The period
    pub period: Period,
    /// Checkpoint status at planning time
    pub prior_status: Option<PeriodStatus>,
    /// Decision
    pub action: PlanAction,
}

/// Classify one period against its checkpoint record
pub fn classify(
    period: Period,
    record: Option<&CheckpointRecord>,
    options: PlanOptions,
) -> PlannedPeriod {
    let prior_status = record.map(|r| r.status());
    let fresh = PlanAction::Execute {
        from: Stage::Extract,
        retry_count: 0,
        restart: record.is_some(),
    };

    let action = match record {
        None => fresh,
        Some(_) if options.force => fresh,
        Some(record) => match record.status() {
            PeriodStatus::Pending => PlanAction::Execute {
                from: Stage::Extract,
                retry_count: record.retry_count(),
                restart: false,
            },
            PeriodStatus::Completed => PlanAction::Skip,
            PeriodStatus::ExtractDone if options.extract_only => PlanAction::Skip,
            PeriodStatus::ExtractDone => PlanAction::Execute {
                from: Stage::Transform,
                retry_count: record.retry_count(),
                restart: false,
            },
            PeriodStatus::Failed | PeriodStatus::InProgress => {
                let next = record.retry_count() + 1;
                if next > options.max_period_retries {
                    PlanAction::Exhausted {
                        retry_count: record.retry_count(),
                    }
                } else if record.extract_succeeded() {
                    if options.extract_only {
                        PlanAction::Skip
                    } else {
                        PlanAction::Execute {
                            from: Stage::Transform,
                            retry_count: next,
                            restart: false,
                        }
                    }
                } else {
                    PlanAction::Execute {
                        from: Stage::Extract,
                        retry_count: next,
                        restart: false,
                    }
                }
            }
        },
    };

    PlannedPeriod {
        period,
        prior_status,
        action,
    }
}
