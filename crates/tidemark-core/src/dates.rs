use chrono::{Duration, NaiveDate};

use crate::errors::ConfigError;

/// Declarative date-selection policy, loaded once per run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatePolicy {
    /// `window_days` consecutive dates ending at the reference date.
    /// `start`, when set, clamps how far back the window reaches (telemetry
    /// does not exist before the source was deployed).
    Rolling { window_days: u32, start: Option<NaiveDate> },
    /// Every date from `start` to `end`, inclusive on both ends.
    Range { start: NaiveDate, end: NaiveDate },
    /// An explicit set of dates.
    List { dates: Vec<NaiveDate> },
}

/// Resolve a policy into concrete dates, deduplicated and ascending.
///
/// Pure: `reference_date` comes from the caller, never from the clock. The
/// ascending order is relied on downstream to build older dates first.
pub fn resolve(policy: &DatePolicy, reference_date: NaiveDate) -> Result<Vec<NaiveDate>, ConfigError> {
    match policy {
        DatePolicy::Rolling { window_days, start } => {
            if *window_days == 0 {
                return Err(ConfigError::EmptyWindow);
            }
            let mut dates = Vec::with_capacity(*window_days as usize);
            for offset in (0..i64::from(*window_days)).rev() {
                let date = reference_date - Duration::days(offset);
                if let Some(limit) = start {
                    if date < *limit {
                        continue;
                    }
                }
                dates.push(date);
            }
            Ok(dates)
        }
        DatePolicy::Range { start, end } => {
            if start > end {
                return Err(ConfigError::InvertedRange { start: *start, end: *end });
            }
            let mut dates = Vec::new();
            let mut current = *start;
            while current <= *end {
                dates.push(current);
                current += Duration::days(1);
            }
            Ok(dates)
        }
        DatePolicy::List { dates } => {
            let mut dates = dates.clone();
            dates.sort();
            dates.dedup();
            Ok(dates)
        }
    }
}
