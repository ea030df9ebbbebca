//! `UtcZ`: a strongly-typed UTC timestamp fixed to `YYYY-MM-DDTHH:MM:SSZ`.
//!
//! Grounded on `map_vertical_spread_v1.py::_parse_utc_z` (requires the `Z`
//! suffix, rejects offset notation) and `submit_boundary_paper_v4.py`'s day
//! derivation. The kernel never reads the wall clock: every `UtcZ` value
//! enters as a caller-supplied argument (`now_utc`, `produced_utc`, ...).

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{KernelError, KernelResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UtcZ(DateTime<Utc>);

impl UtcZ {
    /// Parses `YYYY-MM-DDTHH:MM:SSZ` (and subsecond variants), rejecting
    /// any string that does not end in a literal `Z`.
    pub fn parse(s: &str) -> KernelResult<UtcZ> {
        if !s.ends_with('Z') {
            return Err(KernelError::new("TIMESTAMP_MISSING_Z_SUFFIX", s.to_string()));
        }
        let rfc = s.replacen('Z', "+00:00", 1);
        let dt = DateTime::parse_from_rfc3339(&rfc)
            .map_err(|e| KernelError::new("TIMESTAMP_PARSE_FAILED", format!("{s}: {e}")))?;
        Ok(UtcZ(dt.with_timezone(&Utc)))
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> UtcZ {
        UtcZ(dt)
    }

    pub fn format(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    pub fn day_utc(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    pub fn inner(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for UtcZ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format())
    }
}

/// Calendar-date difference in whole days; rejects a negative span.
pub fn dte_days_calendar(as_of_utc: &UtcZ, expiry_utc: &UtcZ) -> KernelResult<i64> {
    let a: NaiveDate = as_of_utc.0.date_naive();
    let e: NaiveDate = expiry_utc.0.date_naive();
    let days = (e - a).num_days();
    if days < 0 {
        return Err(KernelError::new("EXPIRY_BEFORE_AS_OF", format!("{as_of_utc} -> {expiry_utc}")));
    }
    Ok(days)
}
