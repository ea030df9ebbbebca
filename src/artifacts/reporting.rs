//! ReportingAggregator: the final pipeline stage, a day-level rollup
//! binding every downstream artifact's hash into one `DayReport v1` so a
//! single file answers "what happened, and is it all internally
//! consistent" for a trading day.
//!
//! Grounded on spec.md §1's pipeline summary (ending in "...accounting →
//! allocation → reporting") and the lineage-embedding pattern already used
//! by `preflight.rs`/`submit.rs` — a report never recomputes the upstream
//! artifacts, it only binds their already-verified hashes.

use serde_json::json;

use crate::canon_hash::inject_self_hash;
use crate::error::KernelError;
use crate::error::KernelResult;
use crate::kernel::{Kernel, ProducerIdentity};

/// One row per engine's allocation+accounting participation on the day;
/// `None` hashes mean that artifact simply wasn't produced this run (e.g.
/// no intents for that engine), not that it failed.
#[derive(Debug, Clone, Default)]
pub struct DayReportLineage {
    pub positions_hash: Option<String>,
    pub lifecycle_hash: Option<String>,
    pub nav_hash: Option<String>,
    pub exposure_hash: Option<String>,
    pub attribution_hash: Option<String>,
    pub allocation_summary_hash: Option<String>,
}

pub fn build_day_report(
    kernel: &Kernel,
    producer: &ProducerIdentity,
    produced_utc: &str,
    day_utc: &str,
    lineage: &DayReportLineage,
    degraded_reason_codes: &[&str],
) -> KernelResult<(serde_json::Value, String)> {
    let status = if degraded_reason_codes.is_empty() { "OK" } else { "DEGRADED" };
    let obj = json!({
        "schema_id": "day_report",
        "schema_version": "v1",
        "produced_utc": produced_utc,
        "day_utc": day_utc,
        "producer": {"repo": producer.repo, "git_sha": producer.git_sha, "module": producer.module},
        "status": status,
        "reason_codes": degraded_reason_codes,
        "lineage": {
            "positions_hash": lineage.positions_hash,
            "lifecycle_hash": lineage.lifecycle_hash,
            "nav_hash": lineage.nav_hash,
            "exposure_hash": lineage.exposure_hash,
            "attribution_hash": lineage.attribution_hash,
            "allocation_summary_hash": lineage.allocation_summary_hash,
        },
        "canonical_json_hash": null,
    });
    let (injected, hash) = inject_self_hash(&obj, "canonical_json_hash")
        .map_err(|e| KernelError::new("C2_DETERMINISM_CANONICALIZATION_FAILED", e.to_string()))?;
    kernel.schema_registry.validate("day_report.v1", &injected)?;
    Ok((injected, hash))
}
