//! PositionsBuilder: folds a day's execution evidence into a
//! `PositionsSnapshot v5`.
//!
//! Grounded on spec.md §4.9 and the `PositionsSnapshot` data-model entry.
//! v5 is the strictest lineage tier: every source submission must carry
//! `engine_id`/`source_intent_id`/`intent_sha256`, or the whole snapshot
//! fails closed with `MISSING_ENGINE_ATTRIBUTION` rather than silently
//! dropping the unattributed position.

use serde_json::json;

use crate::canon_hash::inject_self_hash;
use crate::decimal_codec;
use crate::error::{KernelError, KernelResult};
use crate::kernel::{Kernel, ProducerIdentity};

/// One filled submission, already read from
/// `execution_evidence_v1/submissions/<day>/<binding_hash>/`.
#[derive(Debug, Clone)]
pub struct FilledSubmission {
    pub binding_hash: String,
    pub engine_id: Option<String>,
    pub source_intent_id: Option<String>,
    pub intent_sha256: Option<String>,
    pub instrument_symbol: String,
    /// `"PUT"` / `"CALL"` for an option leg pair, `None` for equity.
    pub instrument_right: Option<String>,
    pub instrument_strike: Option<String>,
    pub instrument_expiry_utc: Option<String>,
    pub filled_qty: i64,
    pub avg_price: String,
}

fn normalize_right(raw: &str) -> KernelResult<&'static str> {
    match raw {
        "PUT" => Ok("P"),
        "CALL" => Ok("C"),
        other => Err(KernelError::new("UNSUPPORTED_INSTRUMENT_RIGHT", other.to_string())),
    }
}

fn avg_cost_cents(avg_price: &str) -> KernelResult<i64> {
    let d = decimal_codec::parse_str_strict(avg_price, "avg_price")?;
    let cents = d * rust_decimal::Decimal::from(100);
    // `avg_price` carrying more than 2dp would make `cents` fractional; reject
    // rather than silently truncating to a cents integer.
    if !cents.fract().is_zero() {
        return Err(KernelError::new("AVG_PRICE_NOT_2DP", avg_price.to_string()));
    }
    cents.trunc().to_string().parse::<i64>().map_err(|e| KernelError::new("AVG_PRICE_NOT_2DP", format!("{avg_price}: {e}")))
}

pub fn build_positions_snapshot_v5(
    kernel: &Kernel,
    day_utc: &str,
    producer: &ProducerIdentity,
    submissions: &[FilledSubmission],
) -> KernelResult<(serde_json::Value, String)> {
    let mut items = Vec::with_capacity(submissions.len());
    for s in submissions {
        if s.engine_id.is_none() || s.source_intent_id.is_none() || s.intent_sha256.is_none() {
            return Err(KernelError::new("MISSING_ENGINE_ATTRIBUTION", s.binding_hash.clone()));
        }
        let right = s.instrument_right.as_deref().map(normalize_right).transpose()?;
        let cents = avg_cost_cents(&s.avg_price)?;

        items.push(json!({
            "position_id": s.binding_hash,
            "engine_id": s.engine_id,
            "source_intent_id": s.source_intent_id,
            "intent_sha256": s.intent_sha256,
            "instrument": {
                "symbol": s.instrument_symbol,
                "right": right,
                "strike": s.instrument_strike,
                "expiry_utc": s.instrument_expiry_utc,
            },
            "qty": s.filled_qty,
            "avg_cost_cents": cents,
            "status": "OPEN",
            "opened_day_utc": day_utc,
        }));
    }
    items.sort_by(|a, b| a["position_id"].as_str().cmp(&b["position_id"].as_str()));

    let obj = json!({
        "schema_id": "positions_snapshot",
        "schema_version": "v5",
        "day_utc": day_utc,
        "producer": {"repo": producer.repo, "git_sha": producer.git_sha, "module": producer.module},
        "positions": items,
        "canonical_json_hash": null,
    });
    let (injected, hash) = inject_self_hash(&obj, "canonical_json_hash")
        .map_err(|e| KernelError::new("C2_DETERMINISM_CANONICALIZATION_FAILED", e.to_string()))?;
    kernel.schema_registry.validate("positions_snapshot.v5", &injected)?;
    Ok((injected, hash))
}

/// `positions_effective_pointer.v1`: which positions snapshot downstream
/// consumers (`DefinedRiskDeriver`, `AccountingAggregator`) should read for
/// this day. This kernel only ever produces `positions_snapshot.v5`, so
/// selection is trivial; the pointer exists so those consumers have one
/// stable path to read regardless of which snapshot schema version a future
/// engine adds, grounded on `run_positions_effective_pointer_day_v1.py`'s
/// v3-then-v2 selection.
pub fn build_effective_pointer(
    kernel: &Kernel,
    producer: &ProducerIdentity,
    day_utc: &str,
    snapshot_path: &str,
    snapshot_sha256: &str,
) -> KernelResult<(serde_json::Value, String)> {
    let obj = json!({
        "schema_id": "positions_effective_pointer",
        "schema_version": "v1",
        "day_utc": day_utc,
        "producer": {"repo": producer.repo, "git_sha": producer.git_sha, "module": producer.module},
        "status": "OK",
        "reason_codes": ["SELECTED_POSITIONS_V5"],
        "selection": {"selected_schema_id": "positions_snapshot", "selected_schema_version": "v5"},
        "pointers": {"snapshot_path": snapshot_path, "snapshot_sha256": snapshot_sha256},
        "canonical_json_hash": null,
    });
    let (injected, hash) = inject_self_hash(&obj, "canonical_json_hash")
        .map_err(|e| KernelError::new("C2_DETERMINISM_CANONICALIZATION_FAILED", e.to_string()))?;
    kernel.schema_registry.validate("positions_effective_pointer.v1", &injected)?;
    Ok((injected, hash))
}
