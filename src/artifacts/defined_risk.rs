//! DefinedRiskDeriver: derives a day's per-position max-loss exposure from
//! each filled position's originating `order_plan.v1.risk_proof`, selected
//! through the day's positions effective pointer.
//!
//! Grounded on `run_defined_risk_day_v1.py`: a position with no matching
//! order plan on disk, or whose `risk_proof.defined_risk_proven` isn't
//! `true`, is carried forward as `UNDEFINED_RISK` with `max_loss_cents: null`
//! rather than dropped — `AccountingAggregator`'s Exposure artifact only
//! sums the positions this snapshot marks `DEFINED_RISK`.

use serde_json::json;

use crate::canon_hash::inject_self_hash;
use crate::error::{KernelError, KernelResult};
use crate::kernel::{Kernel, ProducerIdentity};

/// Deterministic, float-free USD-string-to-cents parse, mirroring the
/// original's own `_parse_usd_to_cents_failclosed`.
fn usd_to_cents_strict(s: &str) -> Result<i64, String> {
    let t = s.trim();
    if t.is_empty() {
        return Err("USD_EMPTY".to_string());
    }
    if t.matches('.').count() > 1 {
        return Err("USD_INVALID_DECIMAL".to_string());
    }
    let mut parts = t.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    let frac = parts.next().unwrap_or("");
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err("USD_INVALID_WHOLE".to_string());
    }
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err("USD_INVALID_FRAC".to_string());
    }
    if frac.len() > 2 {
        return Err("USD_TOO_MANY_DECIMALS".to_string());
    }
    let mut frac2 = frac.to_string();
    while frac2.len() < 2 {
        frac2.push('0');
    }
    let whole_n: i64 = whole.parse().map_err(|_| "USD_INVALID_WHOLE".to_string())?;
    let frac_n: i64 = frac2.parse().map_err(|_| "USD_INVALID_FRAC".to_string())?;
    Ok(whole_n * 100 + frac_n)
}

/// One position out of the selected snapshot, plus whatever `order_plan.v1`
/// this binary could locate for it (`None` when no submission directory
/// carries that `binding_hash`).
#[derive(Debug, Clone)]
pub struct PositionRiskInput {
    pub position_id: String,
    pub underlying: String,
    pub expiry_utc: Option<String>,
    pub order_plan_path: String,
    pub order_plan_sha256: String,
    pub risk_proof: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct EffectivePointerRef {
    pub path: String,
    pub sha256: String,
}

fn self_hash_and_validate(
    kernel: &Kernel,
    schema_name: &str,
    mut obj: serde_json::Value,
) -> KernelResult<(serde_json::Value, String)> {
    obj["canonical_json_hash"] = serde_json::Value::Null;
    let (injected, hash) = inject_self_hash(&obj, "canonical_json_hash")
        .map_err(|e| KernelError::new("C2_DETERMINISM_CANONICALIZATION_FAILED", e.to_string()))?;
    kernel.schema_registry.validate(schema_name, &injected)?;
    Ok((injected, hash))
}

pub fn build_snapshot(
    kernel: &Kernel,
    producer: &ProducerIdentity,
    produced_utc: &str,
    day_utc: &str,
    pointer: &EffectivePointerRef,
    items: &[PositionRiskInput],
) -> KernelResult<(serde_json::Value, String)> {
    let mut items_out = Vec::with_capacity(items.len());
    let mut missing = 0u32;

    for it in items {
        let Some(rp) = &it.risk_proof else {
            missing += 1;
            items_out.push(json!({
                "position_id": it.position_id,
                "underlying": "unknown",
                "expiry_utc": it.expiry_utc,
                "market_exposure_type": "UNDEFINED_RISK",
                "max_loss_cents": null,
                "sources": {"order_plan_path": "", "order_plan_sha256": "0".repeat(64)},
                "notes": ["order_plan.v1.json not found for binding_hash (cannot prove defined risk)"],
            }));
            continue;
        };
        let proven = rp.get("defined_risk_proven").and_then(|v| v.as_bool()).unwrap_or(false);
        if !proven {
            missing += 1;
            items_out.push(json!({
                "position_id": it.position_id,
                "underlying": it.underlying,
                "expiry_utc": it.expiry_utc,
                "market_exposure_type": "UNDEFINED_RISK",
                "max_loss_cents": null,
                "sources": {"order_plan_path": it.order_plan_path, "order_plan_sha256": it.order_plan_sha256},
                "notes": ["risk_proof.defined_risk_proven != true"],
            }));
            continue;
        }
        let max_loss_usd = rp.get("max_loss_usd").and_then(|v| v.as_str()).unwrap_or("");
        let cents = usd_to_cents_strict(max_loss_usd)
            .map_err(|e| KernelError::new("DEFINED_RISK_MAX_LOSS_USD_INVALID", format!("{e}: position_id={}", it.position_id)))?;
        items_out.push(json!({
            "position_id": it.position_id,
            "underlying": it.underlying,
            "expiry_utc": it.expiry_utc,
            "market_exposure_type": "DEFINED_RISK",
            "max_loss_cents": cents,
            "sources": {"order_plan_path": it.order_plan_path, "order_plan_sha256": it.order_plan_sha256},
            "notes": ["max_loss_cents derived from order_plan.risk_proof.max_loss_usd (deterministic)"],
        }));
    }

    let (status, reason_codes): (&str, Vec<&str>) = if missing > 0 {
        ("DEGRADED_PARTIAL_DEFINED_RISK", vec!["DEFINED_RISK_FROM_ORDER_PLAN_RISK_PROOF_V1", "MISSING_DEFINED_RISK_FOR_SOME_POSITIONS"])
    } else {
        ("OK", vec!["DEFINED_RISK_FROM_ORDER_PLAN_RISK_PROOF_V1"])
    };

    let mut obj = json!({
        "schema_id": "defined_risk_snapshot",
        "schema_version": "v1",
        "produced_utc": produced_utc,
        "day_utc": day_utc,
        "producer": {"repo": producer.repo, "git_sha": producer.git_sha, "module": producer.module},
        "status": status,
        "reason_codes": reason_codes,
        "canonical_json_hash": null,
    });
    obj["input_manifest"] = json!({
        "positions_effective_pointer": {"path": pointer.path, "sha256": pointer.sha256},
        "item_count": items.len(),
    });
    obj["defined_risk"] = json!({
        "currency": "USD",
        "asof_utc": produced_utc,
        "items": items_out,
        "notes": ["max_loss_cents is emitted only when order_plan.risk_proof.defined_risk_proven is true"],
    });
    self_hash_and_validate(kernel, "defined_risk_snapshot.v1", obj)
}
