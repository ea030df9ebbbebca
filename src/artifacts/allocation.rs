//! AllocationGate: per-intent capital allocation decisions plus the daily
//! summary and mutable latest-pointer.
//!
//! Grounded on spec.md §4.11 and `constellation_2/phaseG/allocation`'s
//! drawdown-scaled engine caps. Each engine carries a static ceiling on
//! `target_notional_pct`; that ceiling is scaled down as the book's
//! drawdown deepens, and an EXIT intent (`target_notional_pct == 0`) is
//! always allowed regardless of drawdown or cap — closing risk is never the
//! thing this gate blocks.

use rust_decimal::Decimal;
use serde_json::json;

use crate::canon_hash::inject_self_hash;
use crate::decimal_codec;
use crate::error::{KernelError, KernelResult};
use crate::kernel::{Kernel, ProducerIdentity};
use crate::reason_codes::*;

const DRAWDOWN_CONTRACT_ID: &str = "C2_DRAWDOWN_CONVENTION_V1";

fn drawdown_thresholds() -> serde_json::Value {
    json!([
        {"drawdown_pct": "0.000000", "multiplier": "1.00"},
        {"drawdown_pct": "-0.050000", "multiplier": "0.75"},
        {"drawdown_pct": "-0.100000", "multiplier": "0.50"},
        {"drawdown_pct": "-0.150000", "multiplier": "0.25"},
    ])
}

fn static_cap_for(engine_id: &str) -> Option<Decimal> {
    match engine_id {
        "TREND" => Some(Decimal::new(40, 2)),
        "VOL_INCOME" => Some(Decimal::new(40, 2)),
        "MEAN_REVERSION" => Some(Decimal::new(20, 2)),
        _ => None,
    }
}

/// `dd` is a drawdown fraction, negative or zero (e.g. `-0.12` for a 12%
/// drawdown). Deeper drawdowns scale the cap down further.
fn drawdown_multiplier(dd: Decimal) -> Decimal {
    if dd <= Decimal::new(-15, 2) {
        Decimal::new(25, 2)
    } else if dd <= Decimal::new(-10, 2) {
        Decimal::new(50, 2)
    } else if dd <= Decimal::new(-5, 2) {
        Decimal::new(75, 2)
    } else {
        Decimal::new(100, 2)
    }
}

#[derive(Debug, Clone)]
pub enum AllocationVerdict {
    Allow { effective_cap_pct: String, reason_code: &'static str },
    Block { reason_code: &'static str, detail: String },
}

/// `accounting_ok` reflects whether the day's NAV/exposure artifacts were
/// produced without a hard failure; `drawdown_pct` comes from
/// `AccountingNav.history.drawdown_pct` negated into a signed fraction
/// (0 or negative). `target_notional_pct` is the intent's requested
/// allocation as a fraction of NAV.
pub fn evaluate_intent(
    accounting_ok: bool,
    drawdown_pct: Decimal,
    engine_id: &str,
    target_notional_pct: Decimal,
) -> AllocationVerdict {
    if !accounting_ok {
        return AllocationVerdict::Block {
            reason_code: G_BLOCK_ACCOUNTING_NOT_OK,
            detail: "accounting artifacts for this day are not OK".to_string(),
        };
    }
    if target_notional_pct.is_zero() {
        return AllocationVerdict::Allow {
            effective_cap_pct: "0.000000".to_string(),
            reason_code: G_EXIT_INTENT_ALWAYS_ALLOWED_V2,
        };
    }
    let Some(cap) = static_cap_for(engine_id) else {
        return AllocationVerdict::Block {
            reason_code: G_ENGINE_NOT_ALLOCATED,
            detail: format!("no static cap configured for engine_id={engine_id}"),
        };
    };
    let multiplier = drawdown_multiplier(drawdown_pct);
    let effective_cap = cap * multiplier;
    let effective_cap_pct = match decimal_codec::format_6dp(effective_cap, "effective_cap_pct") {
        Ok(s) => s,
        Err(e) => return AllocationVerdict::Block { reason_code: e.reason_code, detail: e.detail },
    };
    if target_notional_pct > effective_cap {
        return AllocationVerdict::Block {
            reason_code: G_INTENT_EXCEEDS_ENGINE_CAP,
            detail: format!("target_notional_pct {target_notional_pct} exceeds effective cap {effective_cap} (static {cap} x drawdown multiplier {multiplier})"),
        };
    }
    AllocationVerdict::Allow { effective_cap_pct, reason_code: "WITHIN_CAP" }
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

fn envelope(
    schema_id: &str,
    producer: &ProducerIdentity,
    produced_utc: &str,
    day_utc: &str,
    status: &str,
    reason_codes: &[&str],
) -> serde_json::Value {
    json!({
        "schema_id": schema_id,
        "schema_version": "v1",
        "produced_utc": produced_utc,
        "day_utc": day_utc,
        "producer": {"repo": producer.repo, "git_sha": producer.git_sha, "module": producer.module},
        "status": status,
        "reason_codes": reason_codes,
        "canonical_json_hash": null,
    })
}

pub fn build_decision(
    kernel: &Kernel,
    producer: &ProducerIdentity,
    produced_utc: &str,
    day_utc: &str,
    intent_id: &str,
    engine_id: &str,
    target_notional_pct: &str,
    verdict: &AllocationVerdict,
) -> KernelResult<(serde_json::Value, String)> {
    let (status, reason_codes, decision) = match verdict {
        AllocationVerdict::Allow { effective_cap_pct, reason_code } => (
            "ALLOW",
            vec![*reason_code],
            json!({"verdict": "ALLOW", "effective_cap_pct": effective_cap_pct}),
        ),
        AllocationVerdict::Block { reason_code, detail } => (
            "BLOCK",
            vec![*reason_code],
            json!({"verdict": "BLOCK", "detail": detail}),
        ),
    };
    let mut obj = envelope("allocation_decision", producer, produced_utc, day_utc, status, &reason_codes);
    obj["input_manifest"] = json!({"intent_id": intent_id, "engine_id": engine_id, "target_notional_pct": target_notional_pct});
    obj["decision"] = decision;
    self_hash_and_validate(kernel, "allocation_decision.v1", obj)
}

/// The NAV facts a day's `AllocationSummary.drawdown_enforcement` block is
/// derived from, read straight off that day's written `AccountingNav`
/// artifact rather than re-derived — the summary attests to the NAV file it
/// actually consulted, not to a value recomputed behind its back.
#[derive(Debug, Clone)]
pub struct DrawdownEnforcementInput {
    pub nav_source_path: String,
    pub nav_source_sha256: String,
    pub nav_asof_day_utc: String,
    pub rolling_peak_nav_usd: String,
    pub nav_total_usd: String,
    pub drawdown_abs_usd: String,
    pub drawdown_pct: String,
}

pub fn build_summary(
    kernel: &Kernel,
    producer: &ProducerIdentity,
    produced_utc: &str,
    day_utc: &str,
    allowed_count: u32,
    blocked_count: u32,
    drawdown: &DrawdownEnforcementInput,
) -> KernelResult<(serde_json::Value, String)> {
    let dd: Decimal = drawdown
        .drawdown_pct
        .parse()
        .map_err(|_| KernelError::new("G_DRAWDOWN_PCT_NOT_DECIMAL", format!("drawdown_pct={}", drawdown.drawdown_pct)))?;
    let multiplier = decimal_codec::format_2dp(drawdown_multiplier(dd), "multiplier")?;

    let mut obj = envelope("allocation_summary", producer, produced_utc, day_utc, "OK", &[]);
    obj["input_manifest"] = json!({"decision_count": allowed_count + blocked_count, "nav_source_path": drawdown.nav_source_path, "nav_source_sha256": drawdown.nav_source_sha256});
    obj["summary"] = json!({
        "allowed_count": allowed_count,
        "blocked_count": blocked_count,
        "drawdown_enforcement": {
            "contract_id": DRAWDOWN_CONTRACT_ID,
            "nav_source_path": drawdown.nav_source_path,
            "nav_source_sha256": drawdown.nav_source_sha256,
            "nav_asof_day_utc": drawdown.nav_asof_day_utc,
            "rolling_peak_nav": drawdown.rolling_peak_nav_usd,
            "nav_total": drawdown.nav_total_usd,
            "drawdown_abs": drawdown.drawdown_abs_usd,
            "drawdown_pct": drawdown.drawdown_pct,
            "multiplier": multiplier,
            "thresholds": drawdown_thresholds(),
        },
    });
    self_hash_and_validate(kernel, "allocation_summary.v1", obj)
}

pub fn build_failure(
    kernel: &Kernel,
    producer: &ProducerIdentity,
    produced_utc: &str,
    day_utc: &str,
    reason_code: &str,
    detail: &str,
) -> KernelResult<(serde_json::Value, String)> {
    let mut obj = envelope("allocation_failure", producer, produced_utc, day_utc, "FAILED", &[reason_code]);
    obj["input_manifest"] = json!({});
    obj["failure"] = json!({"reason_code": reason_code, "detail": detail});
    self_hash_and_validate(kernel, "allocation_failure.v1", obj)
}

/// Content for the mutable `allocation_v1/latest.json` pointer; the caller
/// writes it via `ImmutableStore::write_latest_pointer`, never `write_once`.
pub fn build_latest_pointer(
    kernel: &Kernel,
    producer: &ProducerIdentity,
    produced_utc: &str,
    day_utc: &str,
    summary_hash: &str,
) -> KernelResult<(serde_json::Value, String)> {
    let mut obj = envelope("allocation_latest_pointer", producer, produced_utc, day_utc, "OK", &[]);
    obj["pointers"] = json!({"summary_hash": summary_hash, "day_utc": day_utc});
    self_hash_and_validate(kernel, "allocation_latest_pointer.v1", obj)
}
