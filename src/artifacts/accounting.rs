//! AccountingAggregator: NAV, exposure, and attribution bookkeeping for a
//! day's closed books, plus the fail-closed `AccountingFailure` artifact.
//! Deliberately has no mutable latest-pointer — grounded on
//! `run_accounting_day_v1.py`'s own design note that a global
//! `accounting_v1/latest.json` is incompatible with strict no-overwrite
//! invariants (see DESIGN.md).
//!
//! Grounded on spec.md §4.10 and `constellation_2/phaseF/accounting`'s split
//! between NAV/exposure/attribution as independently-producible artifacts
//! sharing one `input_manifest`/`status`/`reason_codes` envelope. The
//! cents-to-dollars conversion stays strict end to end (Open Question (c)):
//! any amount that isn't an exact multiple of 100 cents fails closed with
//! `CENTS_NOT_DIVISIBLE_BY_100` rather than rounding silently.

use std::collections::BTreeMap;

use serde_json::json;

use crate::canon_hash::inject_self_hash;
use crate::decimal_codec;
use crate::error::{KernelError, KernelResult};
use crate::kernel::{Kernel, ProducerIdentity};
use crate::reason_codes::CENTS_NOT_DIVISIBLE_BY_100;

fn dollars_from_cents_strict(cents: i64, field: &str) -> KernelResult<String> {
    if cents % 100 != 0 {
        return Err(KernelError::new(CENTS_NOT_DIVISIBLE_BY_100, format!("{field}={cents}")));
    }
    Ok(format!("{}.00", cents / 100))
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

#[derive(Debug, Clone)]
pub struct CashComponent {
    pub label: String,
    pub amount_cents: i64,
}

/// Builds `AccountingNav v1`. `prior_peak_nav_cents` is the prior trading
/// day's recorded peak; `None` bootstraps the peak at today's NAV (zero
/// drawdown on day one). This kernel carries no mark-to-market input —
/// `nav_total` is always `cash_total` — so the NAV is unconditionally a
/// cash-only bootstrap, flagged `DEGRADED`/`DEGRADED_MISSING_MARKS` rather
/// than `OK`.
pub fn build_nav(
    kernel: &Kernel,
    producer: &ProducerIdentity,
    produced_utc: &str,
    day_utc: &str,
    components: &[CashComponent],
    prior_peak_nav_cents: Option<i64>,
) -> KernelResult<(serde_json::Value, String)> {
    let cash_total_cents: i64 = components.iter().map(|c| c.amount_cents).sum();
    let nav_total = dollars_from_cents_strict(cash_total_cents, "nav_total")?;
    let cash_total = dollars_from_cents_strict(cash_total_cents, "cash_total")?;

    let peak_cents = prior_peak_nav_cents.unwrap_or(cash_total_cents).max(cash_total_cents);
    let peak_nav = dollars_from_cents_strict(peak_cents, "peak_nav")?;
    let drawdown_abs_cents = peak_cents - cash_total_cents;
    let drawdown_abs = dollars_from_cents_strict(drawdown_abs_cents, "drawdown_abs")?;
    let drawdown_pct = if peak_cents == 0 {
        "0.000000".to_string()
    } else {
        let pct = rust_decimal::Decimal::from(drawdown_abs_cents) / rust_decimal::Decimal::from(peak_cents);
        decimal_codec::format_6dp(pct, "drawdown_pct")?
    };

    let mut obj = envelope("accounting_nav", producer, produced_utc, day_utc, "DEGRADED", &["DEGRADED_MISSING_MARKS"]);
    obj["input_manifest"] = json!({"components": components.iter().map(|c| json!({"label": c.label, "amount_cents": c.amount_cents})).collect::<Vec<_>>()});
    obj["nav"] = json!({
        "nav_total_usd": nav_total,
        "cash_total_usd": cash_total,
        "components": [
            {"kind": "CASH", "symbol": "USD", "qty": cash_total, "mv": cash_total, "mark": {"source": "CASH_LEDGER", "as_of_utc": produced_utc}},
        ],
    });
    obj["history"] = json!({"peak_nav_usd": peak_nav, "drawdown_abs_usd": drawdown_abs, "drawdown_pct": drawdown_pct});
    self_hash_and_validate(kernel, "accounting_nav.v1", obj)
}

#[derive(Debug, Clone)]
pub struct DefinedRiskItem {
    pub underlying: String,
    pub expiry_utc: String,
    pub max_loss_cents: i64,
}

fn expiry_bucket(expiry_utc: &str) -> String {
    expiry_utc.get(0..7).unwrap_or(expiry_utc).to_string()
}

/// Builds `AccountingExposure v1`, aggregating defined-risk max-loss by
/// underlying and by expiry month bucket. An empty `items` slice (no
/// defined-risk snapshot available yet) produces a degraded, still-valid
/// artifact flagged `EXPOSURE_BOOTSTRAP_DEFINED_RISK_UNKNOWN` rather than a
/// hard failure.
pub fn build_exposure(
    kernel: &Kernel,
    producer: &ProducerIdentity,
    produced_utc: &str,
    day_utc: &str,
    items: &[DefinedRiskItem],
) -> KernelResult<(serde_json::Value, String)> {
    let mut by_underlying: BTreeMap<String, i64> = BTreeMap::new();
    let mut by_bucket: BTreeMap<String, i64> = BTreeMap::new();
    for item in items {
        *by_underlying.entry(item.underlying.clone()).or_insert(0) += item.max_loss_cents;
        *by_bucket.entry(expiry_bucket(&item.expiry_utc)).or_insert(0) += item.max_loss_cents;
    }

    let status = if items.is_empty() { "DEGRADED" } else { "OK" };
    let reason_codes: Vec<&str> = if items.is_empty() { vec!["EXPOSURE_BOOTSTRAP_DEFINED_RISK_UNKNOWN"] } else { vec![] };
    let mut obj = envelope("accounting_exposure", producer, produced_utc, day_utc, status, &reason_codes);
    obj["input_manifest"] = json!({"defined_risk_item_count": items.len()});

    let mut by_underlying_rows = Vec::new();
    for (k, cents) in &by_underlying {
        by_underlying_rows.push(json!({"underlying": k, "total_max_loss_usd": dollars_from_cents_strict(*cents, "total_max_loss_usd")?}));
    }
    let mut by_bucket_rows = Vec::new();
    for (k, cents) in &by_bucket {
        by_bucket_rows.push(json!({"bucket": k, "total_max_loss_usd": dollars_from_cents_strict(*cents, "total_max_loss_usd")?}));
    }
    obj["exposure"] = json!({"by_underlying": by_underlying_rows, "by_expiry_bucket": by_bucket_rows});
    self_hash_and_validate(kernel, "accounting_exposure.v1", obj)
}

#[derive(Debug, Clone)]
pub struct EngineAttribution {
    pub engine_id: String,
    pub realized_pnl_cents: i64,
    pub unrealized_pnl_cents: i64,
    pub defined_risk_exposure_cents: i64,
    pub positions_count: u32,
    pub symbols: Vec<String>,
}

pub fn build_attribution(
    kernel: &Kernel,
    producer: &ProducerIdentity,
    produced_utc: &str,
    day_utc: &str,
    rows: &[EngineAttribution],
) -> KernelResult<(serde_json::Value, String)> {
    let mut sorted: Vec<&EngineAttribution> = rows.iter().collect();
    sorted.sort_by(|a, b| a.engine_id.cmp(&b.engine_id));

    let mut obj = envelope("accounting_attribution", producer, produced_utc, day_utc, "OK", &[]);
    obj["input_manifest"] = json!({"engine_count": rows.len()});

    let mut engine_rows = Vec::with_capacity(sorted.len());
    for r in sorted {
        let mut symbols = r.symbols.clone();
        symbols.sort();
        engine_rows.push(json!({
            "engine_id": r.engine_id,
            "realized_pnl_usd": dollars_from_cents_strict(r.realized_pnl_cents, "realized_pnl_usd")?,
            "unrealized_pnl_usd": dollars_from_cents_strict(r.unrealized_pnl_cents, "unrealized_pnl_usd")?,
            "defined_risk_exposure_usd": dollars_from_cents_strict(r.defined_risk_exposure_cents, "defined_risk_exposure_usd")?,
            "positions_count": r.positions_count,
            "symbols": symbols,
        }));
    }
    obj["attribution"] = json!({"by_engine": engine_rows});
    self_hash_and_validate(kernel, "accounting_attribution.v1", obj)
}

pub fn build_failure(
    kernel: &Kernel,
    producer: &ProducerIdentity,
    produced_utc: &str,
    day_utc: &str,
    reason_code: &str,
    detail: &str,
) -> KernelResult<(serde_json::Value, String)> {
    let mut obj = envelope("accounting_failure", producer, produced_utc, day_utc, "FAILED", &[reason_code]);
    obj["input_manifest"] = json!({});
    obj["failure"] = json!({"reason_code": reason_code, "detail": detail});
    self_hash_and_validate(kernel, "accounting_failure.v1", obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn kernel(root: &std::path::Path) -> Kernel {
        std::fs::create_dir_all(root.join("schemas")).unwrap();
        for entry in std::fs::read_dir(concat!(env!("CARGO_MANIFEST_DIR"), "/schemas")).unwrap() {
            let entry = entry.unwrap();
            std::fs::copy(entry.path(), root.join("schemas").join(entry.file_name())).unwrap();
        }
        Kernel::new(root, ProducerIdentity { repo: "r".into(), git_sha: "sha".into(), module: "accounting".into() })
    }

    fn producer() -> ProducerIdentity {
        ProducerIdentity { repo: "r".into(), git_sha: "sha".into(), module: "accounting".into() }
    }

    #[test]
    fn nav_bootstraps_peak_with_zero_drawdown_on_day_one() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let components = vec![CashComponent { label: "cash".into(), amount_cents: 1_000_000 }];
        let (nav, _) = build_nav(&k, &producer(), "2026-02-13T21:05:00Z", "2026-02-13", &components, None).unwrap();
        assert_eq!(nav["nav"]["nav_total_usd"], json!("10000.00"));
        assert_eq!(nav["nav"]["components"], json!([{"kind": "CASH", "symbol": "USD", "qty": "10000.00", "mv": "10000.00", "mark": {"source": "CASH_LEDGER", "as_of_utc": "2026-02-13T21:05:00Z"}}]));
        assert_eq!(nav["history"]["drawdown_pct"], json!("0.000000"));
        assert_eq!(nav["status"], json!("DEGRADED"));
        assert_eq!(nav["reason_codes"], json!(["DEGRADED_MISSING_MARKS"]));
    }

    #[test]
    fn nav_flags_drawdown_against_prior_peak() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let components = vec![CashComponent { label: "cash".into(), amount_cents: 900_000 }];
        let (nav, _) = build_nav(&k, &producer(), "2026-02-13T21:05:00Z", "2026-02-13", &components, Some(1_000_000)).unwrap();
        assert_eq!(nav["status"], json!("DEGRADED"));
        assert_eq!(nav["reason_codes"], json!(["DEGRADED_MISSING_MARKS"]));
        assert_eq!(nav["history"]["drawdown_pct"], json!("0.100000"));
    }

    #[test]
    fn nav_rejects_non_round_dollar_cents() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let components = vec![CashComponent { label: "cash".into(), amount_cents: 1_000_050 }];
        let err = build_nav(&k, &producer(), "2026-02-13T21:05:00Z", "2026-02-13", &components, None).unwrap_err();
        assert_eq!(err.reason_code, CENTS_NOT_DIVISIBLE_BY_100);
    }

    #[test]
    fn exposure_degrades_when_no_defined_risk_known() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let (exp, _) = build_exposure(&k, &producer(), "2026-02-13T21:05:00Z", "2026-02-13", &[]).unwrap();
        assert_eq!(exp["status"], json!("DEGRADED"));
        assert_eq!(exp["reason_codes"], json!(["EXPOSURE_BOOTSTRAP_DEFINED_RISK_UNKNOWN"]));
    }

    #[test]
    fn exposure_aggregates_by_underlying_and_bucket() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let items = vec![
            DefinedRiskItem { underlying: "SPY".into(), expiry_utc: "2026-02-20T21:00:00Z".into(), max_loss_cents: 100_00 },
            DefinedRiskItem { underlying: "SPY".into(), expiry_utc: "2026-02-20T21:00:00Z".into(), max_loss_cents: 50_00 },
        ];
        let (exp, _) = build_exposure(&k, &producer(), "2026-02-13T21:05:00Z", "2026-02-13", &items).unwrap();
        assert_eq!(exp["exposure"]["by_underlying"][0]["total_max_loss_usd"], json!("150.00"));
        assert_eq!(exp["exposure"]["by_expiry_bucket"][0]["bucket"], json!("2026-02"));
    }

    #[test]
    fn attribution_sorts_engines_and_symbols() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let rows = vec![
            EngineAttribution {
                engine_id: "TREND".into(),
                realized_pnl_cents: 1000,
                unrealized_pnl_cents: -500,
                defined_risk_exposure_cents: 20000,
                positions_count: 2,
                symbols: vec!["SPY".into(), "AAPL".into()],
            },
            EngineAttribution {
                engine_id: "MEAN_REVERSION".into(),
                realized_pnl_cents: 0,
                unrealized_pnl_cents: 0,
                defined_risk_exposure_cents: 0,
                positions_count: 0,
                symbols: vec![],
            },
        ];
        let (attr, _) = build_attribution(&k, &producer(), "2026-02-13T21:05:00Z", "2026-02-13", &rows).unwrap();
        let ids: Vec<&str> = attr["attribution"]["by_engine"].as_array().unwrap().iter().map(|e| e["engine_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["MEAN_REVERSION", "TREND"]);
        assert_eq!(attr["attribution"]["by_engine"][1]["symbols"], json!(["AAPL", "SPY"]));
    }
}
