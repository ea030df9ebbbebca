//! End-to-end scenarios strung across multiple pipeline stages, the way
//! `backtest_run_integration.rs` exercises the orchestrator directly rather
//! than shelling out to a built binary.

use rust_decimal_macros::dec;
use serde_json::json;
use tempfile::tempdir;

use artifact_kernel::artifacts::allocation::{evaluate_intent, AllocationVerdict};
use artifact_kernel::artifacts::binding::{build_binding_record, ib_bag_order_v1_digest, BrokerLeg};
use artifact_kernel::artifacts::mapper::map_vertical_spread;
use artifact_kernel::artifacts::preflight::evaluate_options;
use artifact_kernel::artifacts::risk_budget::{self, RiskBudgetDecision};
use artifact_kernel::artifacts::submit::{self, LineageFields, SubmitOutcome};
use artifact_kernel::broker::{BrokerAdapter, SubmitResult, WhatIfResult};
use artifact_kernel::canon_hash::hash_for_artifact;
use artifact_kernel::kernel::{Kernel, ProducerIdentity};
use artifact_kernel::reason_codes::*;
use artifact_kernel::timestamp::UtcZ;

fn kernel(root: &std::path::Path) -> Kernel {
    std::fs::create_dir_all(root.join("schemas")).unwrap();
    let schema_src = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("schemas");
    for entry in std::fs::read_dir(schema_src).unwrap() {
        let entry = entry.unwrap();
        std::fs::copy(entry.path(), root.join("schemas").join(entry.file_name())).unwrap();
    }
    Kernel::new(root, ProducerIdentity { repo: "artifact-kernel".into(), git_sha: "deadbeef".into(), module: "integration".into() })
}

fn sample_intent() -> serde_json::Value {
    json!({
        "schema_id": "options_intent", "schema_version": "v2",
        "engine": {"suite": "C2_OPTIONS_7", "engine_id": "C2_VOL_INCOME_DEFINED_RISK_V1"},
        "strategy": {"structure": "VERTICAL_SPREAD", "right": "PUT", "direction": "CREDIT"},
        "selection_policy": {
            "expiry_policy": {"mode": "DTE_WINDOW", "dte_min": 0, "dte_max": 10},
            "width_policy": {"width": "5.00"},
            "liquidity_policy": {"min_oi": 1, "min_volume": 1, "max_spread": "1.00"},
            "pricing_policy": {"limit_offset": "0.05", "tick_rounding": "ROUND_DOWN"},
        },
        "risk": {"multiplier": 100, "contracts": 1},
        "exit_policy": {"policy_id": "EXIT_V1"},
    })
}

fn sample_chain() -> serde_json::Value {
    json!({
        "schema_id": "options_chain_snapshot", "schema_version": "v1",
        "as_of_utc": "2026-02-13T21:52:00Z",
        "underlying": {"symbol": "SPY", "spot_price": "500.00"},
        "contracts": [
            {"contract_key": "SPY-20260220-P-495", "expiry_utc": "2026-02-20T21:00:00Z", "right": "P", "strike": "495.00", "bid": "2.00", "ask": "2.10", "open_interest": 100, "volume": 50, "ib_conId": 1, "ib_localSymbol": "SPY P495"},
            {"contract_key": "SPY-20260220-P-490", "expiry_utc": "2026-02-20T21:00:00Z", "right": "P", "strike": "490.00", "bid": "1.00", "ask": "1.10", "open_interest": 100, "volume": 50, "ib_conId": 2, "ib_localSymbol": "SPY P490"},
        ],
    })
}

fn sample_cert(chain_hash: &str) -> serde_json::Value {
    json!({
        "schema_id": "freshness_certificate", "schema_version": "v1",
        "issued_at_utc": "2026-02-13T21:52:00Z",
        "valid_from_utc": "2026-02-13T21:52:00Z",
        "valid_until_utc": "2026-02-13T21:55:00Z",
        "snapshot_hash": chain_hash,
        "snapshot_as_of_utc": "2026-02-13T21:52:00Z",
    })
}

/// S1 — mapping determinism across two independent invocations.
#[test]
fn s1_mapping_is_deterministic_across_independent_invocations() {
    let dir = tempdir().unwrap();
    let k = kernel(dir.path());
    let chain = sample_chain();
    let chain_hash = hash_for_artifact(&chain).unwrap();
    let cert = sample_cert(&chain_hash);
    let intent = sample_intent();
    let now = UtcZ::parse("2026-02-13T21:52:00Z").unwrap();

    let r1 = map_vertical_spread(&k, &intent, &chain, &cert, &now, "0.01").unwrap();
    let r2 = map_vertical_spread(&k, &intent, &chain, &cert, &now, "0.01").unwrap();

    assert_eq!(r1.order_plan["canonical_json_hash"], r2.order_plan["canonical_json_hash"]);
    assert_eq!(r1.mapping_ledger_record["canonical_json_hash"], r2.mapping_ledger_record["canonical_json_hash"]);
    assert_eq!(r1.binding_record["canonical_json_hash"], r2.binding_record["canonical_json_hash"]);
}

/// S2 — a now_utc outside the certificate's validity window produces a
/// freshness veto and no order_plan/mapping_ledger/binding_record at all.
#[test]
fn s2_freshness_veto_outside_cert_window() {
    let dir = tempdir().unwrap();
    let k = kernel(dir.path());
    let chain = sample_chain();
    let chain_hash = hash_for_artifact(&chain).unwrap();
    let cert = sample_cert(&chain_hash);
    let intent = sample_intent();
    let now = UtcZ::parse("2026-02-13T22:00:00Z").unwrap();

    let err = map_vertical_spread(&k, &intent, &chain, &cert, &now, "0.01").unwrap_err();
    assert_eq!(err.reason_code, C2_FRESHNESS_CERT_INVALID_OR_EXPIRED);
}

/// S3 — a RiskBudget breach at the submit boundary blocks before any
/// broker_submission_record is written.
#[test]
fn s3_risk_budget_breach_blocks_submission() {
    let dir = tempdir().unwrap();
    let k = kernel(dir.path());
    let rb = json!({"schema_id": "risk_budget", "schema_version": "v1", "max_margin_usd": "1000", "max_notional_usd": "100000"});
    let whatif = WhatIfResult { margin_change_usd: "999999".into(), notional_usd: "1000".into() };
    match risk_budget::evaluate(&k, &rb, &whatif, None, None).unwrap() {
        RiskBudgetDecision::Block { reason_code, .. } => assert_eq!(reason_code, C2_RISK_BUDGET_EXCEEDED),
        RiskBudgetDecision::Allow => panic!("expected block"),
    }
}

/// S4 — a full mapper → preflight → submit chain derives
/// `submission_id == binding_record.canonical_json_hash`, and resubmitting
/// the identical identity set is a hard idempotency failure, not a veto.
struct ScriptedBroker {
    whatif: WhatIfResult,
    submit: SubmitResult,
}

impl BrokerAdapter for ScriptedBroker {
    fn connect(&mut self) -> artifact_kernel::error::KernelResult<()> {
        Ok(())
    }
    fn disconnect(&mut self) -> artifact_kernel::error::KernelResult<()> {
        Ok(())
    }
    fn whatif_order(&mut self, _order_plan: &serde_json::Value) -> artifact_kernel::error::KernelResult<WhatIfResult> {
        Ok(self.whatif.clone())
    }
    fn submit_order(&mut self, _order_plan: &serde_json::Value) -> artifact_kernel::error::KernelResult<SubmitResult> {
        Ok(self.submit.clone())
    }
    fn cancel_order(&mut self, _order_id: &str) -> artifact_kernel::error::KernelResult<()> {
        Ok(())
    }
}

#[test]
fn s4_submission_id_derivation_and_duplicate_hard_fail() {
    let dir = tempdir().unwrap();
    let k = kernel(dir.path());
    let chain = sample_chain();
    let chain_hash = hash_for_artifact(&chain).unwrap();
    let cert = sample_cert(&chain_hash);
    let intent = sample_intent();
    let now = UtcZ::parse("2026-02-13T21:52:00Z").unwrap();

    let mapped = map_vertical_spread(&k, &intent, &chain, &cert, &now, "0.01").unwrap();
    let decision =
        evaluate_options(&k, &intent, &chain, &cert, &mapped.order_plan, &mapped.mapping_ledger_record, &mapped.binding_record, &now).unwrap();
    assert_eq!(decision["decision"], json!("ALLOW"));

    let binding_hash = hash_for_artifact(&mapped.binding_record).unwrap();
    assert_eq!(binding_hash.len(), 64);
    assert!(binding_hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

    let rb = json!({"schema_id": "risk_budget", "schema_version": "v1", "max_margin_usd": "1000", "max_notional_usd": "100000"});
    let lineage = LineageFields { engine_id: "E1".into(), source_intent_id: "I1".into(), intent_sha256: "abc".into() };
    let mk_broker = || ScriptedBroker {
        whatif: WhatIfResult { margin_change_usd: "10".into(), notional_usd: "100".into() },
        submit: SubmitResult {
            ok: true,
            status: "FILLED".into(),
            order_id: Some("OID1".into()),
            perm_id: Some("PID1".into()),
            error_code: None,
            error_message: None,
            filled_qty: 1,
            avg_price: Some("0.40".into()),
        },
    };

    let mut b1 = mk_broker();
    let outcome1 =
        submit::run(&k, &mut b1, &now, "2026-02-13", &mapped.order_plan, &mapped.mapping_ledger_record, &mapped.binding_record, &rb, &lineage, "PAPER").unwrap();
    let submission_id = match outcome1 {
        SubmitOutcome::Submission { broker_submission, execution_event } => {
            assert!(execution_event.is_some());
            broker_submission["submission_id"].as_str().unwrap().to_string()
        }
        SubmitOutcome::Veto(v) => panic!("unexpected veto: {} {}", v.reason_code, v.reason_detail),
    };
    assert_eq!(submission_id, binding_hash);

    let mut b2 = mk_broker();
    let err =
        submit::run(&k, &mut b2, &now, "2026-02-13", &mapped.order_plan, &mapped.mapping_ledger_record, &mapped.binding_record, &rb, &lineage, "PAPER")
            .unwrap_err();
    assert_eq!(err.reason_code, C2_IDEMPOTENCY_DUPLICATE_SUBMISSION);
}

/// S5 — an EXIT intent (target_notional_pct == 0) is always allowed even
/// when the day's accounting is not OK.
#[test]
fn s5_exit_allocation_allowed_under_degraded_accounting() {
    let verdict = evaluate_intent(false, dec!(-0.30), "TREND", dec!(0));
    match verdict {
        AllocationVerdict::Allow { reason_code, .. } => assert_eq!(reason_code, G_EXIT_INTENT_ALWAYS_ALLOWED_V2),
        AllocationVerdict::Block { .. } => panic!("exit intents must always be allowed"),
    }
}

/// S6 — the drawdown multiplier table at the five spec-named breakpoints.
#[test]
fn s6_drawdown_multiplier_table_breakpoints() {
    let cases = [
        (dec!(0.000000), dec!(1.00)),
        (dec!(-0.050000), dec!(0.75)),
        (dec!(-0.100000), dec!(0.50)),
        (dec!(-0.150000), dec!(0.25)),
        (dec!(-0.200000), dec!(0.25)),
    ];
    for (drawdown, expected_multiplier) in cases {
        // TREND's static cap is 0.40; effective cap = cap * multiplier.
        let verdict = evaluate_intent(true, drawdown, "TREND", dec!(0.40) * expected_multiplier);
        match verdict {
            AllocationVerdict::Allow { effective_cap_pct, .. } => {
                let expected = dec!(0.40) * expected_multiplier;
                assert_eq!(effective_cap_pct.parse::<rust_decimal::Decimal>().unwrap(), expected);
            }
            AllocationVerdict::Block { reason_code, detail } => panic!("expected allow at drawdown {drawdown}: {reason_code} {detail}"),
        }
    }
}

/// Full bundle reconstruction: the broker payload digest the Mapper embeds
/// in BindingRecord must match a digest independently recomputed from the
/// same leg data — this is exactly what SubmitBoundary re-verifies.
#[test]
fn binding_digest_is_reproducible_from_order_plan_legs() {
    let legs = vec![BrokerLeg { con_id: 1, action: "SELL".into(), ratio: 1 }, BrokerLeg { con_id: 2, action: "BUY".into(), ratio: 1 }];
    let (_payload_a, digest_a) = ib_bag_order_v1_digest("SPY", "VERTICAL_SPREAD", "LIMIT", "1.20", "DAY", &legs).unwrap();
    let (_payload_b, digest_b) = ib_bag_order_v1_digest("SPY", "VERTICAL_SPREAD", "LIMIT", "1.20", "DAY", &legs).unwrap();
    assert_eq!(digest_a, digest_b);
    let (binding, _hash) = build_binding_record("plan_hash", "mapping_ledger_hash", Some("cert_hash"), &digest_a, "IB_BAG_ORDER_V1").unwrap();
    assert_eq!(binding["broker_payload_digest"]["digest_sha256"], json!(digest_a));
}
