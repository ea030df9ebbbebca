//! PreflightEvaluator: the last schema/hash-chain gate before a binding is
//! allowed to reach `SubmitBoundary`.
//!
//! Grounded on spec.md §4.6. Re-validates every artifact in the identity set
//! from scratch rather than trusting the Mapper's own self-hash — a
//! downstream stage never trusts an upstream artifact's internal claims
//! about itself. Options-mode preflight additionally re-checks the
//! freshness window and snapshot binding against the chain snapshot and
//! freshness certificate, the same pair the Mapper bound at mapping time
//! (see `mapper.rs`) — a binding that was fresh when mapped can still have
//! gone stale by the time it reaches preflight.

use serde_json::json;

use crate::canon_hash::{hash_for_artifact, inject_self_hash};
use crate::fail_closed::VetoInputs;
use crate::kernel::Kernel;
use crate::reason_codes::*;
use crate::timestamp::UtcZ;

pub struct PreflightError {
    pub reason_code: &'static str,
    pub reason_detail: String,
    pub partial_hashes: VetoInputs,
}

impl PreflightError {
    fn new(reason_code: &'static str, detail: impl Into<String>, partial: VetoInputs) -> Self {
        Self { reason_code, reason_detail: detail.into(), partial_hashes: partial }
    }
}

struct IdentitySet {
    intent_hash: String,
    plan_hash: String,
    binding_hash: String,
    partial: VetoInputs,
}

/// Schema-validates the identity set and re-derives/cross-checks its hash
/// chain: `plan.intent_hash == hash(intent)`, `mapping.plan_hash ==
/// hash(plan)`, `binding.plan_hash == hash(plan)`,
/// `binding.mapping_ledger_hash == hash(mapping)`. Shared by both the
/// options and equity evaluation paths — only the structure-specific
/// checks after it differ.
fn validate_identity_set(
    kernel: &Kernel,
    intent: &serde_json::Value,
    order_plan: &serde_json::Value,
    order_plan_schema: &str,
    mapping_ledger: &serde_json::Value,
    binding_record: &serde_json::Value,
) -> Result<IdentitySet, PreflightError> {
    let mut partial = VetoInputs::default();

    for (name, schema) in [
        (intent, "options_intent.v2"),
        (order_plan, order_plan_schema),
        (mapping_ledger, "mapping_ledger_record.v2"),
        (binding_record, "binding_record.v2"),
    ] {
        kernel.schema_registry.validate(schema, name).map_err(|e| PreflightError::new(C2_SUBMIT_FAIL_CLOSED_REQUIRED, e.to_string(), partial.clone()))?;
    }

    let intent_hash = hash_for_artifact(intent).map_err(|e| PreflightError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;
    let plan_hash = hash_for_artifact(order_plan).map_err(|e| PreflightError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;
    let mapping_hash = hash_for_artifact(mapping_ledger).map_err(|e| PreflightError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;
    let binding_hash = hash_for_artifact(binding_record).map_err(|e| PreflightError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;
    partial.intent_hash = Some(intent_hash.clone());
    partial.plan_hash = Some(plan_hash.clone());

    if order_plan.get("intent_hash").and_then(|v| v.as_str()) != Some(intent_hash.as_str()) {
        return Err(PreflightError::new(C2_LINEAGE_VIOLATION, "order_plan.intent_hash mismatch", partial));
    }
    if mapping_ledger.get("plan_hash").and_then(|v| v.as_str()) != Some(plan_hash.as_str()) {
        return Err(PreflightError::new(C2_LINEAGE_VIOLATION, "mapping_ledger.plan_hash mismatch", partial));
    }
    if binding_record.get("plan_hash").and_then(|v| v.as_str()) != Some(plan_hash.as_str()) {
        return Err(PreflightError::new(C2_LINEAGE_VIOLATION, "binding.plan_hash mismatch", partial));
    }
    if binding_record.get("mapping_ledger_hash").and_then(|v| v.as_str()) != Some(mapping_hash.as_str()) {
        return Err(PreflightError::new(C2_LINEAGE_VIOLATION, "binding.mapping_ledger_hash mismatch", partial));
    }

    Ok(IdentitySet { intent_hash, plan_hash, binding_hash, partial })
}

fn decision_artifact(kernel: &Kernel, binding_hash: &str, partial: &VetoInputs) -> Result<serde_json::Value, PreflightError> {
    let obj = json!({
        "schema_id": "submit_preflight_decision",
        "schema_version": "v1",
        "binding_hash": binding_hash,
        "decision": "ALLOW",
        "upstream_hash": binding_hash,
        "canonical_json_hash": null,
    });
    let (injected, _) = inject_self_hash(&obj, "canonical_json_hash")
        .map_err(|e| PreflightError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;
    kernel
        .schema_registry
        .validate("submit_preflight_decision.v1", &injected)
        .map_err(|e| PreflightError::new(C2_SUBMIT_FAIL_CLOSED_REQUIRED, e.to_string(), partial.clone()))?;
    Ok(injected)
}

/// Re-checks the freshness window and snapshot binding a chain snapshot and
/// freshness certificate present at mapping time. Grounded on the same
/// cross-checks `mapper.rs::map_vertical_spread` performs: the cert's bound
/// snapshot hash/as-of must still match the chain, and `now_utc` must still
/// fall inside the cert's validity window.
fn check_freshness(
    chain: &serde_json::Value,
    cert: &serde_json::Value,
    now_utc: &UtcZ,
    partial: &mut VetoInputs,
) -> Result<(), PreflightError> {
    let chain_hash = hash_for_artifact(chain).map_err(|e| PreflightError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;
    let cert_hash = hash_for_artifact(cert).map_err(|e| PreflightError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;
    partial.chain_snapshot_hash = Some(chain_hash.clone());
    partial.freshness_cert_hash = Some(cert_hash.clone());

    let cert_snapshot_hash = cert.get("snapshot_hash").and_then(|v| v.as_str()).unwrap_or("");
    let cert_snapshot_asof = cert.get("snapshot_as_of_utc").and_then(|v| v.as_str()).unwrap_or("");
    let chain_asof = chain.get("as_of_utc").and_then(|v| v.as_str()).unwrap_or("");
    if cert_snapshot_hash != chain_hash || cert_snapshot_asof != chain_asof {
        return Err(PreflightError::new(C2_FRESHNESS_CERT_INVALID_OR_EXPIRED, "snapshot binding mismatch", partial.clone()));
    }
    let valid_from = UtcZ::parse(cert.get("valid_from_utc").and_then(|v| v.as_str()).unwrap_or(""))
        .map_err(|e| PreflightError::new(C2_FRESHNESS_CERT_INVALID_OR_EXPIRED, e.to_string(), partial.clone()))?;
    let valid_until = UtcZ::parse(cert.get("valid_until_utc").and_then(|v| v.as_str()).unwrap_or(""))
        .map_err(|e| PreflightError::new(C2_FRESHNESS_CERT_INVALID_OR_EXPIRED, e.to_string(), partial.clone()))?;
    if *now_utc < valid_from || *now_utc > valid_until {
        return Err(PreflightError::new(C2_FRESHNESS_CERT_INVALID_OR_EXPIRED, "now outside validity window", partial.clone()));
    }
    Ok(())
}

/// Evaluates the identity set for an options (vertical spread) submission.
/// `chain`/`cert` are the chain snapshot and freshness certificate the
/// binding was originally mapped against — required in options mode so the
/// freshness window and snapshot binding can be re-checked one last time
/// before the order reaches the broker boundary. On success returns the
/// schema-valid `SubmitPreflightDecision`.
pub fn evaluate_options(
    kernel: &Kernel,
    intent: &serde_json::Value,
    chain: &serde_json::Value,
    cert: &serde_json::Value,
    order_plan: &serde_json::Value,
    mapping_ledger: &serde_json::Value,
    binding_record: &serde_json::Value,
    now_utc: &UtcZ,
) -> Result<serde_json::Value, PreflightError> {
    let identity = validate_identity_set(kernel, intent, order_plan, "order_plan.v1", mapping_ledger, binding_record)?;
    let mut partial = identity.partial;

    kernel.schema_registry.validate("options_chain_snapshot.v1", chain).map_err(|e| PreflightError::new(C2_SUBMIT_FAIL_CLOSED_REQUIRED, e.to_string(), partial.clone()))?;
    kernel.schema_registry.validate("freshness_certificate.v1", cert).map_err(|e| PreflightError::new(C2_FRESHNESS_CERT_INVALID_OR_EXPIRED, e.to_string(), partial.clone()))?;
    check_freshness(chain, cert, now_utc, &mut partial)?;

    let structure = intent.get("strategy").and_then(|s| s.get("structure")).and_then(|v| v.as_str()).unwrap_or("");
    if structure != "VERTICAL_SPREAD" {
        return Err(PreflightError::new(C2_OPTIONS_ONLY_VIOLATION, format!("unsupported structure: {structure}"), partial));
    }
    let legs = order_plan.get("legs").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    if legs.len() != 2 {
        return Err(PreflightError::new(C2_OPTIONS_ONLY_VIOLATION, "order_plan must have exactly 2 legs", partial));
    }
    let mut actions: Vec<&str> = legs.iter().filter_map(|l| l.get("action").and_then(|v| v.as_str())).collect();
    actions.sort_unstable();
    if actions != ["BUY", "SELL"] {
        return Err(PreflightError::new(C2_OPTIONS_ONLY_VIOLATION, "leg action set must be {BUY,SELL}", partial));
    }
    if intent.get("exit_policy").and_then(|e| e.get("policy_id")).and_then(|v| v.as_str()).is_none() {
        return Err(PreflightError::new(C2_EXIT_POLICY_REQUIRED, "exit_policy.policy_id missing", partial));
    }

    decision_artifact(kernel, &identity.binding_hash, &partial)
}

/// Evaluates the identity set for an equity-spot submission. Equity orders
/// carry no chain snapshot or freshness certificate — there is no options
/// chain to go stale — so this path skips `check_freshness` entirely and
/// validates `order_plan` against `equity_order_plan.v2` instead.
pub fn evaluate_equity(
    kernel: &Kernel,
    intent: &serde_json::Value,
    order_plan: &serde_json::Value,
    mapping_ledger: &serde_json::Value,
    binding_record: &serde_json::Value,
) -> Result<serde_json::Value, PreflightError> {
    let identity = validate_identity_set(kernel, intent, order_plan, "equity_order_plan.v2", mapping_ledger, binding_record)?;
    let partial = identity.partial;

    let structure = intent.get("strategy").and_then(|s| s.get("structure")).and_then(|v| v.as_str()).unwrap_or("");
    if structure != "EQUITY_SPOT" {
        return Err(PreflightError::new(C2_OPTIONS_ONLY_VIOLATION, format!("unsupported structure: {structure}"), partial));
    }
    if intent.get("exit_policy").and_then(|e| e.get("policy_id")).and_then(|v| v.as_str()).is_none() {
        return Err(PreflightError::new(C2_EXIT_POLICY_REQUIRED, "exit_policy.policy_id missing", partial));
    }

    decision_artifact(kernel, &identity.binding_hash, &partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::binding::{build_binding_record, ib_bag_order_v1_digest, BrokerLeg};
    use crate::canon_hash::inject_self_hash as self_hash;
    use crate::kernel::ProducerIdentity;
    use tempfile::tempdir;

    fn kernel(root: &std::path::Path) -> Kernel {
        std::fs::create_dir_all(root.join("schemas")).unwrap();
        for entry in std::fs::read_dir(concat!(env!("CARGO_MANIFEST_DIR"), "/schemas")).unwrap() {
            let entry = entry.unwrap();
            std::fs::copy(entry.path(), root.join("schemas").join(entry.file_name())).unwrap();
        }
        Kernel::new(root, ProducerIdentity { repo: "r".into(), git_sha: "sha".into(), module: "preflight".into() })
    }

    fn sample_chain_and_cert() -> (serde_json::Value, serde_json::Value) {
        let chain = json!({
            "schema_id": "options_chain_snapshot", "schema_version": "v1",
            "as_of_utc": "2026-02-13T20:00:00Z",
            "underlying": {"symbol": "SPY", "spot_price": "500.00"},
            "contracts": [],
            "canonical_json_hash": null,
        });
        let (chain, chain_hash) = self_hash(&chain, "canonical_json_hash").unwrap();
        let cert = json!({
            "schema_id": "freshness_certificate", "schema_version": "v1",
            "snapshot_hash": chain_hash,
            "snapshot_as_of_utc": "2026-02-13T20:00:00Z",
            "valid_from_utc": "2026-02-13T20:00:00Z",
            "valid_until_utc": "2026-02-13T21:00:00Z",
            "canonical_json_hash": null,
        });
        let (cert, _) = self_hash(&cert, "canonical_json_hash").unwrap();
        (chain, cert)
    }

    #[test]
    fn allows_a_consistent_identity_set_within_the_freshness_window() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let (chain, cert) = sample_chain_and_cert();
        let chain_hash = hash_for_artifact(&chain).unwrap();
        let cert_hash = hash_for_artifact(&cert).unwrap();
        let intent = json!({
            "schema_id": "options_intent", "schema_version": "v2",
            "engine": {"suite": "C2_OPTIONS_7", "engine_id": "E"},
            "strategy": {"structure": "VERTICAL_SPREAD", "right": "PUT", "direction": "CREDIT"},
            "selection_policy": {"expiry_policy": {}, "width_policy": {}, "liquidity_policy": {}, "pricing_policy": {}},
            "risk": {}, "exit_policy": {"policy_id": "EXIT_V1"},
        });
        let intent_hash = hash_for_artifact(&intent).unwrap();
        let plan = json!({
            "schema_id": "order_plan", "schema_version": "v1",
            "plan_id": "p", "intent_hash": intent_hash,
            "legs": [{"action": "SELL"}, {"action": "BUY"}],
            "order_terms": {}, "risk_proof": {}, "canonical_json_hash": null,
        });
        let (plan, plan_hash) = self_hash(&plan, "canonical_json_hash").unwrap();
        let mledger = json!({
            "schema_id": "mapping_ledger_record", "schema_version": "v2",
            "record_id": "r", "plan_hash": plan_hash, "chain_snapshot_hash": chain_hash, "freshness_cert_hash": cert_hash,
            "selection_trace": {}, "canonical_json_hash": null,
        });
        let (mledger, mledger_hash) = self_hash(&mledger, "canonical_json_hash").unwrap();
        let legs = vec![BrokerLeg { con_id: 1, action: "SELL".into(), ratio: 1 }, BrokerLeg { con_id: 2, action: "BUY".into(), ratio: 1 }];
        let (_p, digest) = ib_bag_order_v1_digest("SPY", "VERTICAL_SPREAD", "LIMIT", "1.00", "DAY", &legs).unwrap();
        let (binding, _bh) = build_binding_record(&plan_hash, &mledger_hash, Some("f"), &digest, "IB_BAG_ORDER_V1").unwrap();

        let now = UtcZ::parse("2026-02-13T20:30:00Z").unwrap();
        let decision = evaluate_options(&k, &intent, &chain, &cert, &plan, &mledger, &binding, &now).unwrap();
        assert_eq!(decision["decision"], json!("ALLOW"));
    }

    #[test]
    fn vetoes_when_now_is_outside_the_cert_validity_window() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let (chain, cert) = sample_chain_and_cert();
        let chain_hash = hash_for_artifact(&chain).unwrap();
        let cert_hash = hash_for_artifact(&cert).unwrap();
        let intent = json!({
            "schema_id": "options_intent", "schema_version": "v2",
            "engine": {"suite": "C2_OPTIONS_7", "engine_id": "E"},
            "strategy": {"structure": "VERTICAL_SPREAD", "right": "PUT", "direction": "CREDIT"},
            "selection_policy": {"expiry_policy": {}, "width_policy": {}, "liquidity_policy": {}, "pricing_policy": {}},
            "risk": {}, "exit_policy": {"policy_id": "EXIT_V1"},
        });
        let intent_hash = hash_for_artifact(&intent).unwrap();
        let plan = json!({
            "schema_id": "order_plan", "schema_version": "v1",
            "plan_id": "p", "intent_hash": intent_hash,
            "legs": [{"action": "SELL"}, {"action": "BUY"}],
            "order_terms": {}, "risk_proof": {}, "canonical_json_hash": null,
        });
        let (plan, plan_hash) = self_hash(&plan, "canonical_json_hash").unwrap();
        let mledger = json!({
            "schema_id": "mapping_ledger_record", "schema_version": "v2",
            "record_id": "r", "plan_hash": plan_hash, "chain_snapshot_hash": chain_hash, "freshness_cert_hash": cert_hash,
            "selection_trace": {}, "canonical_json_hash": null,
        });
        let (mledger, mledger_hash) = self_hash(&mledger, "canonical_json_hash").unwrap();
        let legs = vec![BrokerLeg { con_id: 1, action: "SELL".into(), ratio: 1 }, BrokerLeg { con_id: 2, action: "BUY".into(), ratio: 1 }];
        let (_p, digest) = ib_bag_order_v1_digest("SPY", "VERTICAL_SPREAD", "LIMIT", "1.00", "DAY", &legs).unwrap();
        let (binding, _bh) = build_binding_record(&plan_hash, &mledger_hash, Some("f"), &digest, "IB_BAG_ORDER_V1").unwrap();

        let stale_now = UtcZ::parse("2026-02-13T23:00:00Z").unwrap();
        let err = evaluate_options(&k, &intent, &chain, &cert, &plan, &mledger, &binding, &stale_now).unwrap_err();
        assert_eq!(err.reason_code, C2_FRESHNESS_CERT_INVALID_OR_EXPIRED);
    }

    #[test]
    fn allows_a_consistent_equity_spot_identity_set() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let intent = json!({
            "schema_id": "options_intent", "schema_version": "v2",
            "engine": {"suite": "C2_EQUITY", "engine_id": "E"},
            "strategy": {"structure": "EQUITY_SPOT"},
            "selection_policy": {}, "risk": {}, "exit_policy": {"policy_id": "EXIT_V1"},
        });
        let intent_hash = hash_for_artifact(&intent).unwrap();
        let plan = json!({
            "schema_id": "equity_order_plan", "schema_version": "v2",
            "symbol": "AAPL", "currency": "USD", "action": "BUY", "qty_shares": 10,
            "order_terms": {}, "intent_hash": intent_hash, "canonical_json_hash": null,
        });
        let (plan, plan_hash) = self_hash(&plan, "canonical_json_hash").unwrap();
        let mledger = json!({
            "schema_id": "mapping_ledger_record", "schema_version": "v2",
            "record_id": "r", "plan_hash": plan_hash, "selection_trace": {}, "canonical_json_hash": null,
        });
        let (mledger, mledger_hash) = self_hash(&mledger, "canonical_json_hash").unwrap();
        let legs = vec![BrokerLeg { con_id: 1, action: "BUY".into(), ratio: 1 }];
        let (_p, digest) = ib_bag_order_v1_digest("AAPL", "EQUITY_SPOT", "LIMIT", "1.00", "DAY", &legs).unwrap();
        let (binding, _bh) = build_binding_record(&plan_hash, &mledger_hash, None, &digest, "IB_BAG_ORDER_V1").unwrap();

        let decision = evaluate_equity(&k, &intent, &plan, &mledger, &binding).unwrap();
        assert_eq!(decision["decision"], json!("ALLOW"));
    }
}
