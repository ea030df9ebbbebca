//! BindingDigester: builds the deterministic broker-payload digest bound
//! into every `BindingRecord`, and the `BindingRecord` itself.
//!
//! Grounded on `map_vertical_spread_v1.py`'s `broker_payload` construction
//! (`format: "IB_BAG_ORDER_V1"`) and `BindingRecord` assembly.

use serde_json::json;

use crate::canon_hash::{canonical_hash, hash_for_artifact, inject_self_hash};
use crate::error::KernelResult;

/// One leg of the deterministic broker order payload.
#[derive(Debug, Clone)]
pub struct BrokerLeg {
    pub con_id: i64,
    pub action: String,
    pub ratio: i64,
}

/// Builds the canonical `IB_BAG_ORDER_V1` broker payload and its digest.
/// This is the exact object both the Mapper (at construction time) and
/// `SubmitBoundary` (at verification time) must independently reproduce
/// byte-for-byte.
pub fn ib_bag_order_v1_digest(
    underlying: &str,
    structure: &str,
    order_type: &str,
    limit_price: &str,
    time_in_force: &str,
    legs: &[BrokerLeg],
) -> KernelResult<(serde_json::Value, String)> {
    let payload = json!({
        "format": "IB_BAG_ORDER_V1",
        "underlying": underlying,
        "structure": structure,
        "order_type": order_type,
        "limit_price": limit_price,
        "time_in_force": time_in_force,
        "legs": legs.iter().map(|l| json!({"conId": l.con_id, "action": l.action, "ratio": l.ratio})).collect::<Vec<_>>(),
    });
    let digest = canonical_hash(&payload).map_err(|e| crate::error::KernelError::new("C2_DETERMINISM_CANONICALIZATION_FAILED", e.to_string()))?;
    Ok((payload, digest))
}

/// Assembles, self-hashes, a `BindingRecord v2` from its upstream pieces.
pub fn build_binding_record(
    plan_hash: &str,
    mapping_ledger_hash: &str,
    freshness_cert_hash: Option<&str>,
    broker_digest: &str,
    format: &str,
) -> KernelResult<(serde_json::Value, String)> {
    let seed = json!({
        "kind": "binding_id_seed_v1",
        "plan_hash": plan_hash,
        "mapping_ledger_hash": mapping_ledger_hash,
        "freshness_cert_hash": freshness_cert_hash,
        "broker_digest": broker_digest,
    });
    let binding_id = canonical_hash(&seed).map_err(|e| crate::error::KernelError::new("C2_DETERMINISM_CANONICALIZATION_FAILED", e.to_string()))?;

    let obj = json!({
        "schema_id": "binding_record",
        "schema_version": "v2",
        "binding_id": binding_id,
        "plan_hash": plan_hash,
        "mapping_ledger_hash": mapping_ledger_hash,
        "broker_payload_digest": {"digest_sha256": broker_digest, "format": format, "notes": []},
        "preflight": {
            "validated_schema": true,
            "validated_invariants": true,
            "validated_freshness": freshness_cert_hash.is_some(),
            "defined_risk_proven": true,
            "exit_policy_present": true,
        },
        "canonical_json_hash": null,
    });
    let (injected, hash) = inject_self_hash(&obj, "canonical_json_hash")
        .map_err(|e| crate::error::KernelError::new("C2_DETERMINISM_CANONICALIZATION_FAILED", e.to_string()))?;
    Ok((injected, hash))
}

/// Recomputes the hash a `BindingRecord` would have, for `SubmitBoundary`'s
/// verification step.
pub fn recompute_hash(binding_record: &serde_json::Value) -> KernelResult<String> {
    hash_for_artifact(binding_record).map_err(|e| crate::error::KernelError::new("C2_DETERMINISM_CANONICALIZATION_FAILED", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_digest_is_deterministic() {
        let legs = vec![BrokerLeg { con_id: 1, action: "SELL".into(), ratio: 1 }, BrokerLeg { con_id: 2, action: "BUY".into(), ratio: 1 }];
        let (_p1, d1) = ib_bag_order_v1_digest("SPY", "VERTICAL_SPREAD", "LIMIT", "1.20", "DAY", &legs).unwrap();
        let (_p2, d2) = ib_bag_order_v1_digest("SPY", "VERTICAL_SPREAD", "LIMIT", "1.20", "DAY", &legs).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 64);
    }

    #[test]
    fn binding_record_self_hash_round_trips() {
        let (rec, hash) = build_binding_record("plan", "mledger", Some("cert"), "digest", "IB_BAG_ORDER_V1").unwrap();
        assert_eq!(recompute_hash(&rec).unwrap(), hash);
    }
}
