//! SubmitBoundary: the single place the kernel crosses into the broker.
//!
//! Grounded in full on
//! `constellation_2/phaseD/lib/submit_boundary_paper_v4.py`,
//! `idempotency_guard_v1.py`, and `lineage_assert_v1.py`. The directory for
//! a submission is always created before anything is written to it, veto or
//! success (Open Question (b), resolved by reading
//! `submit_boundary_paper_v4.py`: it always creates the subdirectory first).

use serde_json::json;

use crate::artifacts::binding::ib_bag_order_v1_digest;
use crate::artifacts::execution_evidence::{self, FillStatus};
use crate::artifacts::risk_budget::{self, RiskBudgetDecision};
use crate::broker::{BrokerAdapter, WhatIfResult};
use crate::canon_hash::{hash_for_artifact, inject_self_hash};
use crate::error::KernelError;
use crate::fail_closed::VetoInputs;
use crate::kernel::Kernel;
use crate::reason_codes::*;
use crate::timestamp::UtcZ;

/// The only order statuses IB's paper-trading gateway ever actually
/// returns. Anything else is either a broker bug or a fixture/test double
/// standing in for a status PAPER cannot produce — fail closed rather than
/// recording it as a legitimate outcome.
const PAPER_ORDER_STATUSES: &[&str] = &["FILLED", "PARTIALLY_FILLED", "SUBMITTED", "ACKNOWLEDGED", "CANCELLED", "REJECTED"];

pub struct LineageFields {
    pub engine_id: String,
    pub source_intent_id: String,
    pub intent_sha256: String,
}

pub struct SubmitVeto {
    pub reason_code: &'static str,
    pub reason_detail: String,
    pub partial_hashes: VetoInputs,
}

pub enum SubmitOutcome {
    /// A broker submission record was written. `execution_event` is `Some`
    /// only when the broker returned both `order_id` and `perm_id`.
    Submission { broker_submission: serde_json::Value, execution_event: Option<serde_json::Value> },
    Veto(SubmitVeto),
}

fn binding_legs(order_plan: &serde_json::Value) -> Vec<crate::artifacts::binding::BrokerLeg> {
    order_plan
        .get("legs")
        .and_then(|v| v.as_array())
        .map(|legs| {
            legs.iter()
                .map(|l| crate::artifacts::binding::BrokerLeg {
                    con_id: l.get("ib_conId").and_then(|v| v.as_i64()).unwrap_or(0),
                    action: l.get("action").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                    ratio: l.get("ratio").and_then(|v| v.as_i64()).unwrap_or(1),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Runs the full submit-boundary sequence. Returns `Ok(SubmitOutcome)` for
/// every fail-closed veto and every successful (or broker-rejected)
/// submission alike; returns `Err` ONLY for the three hard-fail conditions
/// that produce no VetoRecord at all (idempotency, immutability,
/// producer-sha mismatch) per spec.md §7.
#[allow(clippy::too_many_arguments)]
pub fn run(
    kernel: &Kernel,
    broker: &mut dyn BrokerAdapter,
    now_utc: &UtcZ,
    day_utc: &str,
    order_plan: &serde_json::Value,
    mapping_ledger: &serde_json::Value,
    binding_record: &serde_json::Value,
    risk_budget_doc: &serde_json::Value,
    lineage: &LineageFields,
    env: &str,
) -> Result<SubmitOutcome, KernelError> {
    let mut partial = VetoInputs::default();

    // Hashes are computable regardless of schema validity (hashing never
    // inspects required fields), so the submission directory and the
    // idempotency check happen before any veto path below — the
    // subdirectory is always created first, veto or success alike.
    let plan_hash = hash_for_artifact(order_plan).map_err(|e| KernelError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string()))?;
    let binding_hash = hash_for_artifact(binding_record).map_err(|e| KernelError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string()))?;
    partial.plan_hash = Some(plan_hash.clone());
    let submission_id = binding_hash.clone();

    let sub_dir = kernel.store.day_dir("execution_evidence_v1/submissions", day_utc).join(&submission_id);
    crate::immutable_store::ensure_dir_exists(&sub_dir)?;
    let record_path = sub_dir.join("broker_submission_record.v2.json");
    if record_path.exists() {
        return Err(KernelError::new(C2_IDEMPOTENCY_DUPLICATE_SUBMISSION, submission_id));
    }

    for (obj, schema) in [
        (order_plan, "order_plan.v1"),
        (mapping_ledger, "mapping_ledger_record.v2"),
        (binding_record, "binding_record.v2"),
    ] {
        if kernel.schema_registry.validate(schema, obj).is_err() {
            return Ok(SubmitOutcome::Veto(SubmitVeto {
                reason_code: C2_SUBMIT_FAIL_CLOSED_REQUIRED,
                reason_detail: format!("{schema} failed schema validation"),
                partial_hashes: partial,
            }));
        }
    }

    if lineage.engine_id.trim().is_empty() || lineage.source_intent_id.trim().is_empty() || lineage.intent_sha256.trim().is_empty() {
        return Ok(SubmitOutcome::Veto(SubmitVeto {
            reason_code: C2_LINEAGE_VIOLATION,
            reason_detail: "engine_id/source_intent_id/intent_sha256 required".to_string(),
            partial_hashes: partial,
        }));
    }

    let underlying = order_plan.get("legs").and_then(|l| l.get(0)).and_then(|l| l.get("ib_localSymbol")).and_then(|v| v.as_str()).unwrap_or("");
    let order_terms = order_plan.get("order_terms").cloned().unwrap_or(json!({}));
    let limit_price = order_terms.get("limit_price").and_then(|v| v.as_str()).unwrap_or("");
    let tif = order_terms.get("time_in_force").and_then(|v| v.as_str()).unwrap_or("DAY");
    let legs = binding_legs(order_plan);
    let (_payload, recomputed_digest) = ib_bag_order_v1_digest(underlying, "VERTICAL_SPREAD", "LIMIT", limit_price, tif, &legs)
        .map_err(|e| KernelError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string()))?;
    let bound_digest = binding_record.get("broker_payload_digest").and_then(|d| d.get("digest_sha256")).and_then(|v| v.as_str()).unwrap_or("");
    if recomputed_digest != bound_digest {
        return Ok(SubmitOutcome::Veto(SubmitVeto {
            reason_code: C2_BINDING_HASH_MISMATCH,
            reason_detail: "recomputed broker payload digest does not match binding_record".to_string(),
            partial_hashes: partial,
        }));
    }

    if env != "PAPER" {
        return Ok(SubmitOutcome::Veto(SubmitVeto {
            reason_code: C2_BROKER_ENV_NOT_PAPER,
            reason_detail: format!("env={env}"),
            partial_hashes: partial,
        }));
    }

    broker.connect()?;
    let whatif: WhatIfResult = broker.whatif_order(order_plan)?;

    match risk_budget::evaluate(kernel, risk_budget_doc, &whatif, None, None)? {
        RiskBudgetDecision::Block { reason_code, detail } => {
            let _ = broker.disconnect();
            return Ok(SubmitOutcome::Veto(SubmitVeto { reason_code, reason_detail: detail, partial_hashes: partial }));
        }
        RiskBudgetDecision::Allow => {}
    }

    let submit_result = broker.submit_order(order_plan)?;
    let _ = broker.disconnect();

    if !PAPER_ORDER_STATUSES.contains(&submit_result.status.as_str()) {
        return Ok(SubmitOutcome::Veto(SubmitVeto {
            reason_code: C2_SYNTHETIC_BROKER_STATUS_REJECTED,
            reason_detail: format!("broker returned non-whitelisted status in PAPER: {}", submit_result.status),
            partial_hashes: partial,
        }));
    }

    let broker_ids = json!({"order_id": submit_result.order_id, "perm_id": submit_result.perm_id});
    let error = if submit_result.error_code.is_some() || submit_result.error_message.is_some() {
        json!({"code": submit_result.error_code, "message": submit_result.error_message})
    } else {
        serde_json::Value::Null
    };

    let record = json!({
        "schema_id": "broker_submission_record",
        "schema_version": "v2",
        "submission_id": submission_id,
        "submitted_at_utc": now_utc.format(),
        "binding_hash": binding_hash,
        "broker": {"env": env},
        "status": submit_result.status,
        "broker_ids": broker_ids,
        "error": error,
        "lineage": {
            "engine_id": lineage.engine_id,
            "source_intent_id": lineage.source_intent_id,
            "intent_sha256": lineage.intent_sha256,
        },
        "canonical_json_hash": null,
    });
    let (record, record_hash) = inject_self_hash(&record, "canonical_json_hash")
        .map_err(|e| KernelError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string()))?;
    kernel.schema_registry.validate("broker_submission_record.v2", &record)?;

    if let Some(existing_sha) = kernel.store.lock_git_sha_if_exists(&record_path, &kernel.producer.git_sha)? {
        return Err(KernelError::new(crate::reason_codes::PRODUCER_GIT_SHA_MISMATCH_FOR_EXISTING_DAY, format!("{}: existing producer.git_sha={existing_sha}", record_path.display())));
    }
    let bytes = crate::immutable_store::canonical_file_bytes(&crate::canon_hash::canonical_bytes(&record).map_err(|e| KernelError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string()))?);
    kernel.store.write_once(&record_path, &bytes)?;

    let execution_event = if submit_result.order_id.is_some() && submit_result.perm_id.is_some() {
        let status = match submit_result.status.as_str() {
            "FILLED" => FillStatus::Filled,
            "PARTIALLY_FILLED" => FillStatus::PartiallyFilled,
            "REJECTED" => FillStatus::Rejected,
            "CANCELLED" => FillStatus::Cancelled,
            "ACKNOWLEDGED" => FillStatus::Acknowledged,
            "SUBMITTED" => FillStatus::Submitted,
            _ => FillStatus::Unknown,
        };
        let avg_price = submit_result.avg_price.as_deref().unwrap_or("0.00");
        let (event, _hash) = execution_evidence::build_execution_event_record(kernel, &binding_hash, &record_hash, status, submit_result.filled_qty, avg_price)
            .map_err(|e| KernelError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string()))?;
        let event_path = sub_dir.join("execution_event_record.v1.json");
        if let Some(existing_sha) = kernel.store.lock_git_sha_if_exists(&event_path, &kernel.producer.git_sha)? {
            return Err(KernelError::new(crate::reason_codes::PRODUCER_GIT_SHA_MISMATCH_FOR_EXISTING_DAY, format!("{}: existing producer.git_sha={existing_sha}", event_path.display())));
        }
        let event_bytes = crate::immutable_store::canonical_file_bytes(&crate::canon_hash::canonical_bytes(&event).map_err(|e| KernelError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string()))?);
        kernel.store.write_once(&event_path, &event_bytes)?;
        Some(event)
    } else {
        None
    };

    Ok(SubmitOutcome::Submission { broker_submission: record, execution_event })
}
