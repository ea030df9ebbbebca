//! ExecutionEvidenceMirror: turns a broker fill observation into a
//! schema-valid `ExecutionEventRecord v1`, bound to the submission it
//! belongs to.
//!
//! Grounded on spec.md §3's `ExecutionEventRecord v1` entry and
//! `submit_boundary_paper_v4.py`'s post-submit evidence write, split out as
//! its own builder so `SubmitBoundary` only orchestrates and never
//! hand-assembles the record inline.

use serde_json::json;

use crate::canon_hash::inject_self_hash;
use crate::decimal_codec;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    Submitted,
    Acknowledged,
    Rejected,
    Cancelled,
    PartiallyFilled,
    Filled,
    Unknown,
}

impl FillStatus {
    fn as_str(self) -> &'static str {
        match self {
            FillStatus::Submitted => "SUBMITTED",
            FillStatus::Acknowledged => "ACKNOWLEDGED",
            FillStatus::Rejected => "REJECTED",
            FillStatus::Cancelled => "CANCELLED",
            FillStatus::PartiallyFilled => "PARTIALLY_FILLED",
            FillStatus::Filled => "FILLED",
            FillStatus::Unknown => "UNKNOWN",
        }
    }
}

/// Only called when the broker submission carries `broker_ids` (order_id +
/// perm_id present); a submission with no broker ids never gets an
/// execution event (spec.md §4.7).
pub fn build_execution_event_record(
    kernel: &Kernel,
    binding_hash: &str,
    broker_submission_hash: &str,
    status: FillStatus,
    filled_qty: i64,
    avg_price: &str,
) -> KernelResult<(serde_json::Value, String)> {
    if filled_qty < 0 {
        return Err(KernelError::new("FILLED_QTY_NEGATIVE_FORBIDDEN", filled_qty.to_string()));
    }
    decimal_codec::parse_str_strict(avg_price, "avg_price")?;

    let obj = json!({
        "schema_id": "execution_event_record",
        "schema_version": "v1",
        "binding_hash": binding_hash,
        "broker_submission_hash": broker_submission_hash,
        "status": status.as_str(),
        "filled_qty": filled_qty,
        "avg_price": avg_price,
        "canonical_json_hash": null,
    });
    let (injected, hash) = inject_self_hash(&obj, "canonical_json_hash")
        .map_err(|e| KernelError::new("C2_DETERMINISM_CANONICALIZATION_FAILED", e.to_string()))?;
    kernel.schema_registry.validate("execution_event_record.v1", &injected)?;
    Ok((injected, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::ProducerIdentity;
    use tempfile::tempdir;

    fn kernel(root: &std::path::Path) -> Kernel {
        std::fs::create_dir_all(root.join("schemas")).unwrap();
        for entry in std::fs::read_dir(concat!(env!("CARGO_MANIFEST_DIR"), "/schemas")).unwrap() {
            let entry = entry.unwrap();
            std::fs::copy(entry.path(), root.join("schemas").join(entry.file_name())).unwrap();
        }
        Kernel::new(root, ProducerIdentity { repo: "r".into(), git_sha: "sha".into(), module: "execution_evidence".into() })
    }

    #[test]
    fn builds_filled_event() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let (rec, _) = build_execution_event_record(&k, "bh", "sh", FillStatus::Filled, 1, "1.20").unwrap();
        assert_eq!(rec["status"], serde_json::json!("FILLED"));
    }

    #[test]
    fn rejects_negative_fill_qty() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let err = build_execution_event_record(&k, "bh", "sh", FillStatus::Filled, -1, "1.20").unwrap_err();
        assert_eq!(err.reason_code, "FILLED_QTY_NEGATIVE_FORBIDDEN");
    }
}
