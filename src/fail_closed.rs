//! FailClosedController: turns any stage error into a schema-valid
//! `VetoRecord` (broker-boundary stages) or `FailureRecord` (data-pipeline
//! stages with no broker boundary), never a partial success artifact.
//!
//! Grounded on `map_vertical_spread_v1.py::_veto` (veto path) and
//! `run_accounting_day_v1.py::_build_failure` /
//! `run_allocation_day_v2.py::_write_failure` (failure path). If the veto
//! or failure record itself fails schema validation, that is treated as a
//! hard failure of the controller — there is no second fallback artifact.

use serde_json::json;

use crate::canon_hash::inject_self_hash;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::timestamp::UtcZ;

#[derive(Debug, Clone, Default)]
pub struct VetoInputs {
    pub intent_hash: Option<String>,
    pub plan_hash: Option<String>,
    pub chain_snapshot_hash: Option<String>,
    pub freshness_cert_hash: Option<String>,
}

/// Builds, self-hashes, and schema-validates a `VetoRecord` at the given
/// boundary (`"MAPPING"` or `"SUBMIT"`). A veto that itself fails schema
/// validation is a kernel bug, not a recoverable condition, so this
/// returns `Err` in that case rather than writing anything.
pub fn build_veto_record(
    kernel: &Kernel,
    observed_at_utc: &UtcZ,
    boundary: &str,
    reason_code: &str,
    reason_detail: &str,
    inputs: &VetoInputs,
    pointers: &[String],
    upstream_hash: Option<&str>,
) -> KernelResult<serde_json::Value> {
    let obj = json!({
        "schema_id": "veto_record",
        "schema_version": "v1",
        "observed_at_utc": observed_at_utc.format(),
        "boundary": boundary,
        "reason_code": reason_code,
        "reason_detail": reason_detail,
        "inputs": {
            "intent_hash": inputs.intent_hash,
            "plan_hash": inputs.plan_hash,
            "chain_snapshot_hash": inputs.chain_snapshot_hash,
            "freshness_cert_hash": inputs.freshness_cert_hash,
        },
        "pointers": pointers,
        "canonical_json_hash": null,
        "upstream_hash": upstream_hash,
    });
    let (injected, _) = inject_self_hash(&obj, "canonical_json_hash")
        .map_err(|e| KernelError::new("CANONICALIZATION_FAILED_DURING_WRITE", e.to_string()))?;
    kernel.schema_registry.validate("veto_record.v1", &injected)?;
    Ok(injected)
}

#[derive(Debug, Clone)]
pub struct InputManifestEntry {
    pub kind: &'static str,
    pub path: String,
    pub sha256: String,
    pub day_utc: String,
    pub producer: &'static str,
}

impl InputManifestEntry {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "type": self.kind,
            "path": self.path,
            "sha256": self.sha256,
            "day_utc": self.day_utc,
            "producer": self.producer,
        })
    }
}

/// Builds, schema-validates, a `FailureRecord` for a data-pipeline stage
/// with no broker boundary (Positions/Accounting/Allocation). `schema_name`
/// selects the stage-specific failure schema (`accounting_failure.v1`,
/// `allocation_failure.v1`, ...).
#[allow(clippy::too_many_arguments)]
pub fn build_failure_record(
    kernel: &Kernel,
    schema_name: &str,
    produced_utc: &UtcZ,
    day_utc: &str,
    module: &str,
    status: &str,
    reason_codes: &[&str],
    input_manifest: &[InputManifestEntry],
    code: &str,
    message: &str,
    details: serde_json::Value,
    attempted_outputs: &[String],
) -> KernelResult<serde_json::Value> {
    let mut codes: Vec<&str> = reason_codes.to_vec();
    codes.sort_unstable();
    codes.dedup();

    let obj = json!({
        "schema_id": schema_name,
        "schema_version": 1,
        "produced_utc": produced_utc.format(),
        "day_utc": day_utc,
        "producer": {"repo": kernel.producer.repo, "git_sha": kernel.producer.git_sha, "module": module},
        "status": status,
        "reason_codes": codes,
        "input_manifest": input_manifest.iter().map(|e| e.to_json()).collect::<Vec<_>>(),
        "failure": {
            "code": code,
            "message": message,
            "details": details,
            "attempted_outputs": attempted_outputs.iter().map(|p| json!({"path": p, "sha256": null})).collect::<Vec<_>>(),
        },
    });
    kernel.schema_registry.validate(schema_name, &obj)?;
    Ok(obj)
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
        Kernel::new(root, ProducerIdentity { repo: "r".into(), git_sha: "sha".into(), module: "m".into() })
    }

    #[test]
    fn veto_record_self_hashes_and_validates() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let now = UtcZ::parse("2026-02-13T21:52:00Z").unwrap();
        let v = build_veto_record(&k, &now, "MAPPING", "C2_FRESHNESS_CERT_INVALID_OR_EXPIRED", "expired", &VetoInputs::default(), &[], None).unwrap();
        assert_eq!(v["reason_code"], json!("C2_FRESHNESS_CERT_INVALID_OR_EXPIRED"));
        assert!(v["canonical_json_hash"].is_string());
        assert!(v["upstream_hash"].is_null());
    }

    #[test]
    fn veto_record_carries_upstream_hash_when_known() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let now = UtcZ::parse("2026-02-13T21:52:00Z").unwrap();
        let v = build_veto_record(&k, &now, "SUBMIT", "C2_BINDING_HASH_MISMATCH", "mismatch", &VetoInputs::default(), &[], Some("abc123")).unwrap();
        assert_eq!(v["upstream_hash"], json!("abc123"));
    }

    #[test]
    fn failure_record_dedupes_and_sorts_reason_codes() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let now = UtcZ::parse("2026-02-13T00:00:00Z").unwrap();
        let f = build_failure_record(
            &k,
            "accounting_failure.v1",
            &now,
            "2026-02-13",
            "m",
            "FAIL_CORRUPT_INPUTS",
            &["B", "A", "A"],
            &[],
            "CODE",
            "msg",
            json!({}),
            &[],
        )
        .unwrap();
        assert_eq!(f["reason_codes"], json!(["A", "B"]));
    }
}
