//! FreshnessBuilder: binds a `FreshnessCertificate v1` to a snapshot and a
//! validity window.
//!
//! Grounded on the `FreshnessCertificate v1` data-model entry (spec.md §3):
//! `issued_at_utc == valid_from_utc == snapshot.as_of_utc`,
//! `valid_until_utc = issued_at_utc + max_age_s`.

use chrono::Duration;
use serde_json::json;

use crate::canon_hash::inject_self_hash;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::timestamp::UtcZ;

pub fn build_freshness_certificate(
    kernel: &Kernel,
    snapshot: &serde_json::Value,
    snapshot_hash: &str,
    max_age_s: i64,
) -> KernelResult<(serde_json::Value, String)> {
    if max_age_s <= 0 {
        return Err(KernelError::new("FRESHNESS_MAX_AGE_MUST_BE_POSITIVE", max_age_s.to_string()));
    }
    let snapshot_as_of = snapshot
        .get("as_of_utc")
        .and_then(|v| v.as_str())
        .ok_or_else(|| KernelError::new("C2_MAPPING_FAIL_CLOSED_REQUIRED", "snapshot missing as_of_utc"))?;
    let issued_at = UtcZ::parse(snapshot_as_of)?;
    let valid_until = UtcZ::from_datetime(issued_at.inner() + Duration::seconds(max_age_s));

    let obj = json!({
        "schema_id": "freshness_certificate",
        "schema_version": "v1",
        "issued_at_utc": issued_at.format(),
        "valid_from_utc": issued_at.format(),
        "valid_until_utc": valid_until.format(),
        "snapshot_hash": snapshot_hash,
        "snapshot_as_of_utc": snapshot_as_of,
        "canonical_json_hash": null,
    });
    let (injected, hash) = inject_self_hash(&obj, "canonical_json_hash")
        .map_err(|e| KernelError::new("C2_DETERMINISM_CANONICALIZATION_FAILED", e.to_string()))?;
    kernel.schema_registry.validate("freshness_certificate.v1", &injected)?;
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
        Kernel::new(root, ProducerIdentity { repo: "r".into(), git_sha: "sha".into(), module: "freshness".into() })
    }

    #[test]
    fn window_derives_from_max_age_and_binds_snapshot_hash() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let snapshot = json!({"as_of_utc": "2026-02-13T21:52:00Z"});
        let (cert, _hash) = build_freshness_certificate(&k, &snapshot, "abc123", 180).unwrap();
        assert_eq!(cert["valid_from_utc"], json!("2026-02-13T21:52:00Z"));
        assert_eq!(cert["valid_until_utc"], json!("2026-02-13T21:55:00Z"));
        assert_eq!(cert["snapshot_hash"], json!("abc123"));
    }

    #[test]
    fn rejects_non_positive_max_age() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let snapshot = json!({"as_of_utc": "2026-02-13T21:52:00Z"});
        let err = build_freshness_certificate(&k, &snapshot, "abc123", 0).unwrap_err();
        assert_eq!(err.reason_code, "FRESHNESS_MAX_AGE_MUST_BE_POSITIVE");
    }
}
