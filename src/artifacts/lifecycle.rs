//! LifecycleBuilder: turns a day's positions plus their execution events
//! into a `PositionLifecycleSnapshot v1` — one state-machine row per
//! position, tracing it from its opening fill toward a terminal state.
//!
//! Grounded on spec.md §4.9's lifecycle entry and the same
//! `execution_evidence_v1` read path `positions.rs` uses; kept a separate
//! builder because a position and its lifecycle are different questions
//! ("what do I hold" vs "how did I get here").

use serde_json::json;

use crate::canon_hash::inject_self_hash;
use crate::error::KernelResult;
use crate::kernel::{Kernel, ProducerIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Opened,
    PartiallyClosed,
    Closed,
}

impl LifecycleState {
    fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Opened => "OPENED",
            LifecycleState::PartiallyClosed => "PARTIALLY_CLOSED",
            LifecycleState::Closed => "CLOSED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub status: String,
    pub at_utc: String,
}

#[derive(Debug, Clone)]
pub struct PositionLifecycle {
    pub position_id: String,
    pub state: LifecycleState,
    pub events: Vec<LifecycleEvent>,
}

pub fn build_position_lifecycle_snapshot(
    kernel: &Kernel,
    day_utc: &str,
    producer: &ProducerIdentity,
    lifecycles: &[PositionLifecycle],
) -> KernelResult<(serde_json::Value, String)> {
    let mut items: Vec<serde_json::Value> = lifecycles
        .iter()
        .map(|l| {
            json!({
                "position_id": l.position_id,
                "state": l.state.as_str(),
                "events": l.events.iter().map(|e| json!({"status": e.status, "at_utc": e.at_utc})).collect::<Vec<_>>(),
            })
        })
        .collect();
    items.sort_by(|a, b| a["position_id"].as_str().cmp(&b["position_id"].as_str()));

    let obj = json!({
        "schema_id": "position_lifecycle_snapshot",
        "schema_version": "v1",
        "day_utc": day_utc,
        "producer": {"repo": producer.repo, "git_sha": producer.git_sha, "module": producer.module},
        "lifecycle": items,
        "canonical_json_hash": null,
    });
    let (injected, hash) = inject_self_hash(&obj, "canonical_json_hash")
        .map_err(|e| crate::error::KernelError::new("C2_DETERMINISM_CANONICALIZATION_FAILED", e.to_string()))?;
    kernel.schema_registry.validate("position_lifecycle_snapshot.v1", &injected)?;
    Ok((injected, hash))
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
        Kernel::new(root, ProducerIdentity { repo: "r".into(), git_sha: "sha".into(), module: "lifecycle".into() })
    }

    #[test]
    fn sorts_by_position_id_and_self_hashes() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let producer = ProducerIdentity { repo: "r".into(), git_sha: "sha".into(), module: "lifecycle".into() };
        let lifecycles = vec![
            PositionLifecycle {
                position_id: "zzz".into(),
                state: LifecycleState::Opened,
                events: vec![LifecycleEvent { status: "FILLED".into(), at_utc: "2026-02-13T15:00:00Z".into() }],
            },
            PositionLifecycle {
                position_id: "aaa".into(),
                state: LifecycleState::Closed,
                events: vec![
                    LifecycleEvent { status: "FILLED".into(), at_utc: "2026-02-13T15:00:00Z".into() },
                    LifecycleEvent { status: "CLOSED".into(), at_utc: "2026-02-13T18:00:00Z".into() },
                ],
            },
        ];
        let (snap, hash1) = build_position_lifecycle_snapshot(&k, "2026-02-13", &producer, &lifecycles).unwrap();
        let ids: Vec<&str> = snap["lifecycle"].as_array().unwrap().iter().map(|p| p["position_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["aaa", "zzz"]);
        let (_snap2, hash2) = build_position_lifecycle_snapshot(&k, "2026-02-13", &producer, &lifecycles).unwrap();
        assert_eq!(hash1, hash2);
    }
}
