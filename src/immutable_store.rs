//! ImmutableStore: atomic write-once day-keyed evidence writes.
//!
//! Grounded on `constellation_2/phaseD/lib/evidence_writer_v1.py`
//! (`_atomic_write_bytes`, `_ensure_out_dir_ready`, `_refuse_if_exists`) and
//! `phaseF/accounting/lib/mutable_write_v1.py` (`write_file_atomic_mutable_v1`,
//! the skip-identical-else-replace rule used exclusively for latest
//! pointers). Every written file is canonical JSON plus a single trailing
//! `\n` (spec.md §6).

use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::canon_hash::sha256_hex;
use crate::error::{KernelError, KernelResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    Wrote,
    SkipIdentical,
}

pub struct WriteResult {
    pub path: PathBuf,
    pub sha256: String,
    pub bytes_written: usize,
    pub action: WriteAction,
}

/// Writes `data` to a brand-new `tmp` file in the same directory,
/// fsyncs, then renames atomically into `path`. The caller is responsible
/// for having already decided that `path` should not currently exist (or,
/// for the mutable-pointer path, that its contents differ).
fn atomic_write_bytes(path: &Path, data: &[u8]) -> KernelResult<()> {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("artifact.json");
    let tmp = path.with_file_name(format!("{file_name}.tmp"));
    if tmp.exists() {
        return Err(KernelError::new("TEMP_FILE_ALREADY_EXISTS", tmp.display().to_string()));
    }
    let write_result = (|| -> std::io::Result<()> {
        let mut f = File::create(&tmp)?;
        f.write_all(data)?;
        f.sync_all()?;
        Ok(())
    })();
    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp);
        return Err(KernelError::new("ATOMIC_WRITE_FAILED", format!("{}: {e}", path.display())));
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        KernelError::new("ATOMIC_WRITE_FAILED", format!("{}: {e}", path.display()))
    })
}

/// For stage output directories (binding/submission/report bundles): the
/// target directory must be absent or empty.
pub fn ensure_out_dir_ready(dir: &Path) -> KernelResult<()> {
    if dir.exists() {
        if !dir.is_dir() {
            return Err(KernelError::new("OUT_DIR_NOT_DIRECTORY", dir.display().to_string()));
        }
        let mut entries = fs::read_dir(dir)?;
        if entries.next().is_some() {
            return Err(KernelError::new("OUT_DIR_NOT_EMPTY", dir.display().to_string()));
        }
        Ok(())
    } else {
        fs::create_dir_all(dir).map_err(|e| KernelError::new("OUT_DIR_CREATE_FAILED", format!("{}: {e}", dir.display())))
    }
}

/// Creates `dir` if absent; a no-op if it already exists (used by
/// `SubmitBoundary`, which always has a submission directory ready before
/// it writes anything, veto or success — see DESIGN.md for the policy this
/// resolves).
pub fn ensure_dir_exists(dir: &Path) -> KernelResult<()> {
    fs::create_dir_all(dir).map_err(|e| KernelError::new("OUT_DIR_CREATE_FAILED", format!("{}: {e}", dir.display())))
}

pub struct ImmutableStore {
    pub truth_root: PathBuf,
}

impl ImmutableStore {
    pub fn new(truth_root: impl Into<PathBuf>) -> Self {
        Self { truth_root: truth_root.into() }
    }

    pub fn day_dir(&self, stage_root: &str, day_utc: &str) -> PathBuf {
        self.truth_root.join(stage_root).join(day_utc)
    }

    /// Atomic write-once: refuses any overwrite with differing bytes,
    /// skips identical bytes, writes via temp+fsync+rename otherwise.
    /// `data` must already be canonical JSON terminated with `\n`.
    pub fn write_once(&self, path: &Path, data: &[u8]) -> KernelResult<WriteResult> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let cand_sha = sha256_hex(data);
        if path.exists() {
            if !path.is_file() {
                return Err(KernelError::new("TARGET_NOT_FILE", path.display().to_string()));
            }
            let existing = fs::read(path)?;
            if sha256_hex(&existing) == cand_sha {
                return Ok(WriteResult {
                    path: path.to_path_buf(),
                    sha256: cand_sha,
                    bytes_written: 0,
                    action: WriteAction::SkipIdentical,
                });
            }
            return Err(KernelError::new("IMMUTABILITY_VIOLATION", path.display().to_string()));
        }
        atomic_write_bytes(path, data)?;
        Ok(WriteResult { path: path.to_path_buf(), sha256: cand_sha, bytes_written: data.len(), action: WriteAction::Wrote })
    }

    /// Refuses to write at all if `path` already exists, regardless of
    /// content — used for evidence files inside a freshly-created
    /// submission/binding directory where any pre-existing file is itself
    /// a violation, not a possible re-run.
    pub fn refuse_if_exists(&self, path: &Path) -> KernelResult<()> {
        if path.exists() {
            return Err(KernelError::new("REFUSE_OVERWRITE_EXISTING_FILE", path.display().to_string()));
        }
        Ok(())
    }

    /// Mutable latest-pointer write rule, used exclusively for non-truth
    /// pointer files (`allocation_v1/latest.json`). Skip-identical when
    /// unchanged, atomic temp+rename replace otherwise.
    pub fn write_latest_pointer(&self, path: &Path, data: &[u8]) -> KernelResult<WriteResult> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let cand_sha = sha256_hex(data);
        if path.exists() {
            if !path.is_file() {
                return Err(KernelError::new("TARGET_NOT_FILE", path.display().to_string()));
            }
            let existing = fs::read(path)?;
            if sha256_hex(&existing) == cand_sha {
                return Ok(WriteResult {
                    path: path.to_path_buf(),
                    sha256: cand_sha,
                    bytes_written: 0,
                    action: WriteAction::SkipIdentical,
                });
            }
        }
        let tmp = path.with_file_name(format!(
            ".tmp_write_{}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("pointer")
        ));
        let result = (|| -> std::io::Result<()> {
            let mut f = File::create(&tmp)?;
            f.write_all(data)?;
            f.sync_all()?;
            Ok(())
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(KernelError::new("ATOMIC_WRITE_FAILED", format!("{}: {e}", path.display())));
        }
        fs::rename(&tmp, path).map_err(|e| KernelError::new("ATOMIC_WRITE_FAILED", format!("{}: {e}", path.display())))?;
        Ok(WriteResult { path: path.to_path_buf(), sha256: cand_sha, bytes_written: data.len(), action: WriteAction::Wrote })
    }

    /// Producer-sha lock: reads `path`'s embedded `producer.git_sha` (if the
    /// file exists) and returns it when it differs from `provided_sha`.
    /// `None` means either the file doesn't exist yet or the sha matches.
    pub fn lock_git_sha_if_exists(&self, path: &Path, provided_sha: &str) -> KernelResult<Option<String>> {
        if !path.exists() || !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        let obj: serde_json::Value = serde_json::from_str(&text)?;
        let existing = obj.get("producer").and_then(|p| p.get("git_sha")).and_then(|s| s.as_str());
        match existing {
            Some(sha) if !sha.trim().is_empty() && sha.trim() != provided_sha => Ok(Some(sha.trim().to_string())),
            _ => Ok(None),
        }
    }
}

/// Serializes canonical bytes plus the mandatory trailing newline.
pub fn canonical_file_bytes(canonical_json_bytes: &[u8]) -> Vec<u8> {
    let mut out = canonical_json_bytes.to_vec();
    out.push(b'\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_once_skips_identical_bytes() {
        let dir = tempdir().unwrap();
        let store = ImmutableStore::new(dir.path());
        let path = dir.path().join("a").join("f.json");
        let r1 = store.write_once(&path, b"{\"a\":1}\n").unwrap();
        assert_eq!(r1.action, WriteAction::Wrote);
        let r2 = store.write_once(&path, b"{\"a\":1}\n").unwrap();
        assert_eq!(r2.action, WriteAction::SkipIdentical);
    }

    #[test]
    fn write_once_refuses_differing_overwrite() {
        let dir = tempdir().unwrap();
        let store = ImmutableStore::new(dir.path());
        let path = dir.path().join("f.json");
        store.write_once(&path, b"{\"a\":1}\n").unwrap();
        let err = store.write_once(&path, b"{\"a\":2}\n").unwrap_err();
        assert_eq!(err.reason_code, "IMMUTABILITY_VIOLATION");
    }

    #[test]
    fn out_dir_must_be_empty() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("out");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("x"), b"x").unwrap();
        let err = ensure_out_dir_ready(&sub).unwrap_err();
        assert_eq!(err.reason_code, "OUT_DIR_NOT_EMPTY");
    }

    #[test]
    fn producer_sha_lock_detects_mismatch() {
        let dir = tempdir().unwrap();
        let store = ImmutableStore::new(dir.path());
        let path = dir.path().join("nav.json");
        store.write_once(&path, br#"{"producer":{"git_sha":"aaa"}}"# as &[u8]).unwrap();
        let mismatch = store.lock_git_sha_if_exists(&path, "bbb").unwrap();
        assert_eq!(mismatch.as_deref(), Some("aaa"));
        let matched = store.lock_git_sha_if_exists(&path, "aaa").unwrap();
        assert_eq!(matched, None);
    }

    #[test]
    fn latest_pointer_replaces_on_change_and_skips_on_match() {
        let dir = tempdir().unwrap();
        let store = ImmutableStore::new(dir.path());
        let path = dir.path().join("latest.json");
        let r1 = store.write_latest_pointer(&path, b"{\"v\":1}\n").unwrap();
        assert_eq!(r1.action, WriteAction::Wrote);
        let r2 = store.write_latest_pointer(&path, b"{\"v\":1}\n").unwrap();
        assert_eq!(r2.action, WriteAction::SkipIdentical);
        let r3 = store.write_latest_pointer(&path, b"{\"v\":2}\n").unwrap();
        assert_eq!(r3.action, WriteAction::Wrote);
    }
}
