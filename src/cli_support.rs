//! Shared scaffolding for the `src/bin/*_run.rs` stage entry points:
//! `.env` loading, `tracing` init, the common CLI flags every stage shares,
//! and the single-status-line / exit-code contract from spec.md §6/§7.
//!
//! Grounded on the teacher's own binary-entrypoint conventions (`clap` +
//! `dotenv` + `tracing-subscriber`); `anyhow` is reserved for this
//! CLI-boundary layer only, never for library code, which returns typed
//! `KernelError`.

use std::path::{Path, PathBuf};

use clap::Args;

use crate::error::KernelResult;
use crate::kernel::{Kernel, ProducerIdentity};
use crate::reason_codes::PRODUCER_GIT_SHA_MISMATCH_FOR_EXISTING_DAY;

/// Flags every stage binary accepts. The kernel never reads the wall
/// clock, so `now_utc` is always a required, caller-supplied argument.
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Repository root containing `schemas/` and `runtime/truth/`.
    #[arg(long, env = "ARTIFACT_KERNEL_REPO_ROOT", default_value = ".")]
    pub repo_root: PathBuf,

    /// Producer identity embedded in every artifact this process writes.
    #[arg(long, env = "ARTIFACT_KERNEL_REPO_NAME", default_value = "artifact-kernel")]
    pub repo_name: String,

    #[arg(long, env = "ARTIFACT_KERNEL_GIT_SHA")]
    pub git_sha: String,

    /// The caller-supplied instant this run treats as "now", `YYYY-MM-DDTHH:MM:SSZ`.
    #[arg(long)]
    pub now_utc: String,
}

impl CommonArgs {
    pub fn kernel(&self, module: &str) -> Kernel {
        Kernel::new(
            self.repo_root.clone(),
            ProducerIdentity { repo: self.repo_name.clone(), git_sha: self.git_sha.clone(), module: module.to_string() },
        )
    }
}

/// Loads `.env` (if present) and installs an env-filtered subscriber.
/// Called once, at the top of every stage binary's `main`.
pub fn bootstrap() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

pub fn read_json_file(path: &Path) -> KernelResult<serde_json::Value> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Enforces ImmutableStore's producer-sha lock (spec.md §4.4) at `path`
/// before any stage binary writes there: if an artifact already exists at
/// that canonical path, its embedded `producer.git_sha` is authoritative,
/// and an invoker with a different git sha hard-fails rather than
/// overwriting a different producer's day. Called once per output path,
/// right before the corresponding `write_once`/`ensure_out_dir_ready` call.
pub fn check_producer_lock(kernel: &Kernel, path: &Path) {
    match kernel.store.lock_git_sha_if_exists(path, &kernel.producer.git_sha) {
        Ok(Some(existing_sha)) => fail(
            PRODUCER_GIT_SHA_MISMATCH_FOR_EXISTING_DAY,
            &format!("{} was written by git_sha={existing_sha}, this invocation is git_sha={}", path.display(), kernel.producer.git_sha),
            ExitCode::HardFail,
        ),
        Ok(None) => {}
        Err(e) => fail(e.reason_code, &e.detail, ExitCode::HardFail),
    }
}

/// Exit codes per spec.md §6: `0` success, `1` veto at the MAPPING
/// boundary (blocked before any broker contact), `2` veto at the SUBMIT
/// boundary, `3` broker rejected the order (a submission record still
/// exists), `4` hard fail (idempotency/immutability/producer-sha).
#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    Success = 0,
    MappingVeto = 1,
    SubmitVeto = 2,
    BrokerRejected = 3,
    HardFail = 4,
}

/// Prints the single status line spec.md §7 mandates and exits the
/// process. Every stage binary's `main` funnels its outcome through one of
/// `ok`/`fail` as its last action.
pub fn ok(stage: &str) -> ! {
    println!("OK: {stage}_WRITTEN");
    std::process::exit(ExitCode::Success as i32);
}

pub fn fail(reason_code: &str, detail: &str, code: ExitCode) -> ! {
    println!("FAIL: {reason_code}: {detail}");
    std::process::exit(code as i32);
}
