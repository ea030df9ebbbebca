//! Stage entry point: DefinedRiskDeriver. Reads the day's positions
//! effective pointer (falling back to the raw `positions_snapshot.v5` when
//! no pointer has been written yet), joins each position against the
//! `order_plan.v1` its `binding_hash` submission directory carries, and
//! writes one `DefinedRiskSnapshot` for the day.

use clap::Parser;

use artifact_kernel::artifacts::defined_risk::{build_snapshot, EffectivePointerRef, PositionRiskInput};
use artifact_kernel::canon_hash::{canonical_bytes, sha256_hex};
use artifact_kernel::cli_support::{self, CommonArgs, ExitCode};
use artifact_kernel::immutable_store::canonical_file_bytes;
use artifact_kernel::timestamp::UtcZ;

#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    day_utc: String,
}

fn main() {
    cli_support::bootstrap();
    let cli = Cli::parse();
    let kernel = cli.common.kernel("defined_risk");
    let now = match UtcZ::parse(&cli.common.now_utc) {
        Ok(t) => t,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };
    let produced_utc = now.format();

    let pointer_path = kernel.store.day_dir("positions_v1/effective", &cli.day_utc).join("positions_effective_pointer.v1.json");
    let (snapshot_path, pointer_ref) = if pointer_path.exists() {
        let pointer_bytes = match std::fs::read(&pointer_path) {
            Ok(b) => b,
            Err(e) => cli_support::fail("POSITIONS_INPUT_INVALID", &format!("{}: {e}", pointer_path.display()), ExitCode::HardFail),
        };
        let pointer: serde_json::Value = match serde_json::from_slice(&pointer_bytes) {
            Ok(v) => v,
            Err(e) => cli_support::fail("POSITIONS_INPUT_INVALID", &format!("{}: {e}", pointer_path.display()), ExitCode::HardFail),
        };
        let selected = match pointer.pointer("/pointers/snapshot_path").and_then(|v| v.as_str()) {
            Some(p) => std::path::PathBuf::from(p),
            None => cli_support::fail("POSITIONS_INPUT_INVALID", "positions_effective_pointer.v1.json missing pointers.snapshot_path", ExitCode::HardFail),
        };
        (selected, EffectivePointerRef { path: pointer_path.display().to_string(), sha256: sha256_hex(&pointer_bytes) })
    } else {
        let fallback = kernel.store.day_dir("positions_v1/snapshots", &cli.day_utc).join("positions_snapshot.v5.json");
        let fallback_bytes = match std::fs::read(&fallback) {
            Ok(b) => b,
            Err(e) => cli_support::fail("POSITIONS_INPUT_INVALID", &format!("{}: {e}", fallback.display()), ExitCode::HardFail),
        };
        (fallback.clone(), EffectivePointerRef { path: fallback.display().to_string(), sha256: sha256_hex(&fallback_bytes) })
    };

    let snapshot = match cli_support::read_json_file(&snapshot_path) {
        Ok(v) => v,
        Err(e) => cli_support::fail("POSITIONS_INPUT_INVALID", &format!("{}: {}", snapshot_path.display(), e.detail), ExitCode::HardFail),
    };
    let positions = snapshot.get("positions").and_then(|v| v.as_array()).cloned().unwrap_or_default();

    let submissions_dir = kernel.store.day_dir("execution_evidence_v1/submissions", &cli.day_utc);
    let mut items = Vec::with_capacity(positions.len());
    for pos in &positions {
        let position_id = pos.get("position_id").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let underlying = pos.get("instrument").and_then(|i| i.get("symbol")).and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
        let expiry_utc = pos.get("instrument").and_then(|i| i.get("expiry_utc")).and_then(|v| v.as_str()).map(str::to_string);

        let order_plan_path = submissions_dir.join(&position_id).join("order_plan.v1.json");
        if !order_plan_path.exists() {
            items.push(PositionRiskInput {
                position_id,
                underlying,
                expiry_utc,
                order_plan_path: String::new(),
                order_plan_sha256: "0".repeat(64),
                risk_proof: None,
            });
            continue;
        }
        let order_plan_bytes = match std::fs::read(&order_plan_path) {
            Ok(b) => b,
            Err(e) => cli_support::fail("POSITIONS_INPUT_INVALID", &format!("{}: {e}", order_plan_path.display()), ExitCode::HardFail),
        };
        let order_plan: serde_json::Value = match serde_json::from_slice(&order_plan_bytes) {
            Ok(v) => v,
            Err(e) => cli_support::fail("POSITIONS_INPUT_INVALID", &format!("{}: {e}", order_plan_path.display()), ExitCode::HardFail),
        };
        items.push(PositionRiskInput {
            position_id,
            underlying,
            expiry_utc,
            order_plan_path: order_plan_path.display().to_string(),
            order_plan_sha256: sha256_hex(&order_plan_bytes),
            risk_proof: order_plan.get("risk_proof").cloned(),
        });
    }

    let (defined_risk_snapshot, _hash) = match build_snapshot(&kernel, &kernel.producer, &produced_utc, &cli.day_utc, &pointer_ref, &items) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };

    let dir = kernel.store.day_dir("defined_risk_v1/snapshots", &cli.day_utc);
    if let Err(e) = artifact_kernel::immutable_store::ensure_out_dir_ready(&dir) {
        cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
    }
    let path = dir.join("defined_risk_snapshot.v1.json");
    let bytes = match canonical_bytes(&defined_risk_snapshot) {
        Ok(b) => canonical_file_bytes(&b),
        Err(e) => cli_support::fail("C2_DETERMINISM_CANONICALIZATION_FAILED", &e.to_string(), ExitCode::HardFail),
    };
    cli_support::check_producer_lock(&kernel, &path);
    if let Err(e) = kernel.store.write_once(&path, &bytes) {
        cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
    }

    cli_support::ok("DEFINED_RISK");
}
