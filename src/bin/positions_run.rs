//! Stage entry point: PositionsBuilder. Walks a day's
//! `execution_evidence_v1/submissions/<day>/` directory and, for every
//! submission subdirectory with an execution event, derives a position row.

use clap::Parser;

use artifact_kernel::artifacts::positions::{build_effective_pointer, build_positions_snapshot_v5, FilledSubmission};
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
    let kernel = cli.common.kernel("positions");
    if let Err(e) = UtcZ::parse(&cli.common.now_utc) {
        cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
    }

    let submissions_dir = kernel.store.day_dir("execution_evidence_v1/submissions", &cli.day_utc);
    let entries = match std::fs::read_dir(&submissions_dir) {
        Ok(e) => e,
        Err(e) => cli_support::fail("POSITIONS_INPUT_DIR_UNREADABLE", &format!("{}: {e}", submissions_dir.display()), ExitCode::HardFail),
    };

    let mut filled = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => cli_support::fail("POSITIONS_INPUT_DIR_UNREADABLE", &e.to_string(), ExitCode::HardFail),
        };
        let sub_dir = entry.path();
        if !sub_dir.is_dir() {
            continue;
        }
        let event_path = sub_dir.join("execution_event_record.v1.json");
        if !event_path.exists() {
            continue;
        }
        let event = match cli_support::read_json_file(&event_path) {
            Ok(v) => v,
            Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
        };
        let record = match cli_support::read_json_file(&sub_dir.join("broker_submission_record.v2.json")) {
            Ok(v) => v,
            Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
        };
        let order_plan_path = sub_dir.join("order_plan.v1.json");
        let order_plan = if order_plan_path.exists() {
            match cli_support::read_json_file(&order_plan_path) {
                Ok(v) => v,
                Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
            }
        } else {
            serde_json::Value::Null
        };
        let short_leg = order_plan.get("legs").and_then(|l| l.get(0)).cloned().unwrap_or(serde_json::Value::Null);

        filled.push(FilledSubmission {
            binding_hash: event.get("binding_hash").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            engine_id: record.get("lineage").and_then(|l| l.get("engine_id")).and_then(|v| v.as_str()).map(str::to_string),
            source_intent_id: record.get("lineage").and_then(|l| l.get("source_intent_id")).and_then(|v| v.as_str()).map(str::to_string),
            intent_sha256: record.get("lineage").and_then(|l| l.get("intent_sha256")).and_then(|v| v.as_str()).map(str::to_string),
            instrument_symbol: short_leg.get("ib_localSymbol").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            instrument_right: short_leg.get("right").and_then(|v| v.as_str()).map(str::to_string),
            instrument_strike: short_leg.get("strike").and_then(|v| v.as_str()).map(str::to_string),
            instrument_expiry_utc: short_leg.get("expiry_utc").and_then(|v| v.as_str()).map(str::to_string),
            filled_qty: event.get("filled_qty").and_then(|v| v.as_i64()).unwrap_or(0),
            avg_price: event.get("avg_price").and_then(|v| v.as_str()).unwrap_or("0.00").to_string(),
        });
    }

    let (snapshot, _hash) = match build_positions_snapshot_v5(&kernel, &cli.day_utc, &kernel.producer, &filled) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };

    let day_dir = kernel.store.day_dir("positions_v1/snapshots", &cli.day_utc);
    let path = day_dir.join("positions_snapshot.v5.json");
    let bytes = match canonical_bytes(&snapshot) {
        Ok(b) => canonical_file_bytes(&b),
        Err(e) => cli_support::fail("C2_DETERMINISM_CANONICALIZATION_FAILED", &e.to_string(), ExitCode::HardFail),
    };
    cli_support::check_producer_lock(&kernel, &path);
    if let Err(e) = kernel.store.write_once(&path, &bytes) {
        cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
    }

    let snapshot_sha256 = sha256_hex(&bytes);
    let (pointer, _hash) = match build_effective_pointer(&kernel, &kernel.producer, &cli.day_utc, &path.display().to_string(), &snapshot_sha256) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };
    let pointer_dir = kernel.store.day_dir("positions_v1/effective", &cli.day_utc);
    if let Err(e) = artifact_kernel::immutable_store::ensure_out_dir_ready(&pointer_dir) {
        cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
    }
    let pointer_path = pointer_dir.join("positions_effective_pointer.v1.json");
    let pointer_bytes = match canonical_bytes(&pointer) {
        Ok(b) => canonical_file_bytes(&b),
        Err(e) => cli_support::fail("C2_DETERMINISM_CANONICALIZATION_FAILED", &e.to_string(), ExitCode::HardFail),
    };
    cli_support::check_producer_lock(&kernel, &pointer_path);
    if let Err(e) = kernel.store.write_once(&pointer_path, &pointer_bytes) {
        cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
    }

    cli_support::ok("POSITIONS");
}
