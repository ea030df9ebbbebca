//! Stage entry point: AllocationGate. Evaluates a day's intents against
//! drawdown-scaled engine caps, writing one `AllocationDecision` per intent
//! plus a daily `AllocationSummary` and the mutable latest-pointer.

use clap::Parser;
use rust_decimal::Decimal;
use serde::Deserialize;

use artifact_kernel::artifacts::allocation::{build_decision, build_failure, build_latest_pointer, build_summary, evaluate_intent, DrawdownEnforcementInput};
use artifact_kernel::canon_hash::{canonical_bytes, sha256_hex};
use artifact_kernel::cli_support::{self, CommonArgs, ExitCode};
use artifact_kernel::immutable_store::canonical_file_bytes;
use artifact_kernel::timestamp::UtcZ;

#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    input: std::path::PathBuf,

    #[arg(long)]
    day_utc: String,
}

#[derive(Deserialize)]
struct Input {
    accounting_ok: bool,
    drawdown_pct: String,
    intents: Vec<InputIntent>,
}

#[derive(Deserialize)]
struct InputIntent {
    intent_id: String,
    engine_id: String,
    target_notional_pct: String,
}

fn write_once(kernel: &artifact_kernel::Kernel, dir: &std::path::Path, file_name: &str, value: &serde_json::Value) {
    let bytes = match canonical_bytes(value) {
        Ok(b) => canonical_file_bytes(&b),
        Err(e) => cli_support::fail("C2_DETERMINISM_CANONICALIZATION_FAILED", &e.to_string(), ExitCode::HardFail),
    };
    let path = dir.join(file_name);
    cli_support::check_producer_lock(kernel, &path);
    if let Err(e) = kernel.store.write_once(&path, &bytes) {
        cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
    }
}

fn main() {
    cli_support::bootstrap();
    let cli = Cli::parse();
    let kernel = cli.common.kernel("allocation");
    let now = match UtcZ::parse(&cli.common.now_utc) {
        Ok(t) => t,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };
    let produced_utc = now.format();
    let producer = kernel.producer.clone();

    let input: Input = match cli_support::read_json_file(&cli.input).and_then(|v| serde_json::from_value(v).map_err(Into::into)) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };

    let drawdown_pct: Decimal = match input.drawdown_pct.parse() {
        Ok(d) => d,
        Err(e) => cli_support::fail("G_DRAWDOWN_PCT_NOT_DECIMAL", &e.to_string(), ExitCode::HardFail),
    };

    let decisions_dir = kernel.store.day_dir("allocation_v1/decisions", &cli.day_utc);
    let mut allowed_count = 0u32;
    let mut blocked_count = 0u32;

    for intent in &input.intents {
        let target: Decimal = match intent.target_notional_pct.parse() {
            Ok(d) => d,
            Err(e) => cli_support::fail("G_TARGET_NOTIONAL_PCT_NOT_DECIMAL", &e.to_string(), ExitCode::HardFail),
        };
        let verdict = evaluate_intent(input.accounting_ok, drawdown_pct, &intent.engine_id, target);
        match &verdict {
            artifact_kernel::artifacts::allocation::AllocationVerdict::Allow { .. } => allowed_count += 1,
            artifact_kernel::artifacts::allocation::AllocationVerdict::Block { .. } => blocked_count += 1,
        }
        let (decision, _hash) = match build_decision(
            &kernel,
            &producer,
            &produced_utc,
            &cli.day_utc,
            &intent.intent_id,
            &intent.engine_id,
            &intent.target_notional_pct,
            &verdict,
        ) {
            Ok(v) => v,
            Err(e) => {
                let failure = match build_failure(&kernel, &producer, &produced_utc, &cli.day_utc, e.reason_code, &e.detail) {
                    Ok((f, _)) => f,
                    Err(e2) => cli_support::fail(e2.reason_code, &e2.detail, ExitCode::HardFail),
                };
                write_once(&kernel, &kernel.store.day_dir("allocation_v1/failures", &cli.day_utc), "allocation_failure.v1.json", &failure);
                cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
            }
        };
        write_once(&kernel, &decisions_dir, &format!("{}.allocation_decision.v1.json", intent.intent_id), &decision);
    }

    let nav_path = kernel.store.day_dir("accounting_v1/nav", &cli.day_utc).join("accounting_nav.v1.json");
    let nav_bytes = match std::fs::read(&nav_path) {
        Ok(b) => b,
        Err(e) => cli_support::fail("ACCOUNTING_DAY_NAV_MISSING_OR_INVALID", &format!("{}: {e}", nav_path.display()), ExitCode::HardFail),
    };
    let nav_source_sha256 = sha256_hex(&nav_bytes);
    let nav: serde_json::Value = match serde_json::from_slice(&nav_bytes) {
        Ok(v) => v,
        Err(e) => cli_support::fail("ACCOUNTING_DAY_NAV_MISSING_OR_INVALID", &format!("{}: {e}", nav_path.display()), ExitCode::HardFail),
    };
    let nav_field = |pointer: &str, label: &str| -> String {
        nav.pointer(pointer).and_then(|v| v.as_str()).map(str::to_string).unwrap_or_else(|| {
            cli_support::fail("ACCOUNTING_DAY_NAV_MISSING_OR_INVALID", &format!("{label} missing from {}", nav_path.display()), ExitCode::HardFail)
        })
    };
    let drawdown = DrawdownEnforcementInput {
        nav_source_path: nav_path.display().to_string(),
        nav_source_sha256,
        nav_asof_day_utc: cli.day_utc.clone(),
        rolling_peak_nav_usd: nav_field("/history/peak_nav_usd", "history.peak_nav_usd"),
        nav_total_usd: nav_field("/nav/nav_total_usd", "nav.nav_total_usd"),
        drawdown_abs_usd: nav_field("/history/drawdown_abs_usd", "history.drawdown_abs_usd"),
        drawdown_pct: nav_field("/history/drawdown_pct", "history.drawdown_pct"),
    };

    let (summary, summary_hash) = match build_summary(&kernel, &producer, &produced_utc, &cli.day_utc, allowed_count, blocked_count, &drawdown) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };
    write_once(&kernel, &kernel.store.day_dir("allocation_v1/summary", &cli.day_utc), "allocation_summary.v1.json", &summary);

    let (pointer, _) = match build_latest_pointer(&kernel, &producer, &produced_utc, &cli.day_utc, &summary_hash) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };
    let pointer_bytes = match canonical_bytes(&pointer) {
        Ok(b) => canonical_file_bytes(&b),
        Err(e) => cli_support::fail("C2_DETERMINISM_CANONICALIZATION_FAILED", &e.to_string(), ExitCode::HardFail),
    };
    let pointer_path = kernel.store.truth_root.join("allocation_v1/allocation_latest_pointer.v1.json");
    if let Err(e) = kernel.store.write_latest_pointer(&pointer_path, &pointer_bytes) {
        cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
    }

    cli_support::ok("ALLOCATION");
}
