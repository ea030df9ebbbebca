//! Stage entry point: PreflightEvaluator. Re-validates the identity set for
//! a binding one last time and either writes a `SubmitPreflightDecision`
//! or, on a fail-closed error, a `VetoRecord` at boundary `SUBMIT`.

use clap::Parser;

use artifact_kernel::artifacts::preflight::{evaluate_equity, evaluate_options};
use artifact_kernel::canon_hash::{canonical_bytes, hash_for_artifact};
use artifact_kernel::cli_support::{self, CommonArgs, ExitCode};
use artifact_kernel::immutable_store::canonical_file_bytes;
use artifact_kernel::timestamp::UtcZ;

#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    intent_path: std::path::PathBuf,

    /// Chain snapshot the binding was originally mapped against. Required
    /// in options mode (`strategy.structure == VERTICAL_SPREAD`); omitted
    /// for equity-spot intents, which carry no options chain.
    #[arg(long)]
    chain_path: Option<std::path::PathBuf>,

    /// Freshness certificate bound to `chain_path`. Required alongside it.
    #[arg(long)]
    cert_path: Option<std::path::PathBuf>,

    #[arg(long)]
    order_plan_path: std::path::PathBuf,

    #[arg(long)]
    mapping_ledger_path: std::path::PathBuf,

    #[arg(long)]
    binding_record_path: std::path::PathBuf,
}

fn main() {
    cli_support::bootstrap();
    let cli = Cli::parse();
    let kernel = cli.common.kernel("preflight");
    let now = match UtcZ::parse(&cli.common.now_utc) {
        Ok(t) => t,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };
    let day_utc = now.day_utc();

    let intent = match cli_support::read_json_file(&cli.intent_path) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };
    let order_plan = match cli_support::read_json_file(&cli.order_plan_path) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };
    let mapping_ledger = match cli_support::read_json_file(&cli.mapping_ledger_path) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };
    let binding_record = match cli_support::read_json_file(&cli.binding_record_path) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };

    let structure = intent.get("strategy").and_then(|s| s.get("structure")).and_then(|v| v.as_str()).unwrap_or("");
    let result = if structure == "EQUITY_SPOT" {
        evaluate_equity(&kernel, &intent, &order_plan, &mapping_ledger, &binding_record)
    } else {
        let (chain_path, cert_path) = match (&cli.chain_path, &cli.cert_path) {
            (Some(c), Some(f)) => (c, f),
            _ => cli_support::fail(
                "C2_FRESHNESS_CERT_INVALID_OR_EXPIRED",
                "--chain_path/--cert_path required for options-mode preflight",
                ExitCode::HardFail,
            ),
        };
        let chain = match cli_support::read_json_file(chain_path) {
            Ok(v) => v,
            Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
        };
        let cert = match cli_support::read_json_file(cert_path) {
            Ok(v) => v,
            Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
        };
        evaluate_options(&kernel, &intent, &chain, &cert, &order_plan, &mapping_ledger, &binding_record, &now)
    };

    match result {
        Ok(decision) => {
            let binding_hash = decision["binding_hash"].as_str().unwrap_or("unknown");
            let dir = kernel.truth_root().join("mapping_v1/preflight").join(&day_utc).join(binding_hash);
            if let Err(e) = artifact_kernel::immutable_store::ensure_out_dir_ready(&dir) {
                cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
            }
            let bytes = match canonical_bytes(&decision) {
                Ok(b) => canonical_file_bytes(&b),
                Err(e) => cli_support::fail("C2_DETERMINISM_CANONICALIZATION_FAILED", &e.to_string(), ExitCode::HardFail),
            };
            let path = dir.join("submit_preflight_decision.v1.json");
            cli_support::check_producer_lock(&kernel, &path);
            if let Err(e) = kernel.store.write_once(&path, &bytes) {
                cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
            }
            cli_support::ok("PREFLIGHT");
        }
        Err(preflight_err) => {
            let dir = kernel.truth_root().join("mapping_v1/preflight_vetoes").join(&day_utc);
            if let Err(e) = artifact_kernel::immutable_store::ensure_dir_exists(&dir) {
                cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
            }
            let upstream_hash = hash_for_artifact(&binding_record).ok();
            let veto = match artifact_kernel::fail_closed::build_veto_record(
                &kernel,
                &now,
                "SUBMIT",
                preflight_err.reason_code,
                &preflight_err.reason_detail,
                &preflight_err.partial_hashes,
                &[],
                upstream_hash.as_deref(),
            ) {
                Ok(v) => v,
                Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
            };
            let veto_id = veto["canonical_json_hash"].as_str().unwrap_or("unknown");
            let bytes = match canonical_bytes(&veto) {
                Ok(b) => canonical_file_bytes(&b),
                Err(e) => cli_support::fail("C2_DETERMINISM_CANONICALIZATION_FAILED", &e.to_string(), ExitCode::HardFail),
            };
            let veto_path = dir.join(format!("veto_record.{veto_id}.v1.json"));
            cli_support::check_producer_lock(&kernel, &veto_path);
            if let Err(e) = kernel.store.write_once(&veto_path, &bytes) {
                cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
            }
            cli_support::fail(preflight_err.reason_code, &preflight_err.reason_detail, ExitCode::SubmitVeto);
        }
    }
}

