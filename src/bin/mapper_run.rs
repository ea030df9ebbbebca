//! Stage entry point: Mapper. Reads an options intent plus the bound
//! snapshot/freshness-certificate pair and either writes the MAPPING-boundary
//! bundle (order plan, mapping ledger record, binding record) or, on a
//! fail-closed error, a `VetoRecord` at boundary `MAPPING`.

use clap::Parser;

use artifact_kernel::artifacts::mapper::map_vertical_spread;
use artifact_kernel::canon_hash::canonical_bytes;
use artifact_kernel::cli_support::{self, CommonArgs, ExitCode};
use artifact_kernel::immutable_store::{canonical_file_bytes, ensure_out_dir_ready};
use artifact_kernel::timestamp::UtcZ;

#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    intent_path: std::path::PathBuf,

    #[arg(long)]
    chain_path: std::path::PathBuf,

    #[arg(long)]
    cert_path: std::path::PathBuf,

    #[arg(long)]
    tick_size: String,
}

fn write_artifact(
    kernel: &artifact_kernel::Kernel,
    dir: &std::path::Path,
    file_name: &str,
    value: &serde_json::Value,
) {
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
    let kernel = cli.common.kernel("mapper");
    let now = match UtcZ::parse(&cli.common.now_utc) {
        Ok(t) => t,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };

    let intent = match cli_support::read_json_file(&cli.intent_path) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };
    let chain = match cli_support::read_json_file(&cli.chain_path) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };
    let cert = match cli_support::read_json_file(&cli.cert_path) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };

    let day_utc = now.day_utc();

    match map_vertical_spread(&kernel, &intent, &chain, &cert, &now, &cli.tick_size) {
        Ok(success) => {
            let binding_id = success.binding_record["canonical_json_hash"].as_str().unwrap_or("unknown").to_string();
            let dir = kernel.truth_root().join("mapping_v1/bindings").join(&day_utc).join(&binding_id);
            if let Err(e) = ensure_out_dir_ready(&dir) {
                cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
            }
            write_artifact(&kernel, &dir, "order_plan.v1.json", &success.order_plan);
            write_artifact(&kernel, &dir, "mapping_ledger_record.v2.json", &success.mapping_ledger_record);
            write_artifact(&kernel, &dir, "binding_record.v2.json", &success.binding_record);
            cli_support::ok("MAPPING");
        }
        Err(mapper_err) => {
            let dir = kernel.truth_root().join("mapping_v1/vetoes").join(&day_utc);
            if let Err(e) = artifact_kernel::immutable_store::ensure_dir_exists(&dir) {
                cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
            }
            let veto = match artifact_kernel::fail_closed::build_veto_record(
                &kernel,
                &now,
                "MAPPING",
                mapper_err.reason_code,
                &mapper_err.reason_detail,
                &mapper_err.partial_hashes,
                &[],
                None,
            ) {
                Ok(v) => v,
                Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
            };
            let veto_id = veto["canonical_json_hash"].as_str().unwrap_or("unknown");
            write_artifact(&kernel, &dir, &format!("veto_record.{veto_id}.v1.json"), &veto);
            cli_support::fail(mapper_err.reason_code, &mapper_err.reason_detail, ExitCode::MappingVeto);
        }
    }
}
