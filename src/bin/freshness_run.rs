//! Stage entry point: FreshnessBuilder. Reads a snapshot artifact already
//! on disk and binds a `FreshnessCertificate v1` to it.

use clap::Parser;

use artifact_kernel::artifacts::freshness::build_freshness_certificate;
use artifact_kernel::canon_hash::hash_for_artifact;
use artifact_kernel::cli_support::{self, CommonArgs, ExitCode};
use artifact_kernel::timestamp::UtcZ;

#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    snapshot_path: std::path::PathBuf,

    #[arg(long)]
    max_age_s: i64,
}

fn main() {
    cli_support::bootstrap();
    let cli = Cli::parse();
    let kernel = cli.common.kernel("freshness");
    let now = match UtcZ::parse(&cli.common.now_utc) {
        Ok(t) => t,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };

    let snapshot = match cli_support::read_json_file(&cli.snapshot_path) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };
    let snapshot_hash = match hash_for_artifact(&snapshot) {
        Ok(h) => h,
        Err(e) => cli_support::fail("C2_DETERMINISM_CANONICALIZATION_FAILED", &e.to_string(), ExitCode::HardFail),
    };

    let (cert, _hash) = match build_freshness_certificate(&kernel, &snapshot, &snapshot_hash, cli.max_age_s) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };

    let day_dir = kernel.store.day_dir("market_data_v1/freshness", &now.day_utc());
    let path = day_dir.join("freshness_certificate.v1.json");
    let bytes = match artifact_kernel::canon_hash::canonical_bytes(&cert) {
        Ok(b) => artifact_kernel::immutable_store::canonical_file_bytes(&b),
        Err(e) => cli_support::fail("C2_DETERMINISM_CANONICALIZATION_FAILED", &e.to_string(), ExitCode::HardFail),
    };
    cli_support::check_producer_lock(&kernel, &path);
    if let Err(e) = kernel.store.write_once(&path, &bytes) {
        cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
    }

    cli_support::ok("FRESHNESS_CERTIFICATE");
}
