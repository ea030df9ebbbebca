//! Stage entry point: SnapshotBuilder. Reads a raw underlying quote + a
//! contract list from a JSON input file and writes an immutable
//! `OptionsChainSnapshot v1` under `market_data_v1/snapshots/<day>/`.

use clap::Parser;

use artifact_kernel::artifacts::snapshot::{build_snapshot, RawContract};
use artifact_kernel::cli_support::{self, CommonArgs, ExitCode};
use artifact_kernel::timestamp::UtcZ;

#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// JSON file: `{"symbol": "...", "spot_price": "...", "contracts": [...]}`.
    #[arg(long)]
    input: std::path::PathBuf,
}

#[derive(serde::Deserialize)]
struct Input {
    symbol: String,
    spot_price: String,
    contracts: Vec<InputContract>,
}

#[derive(serde::Deserialize)]
struct InputContract {
    contract_key: String,
    expiry_utc: String,
    right: String,
    strike: String,
    bid: String,
    ask: String,
    open_interest: i64,
    volume: i64,
    ib_con_id: i64,
    ib_local_symbol: String,
}

fn main() {
    cli_support::bootstrap();
    let cli = Cli::parse();
    let kernel = cli.common.kernel("snapshot");

    let as_of_utc = match UtcZ::parse(&cli.common.now_utc) {
        Ok(t) => t,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };

    let input: Input = match cli_support::read_json_file(&cli.input).and_then(|v| serde_json::from_value(v).map_err(Into::into)) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };
    let contracts: Vec<RawContract> = input
        .contracts
        .into_iter()
        .map(|c| RawContract {
            contract_key: c.contract_key,
            expiry_utc: c.expiry_utc,
            right: c.right,
            strike: c.strike,
            bid: c.bid,
            ask: c.ask,
            open_interest: c.open_interest,
            volume: c.volume,
            ib_con_id: c.ib_con_id,
            ib_local_symbol: c.ib_local_symbol,
        })
        .collect();

    let (snapshot, _hash) = match build_snapshot(&kernel, &as_of_utc, &input.symbol, &input.spot_price, &contracts) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };

    let day_dir = kernel.store.day_dir("market_data_v1/snapshots", &as_of_utc.day_utc());
    let path = day_dir.join("options_chain_snapshot.v1.json");
    let bytes = match artifact_kernel::canon_hash::canonical_bytes(&snapshot) {
        Ok(b) => artifact_kernel::immutable_store::canonical_file_bytes(&b),
        Err(e) => cli_support::fail("C2_DETERMINISM_CANONICALIZATION_FAILED", &e.to_string(), ExitCode::HardFail),
    };
    cli_support::check_producer_lock(&kernel, &path);
    if let Err(e) = kernel.store.write_once(&path, &bytes) {
        cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
    }

    cli_support::ok("SNAPSHOT");
}
