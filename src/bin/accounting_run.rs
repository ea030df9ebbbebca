//! Stage entry point: AccountingAggregator. Closes a day's books into
//! `AccountingNav`, `AccountingExposure`, and `AccountingAttribution`. There
//! is no mutable latest-pointer for this stage by design (see DESIGN.md);
//! downstream consumers read the day-scoped artifacts directly.

use clap::Parser;
use serde::Deserialize;

use artifact_kernel::artifacts::accounting::{
    build_attribution, build_exposure, build_failure, build_nav, CashComponent, DefinedRiskItem, EngineAttribution,
};
use artifact_kernel::canon_hash::canonical_bytes;
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

    /// `DefinedRiskSnapshot` written by DefinedRiskDeriver for this day, if
    /// any. When present, its `DEFINED_RISK` items feed Exposure instead of
    /// `input.defined_risk_items`; when absent, Exposure falls back to
    /// whatever `defined_risk_items` the caller supplied directly.
    #[arg(long)]
    defined_risk_snapshot_path: Option<std::path::PathBuf>,
}

#[derive(Deserialize)]
struct Input {
    cash_components: Vec<InputCashComponent>,
    prior_peak_nav_cents: Option<i64>,
    #[serde(default)]
    defined_risk_items: Vec<InputDefinedRiskItem>,
    #[serde(default)]
    attribution_rows: Vec<InputAttributionRow>,
}

#[derive(Deserialize)]
struct InputCashComponent {
    label: String,
    amount_cents: i64,
}

#[derive(Deserialize)]
struct InputDefinedRiskItem {
    underlying: String,
    expiry_utc: String,
    max_loss_cents: i64,
}

#[derive(Deserialize)]
struct InputAttributionRow {
    engine_id: String,
    realized_pnl_cents: i64,
    unrealized_pnl_cents: i64,
    defined_risk_exposure_cents: i64,
    positions_count: u32,
    symbols: Vec<String>,
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
    let kernel = cli.common.kernel("accounting");
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

    let components: Vec<CashComponent> =
        input.cash_components.into_iter().map(|c| CashComponent { label: c.label, amount_cents: c.amount_cents }).collect();

    let defined_risk_items: Vec<DefinedRiskItem> = match &cli.defined_risk_snapshot_path {
        Some(path) => {
            let snapshot = match cli_support::read_json_file(path) {
                Ok(v) => v,
                Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
            };
            snapshot
                .pointer("/defined_risk/items")
                .and_then(|v| v.as_array())
                .into_iter()
                .flatten()
                .filter(|item| item.get("market_exposure_type").and_then(|v| v.as_str()) == Some("DEFINED_RISK"))
                .map(|item| DefinedRiskItem {
                    underlying: item.get("underlying").and_then(|v| v.as_str()).unwrap_or("unknown").to_string(),
                    expiry_utc: item.get("expiry_utc").and_then(|v| v.as_str()).unwrap_or("UNKNOWN").to_string(),
                    max_loss_cents: item.get("max_loss_cents").and_then(|v| v.as_i64()).unwrap_or(0),
                })
                .collect()
        }
        None => input
            .defined_risk_items
            .into_iter()
            .map(|i| DefinedRiskItem { underlying: i.underlying, expiry_utc: i.expiry_utc, max_loss_cents: i.max_loss_cents })
            .collect(),
    };
    let attribution_rows: Vec<EngineAttribution> = input
        .attribution_rows
        .into_iter()
        .map(|r| EngineAttribution {
            engine_id: r.engine_id,
            realized_pnl_cents: r.realized_pnl_cents,
            unrealized_pnl_cents: r.unrealized_pnl_cents,
            defined_risk_exposure_cents: r.defined_risk_exposure_cents,
            positions_count: r.positions_count,
            symbols: r.symbols,
        })
        .collect();

    let nav_result = build_nav(&kernel, &producer, &produced_utc, &cli.day_utc, &components, input.prior_peak_nav_cents);
    let exposure_result = build_exposure(&kernel, &producer, &produced_utc, &cli.day_utc, &defined_risk_items);
    let attribution_result = build_attribution(&kernel, &producer, &produced_utc, &cli.day_utc, &attribution_rows);

    let (nav, exposure, attribution) = match (nav_result, exposure_result, attribution_result) {
        (Ok(n), Ok(e), Ok(a)) => (n, e, a),
        (nav_r, exposure_r, attribution_r) => {
            let err = nav_r.err().or(exposure_r.err()).or(attribution_r.err()).unwrap();
            let failure = match build_failure(&kernel, &producer, &produced_utc, &cli.day_utc, err.reason_code, &err.detail) {
                Ok((v, _)) => v,
                Err(e2) => cli_support::fail(e2.reason_code, &e2.detail, ExitCode::HardFail),
            };
            let dir = kernel.store.day_dir("accounting_v1/failures", &cli.day_utc);
            write_once(&kernel, &dir, "accounting_failure.v1.json", &failure);
            cli_support::fail(err.reason_code, &err.detail, ExitCode::HardFail);
        }
    };

    write_once(&kernel, &kernel.store.day_dir("accounting_v1/nav", &cli.day_utc), "accounting_nav.v1.json", &nav.0);
    write_once(&kernel, &kernel.store.day_dir("accounting_v1/exposure", &cli.day_utc), "accounting_exposure.v1.json", &exposure.0);
    write_once(&kernel, &kernel.store.day_dir("accounting_v1/attribution", &cli.day_utc), "accounting_attribution.v1.json", &attribution.0);

    cli_support::ok("ACCOUNTING");
}
