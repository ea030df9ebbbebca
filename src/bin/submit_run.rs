//! Stage entry point: SubmitBoundary. The only stage binary that crosses
//! into a broker. Since real broker connectivity is out of scope for the
//! kernel (spec.md §1), this binary drives `BrokerAdapter` with a
//! fixture-replay adapter that reads a pre-recorded `whatif`/`submit`
//! response from the CLI's `--broker-fixture` file — the CLI-boundary
//! analogue of the in-process `ScriptedPaperBroker` test double.

use clap::Parser;
use serde::Deserialize;

use artifact_kernel::artifacts::submit::{self, LineageFields, SubmitOutcome};
use artifact_kernel::broker::{BrokerAdapter, SubmitResult, WhatIfResult};
use artifact_kernel::canon_hash::canonical_bytes;
use artifact_kernel::cli_support::{self, CommonArgs, ExitCode};
use artifact_kernel::error::KernelResult;
use artifact_kernel::immutable_store::canonical_file_bytes;
use artifact_kernel::timestamp::UtcZ;

#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    order_plan_path: std::path::PathBuf,

    #[arg(long)]
    mapping_ledger_path: std::path::PathBuf,

    #[arg(long)]
    binding_record_path: std::path::PathBuf,

    #[arg(long)]
    risk_budget_path: std::path::PathBuf,

    #[arg(long)]
    broker_fixture_path: std::path::PathBuf,

    #[arg(long)]
    engine_id: String,

    #[arg(long)]
    source_intent_id: String,

    #[arg(long)]
    intent_sha256: String,

    #[arg(long, default_value = "PAPER")]
    env: String,

    #[arg(long)]
    day_utc: String,
}

#[derive(Deserialize)]
struct BrokerFixture {
    whatif: FixtureWhatIf,
    submit: FixtureSubmit,
}

#[derive(Deserialize)]
struct FixtureWhatIf {
    margin_change_usd: String,
    notional_usd: String,
}

#[derive(Deserialize)]
struct FixtureSubmit {
    ok: bool,
    status: String,
    order_id: Option<String>,
    perm_id: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    filled_qty: i64,
    avg_price: Option<String>,
}

struct FixtureReplayBroker {
    whatif: WhatIfResult,
    submit: SubmitResult,
}

impl BrokerAdapter for FixtureReplayBroker {
    fn connect(&mut self) -> KernelResult<()> {
        Ok(())
    }

    fn disconnect(&mut self) -> KernelResult<()> {
        Ok(())
    }

    fn whatif_order(&mut self, _order_plan: &serde_json::Value) -> KernelResult<WhatIfResult> {
        Ok(self.whatif.clone())
    }

    fn submit_order(&mut self, _order_plan: &serde_json::Value) -> KernelResult<SubmitResult> {
        Ok(self.submit.clone())
    }

    fn cancel_order(&mut self, _order_id: &str) -> KernelResult<()> {
        Ok(())
    }
}

fn write(kernel: &artifact_kernel::Kernel, dir: &std::path::Path, file_name: &str, value: &serde_json::Value) {
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
    let kernel = cli.common.kernel("submit");
    let now = match UtcZ::parse(&cli.common.now_utc) {
        Ok(t) => t,
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
    let risk_budget_doc = match cli_support::read_json_file(&cli.risk_budget_path) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };
    let fixture: BrokerFixture = match cli_support::read_json_file(&cli.broker_fixture_path).and_then(|v| serde_json::from_value(v).map_err(Into::into)) {
        Ok(v) => v,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };

    let mut broker = FixtureReplayBroker {
        whatif: WhatIfResult { margin_change_usd: fixture.whatif.margin_change_usd, notional_usd: fixture.whatif.notional_usd },
        submit: SubmitResult {
            ok: fixture.submit.ok,
            status: fixture.submit.status,
            order_id: fixture.submit.order_id,
            perm_id: fixture.submit.perm_id,
            error_code: fixture.submit.error_code,
            error_message: fixture.submit.error_message,
            filled_qty: fixture.submit.filled_qty,
            avg_price: fixture.submit.avg_price,
        },
    };

    let lineage = LineageFields { engine_id: cli.engine_id, source_intent_id: cli.source_intent_id, intent_sha256: cli.intent_sha256 };

    let outcome = match submit::run(
        &kernel,
        &mut broker,
        &now,
        &cli.day_utc,
        &order_plan,
        &mapping_ledger,
        &binding_record,
        &risk_budget_doc,
        &lineage,
        &cli.env,
    ) {
        Ok(o) => o,
        Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
    };

    match outcome {
        SubmitOutcome::Submission { broker_submission, execution_event } => {
            let broker_rejected = broker_submission.get("broker_ids").map(|ids| ids["order_id"].is_null() && ids["perm_id"].is_null()).unwrap_or(true);
            if broker_rejected || execution_event.is_none() {
                cli_support::fail("C2_BROKER_ADAPTER_NOT_AVAILABLE", "broker did not return order_id/perm_id; submission record written only", ExitCode::BrokerRejected);
            }
            cli_support::ok("SUBMISSION");
        }
        SubmitOutcome::Veto(v) => {
            let binding_hash = artifact_kernel::canon_hash::hash_for_artifact(&binding_record).unwrap_or_default();
            let sub_dir = kernel.store.day_dir("execution_evidence_v1/submissions", &cli.day_utc).join(&binding_hash);
            if let Err(e) = artifact_kernel::immutable_store::ensure_dir_exists(&sub_dir) {
                cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail);
            }
            let veto = match artifact_kernel::fail_closed::build_veto_record(&kernel, &now, "SUBMIT", v.reason_code, &v.reason_detail, &v.partial_hashes, &[], Some(&binding_hash)) {
                Ok(value) => value,
                Err(e) => cli_support::fail(e.reason_code, &e.detail, ExitCode::HardFail),
            };
            write(&kernel, &sub_dir, "veto_record.v1.json", &veto);
            cli_support::fail(v.reason_code, &v.reason_detail, ExitCode::SubmitVeto);
        }
    }
}
