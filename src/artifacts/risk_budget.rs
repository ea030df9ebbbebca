//! RiskBudgetGate: a pure function from a schema-validated `RiskBudget` and
//! a broker what-if projection to `ALLOW`/`BLOCK`.
//!
//! Grounded on spec.md §4.8 and `submit_boundary_paper_v4.py`'s risk-budget
//! check immediately after `whatif_order`.

use rust_decimal::Decimal;

use crate::broker::WhatIfResult;
use crate::decimal_codec;
use crate::error::KernelResult;
use crate::kernel::Kernel;
use crate::reason_codes::*;

pub enum RiskBudgetDecision {
    Allow,
    Block { reason_code: &'static str, detail: String },
}

/// `engine_cap_margin_usd`/`engine_cap_notional_usd` are the per-engine caps
/// if the RiskBudget document carries them for this `engine_id`; when absent
/// the portfolio-wide caps in `risk_budget` apply instead.
pub fn evaluate(
    kernel: &Kernel,
    risk_budget: &serde_json::Value,
    whatif: &WhatIfResult,
    engine_cap_margin_usd: Option<&str>,
    engine_cap_notional_usd: Option<&str>,
) -> KernelResult<RiskBudgetDecision> {
    if kernel.schema_registry.validate("risk_budget.v1", risk_budget).is_err() {
        return Ok(RiskBudgetDecision::Block {
            reason_code: C2_RISK_BUDGET_SCHEMA_INVALID,
            detail: "risk_budget failed schema validation".to_string(),
        });
    }

    let parse = |field: &str, fallback: &str| -> KernelResult<Decimal> {
        let s = risk_budget.get(field).and_then(|v| v.as_str()).unwrap_or(fallback);
        decimal_codec::parse_str_strict(s, field)
    };
    let portfolio_margin_cap = parse("max_margin_usd", "0")?;
    let portfolio_notional_cap = parse("max_notional_usd", "0")?;

    let margin_cap = match engine_cap_margin_usd {
        Some(s) => decimal_codec::parse_str_strict(s, "engine_cap_margin_usd")?,
        None => portfolio_margin_cap,
    };
    let notional_cap = match engine_cap_notional_usd {
        Some(s) => decimal_codec::parse_str_strict(s, "engine_cap_notional_usd")?,
        None => portfolio_notional_cap,
    };

    let margin_change = decimal_codec::parse_str_strict(&whatif.margin_change_usd, "margin_change_usd")?;
    let notional = decimal_codec::parse_str_strict(&whatif.notional_usd, "notional_usd")?;

    if margin_change > margin_cap {
        return Ok(RiskBudgetDecision::Block {
            reason_code: C2_RISK_BUDGET_EXCEEDED,
            detail: format!("margin_change_usd {margin_change} exceeds cap {margin_cap}"),
        });
    }
    if notional > notional_cap {
        return Ok(RiskBudgetDecision::Block {
            reason_code: C2_RISK_BUDGET_EXCEEDED,
            detail: format!("notional_usd {notional} exceeds cap {notional_cap}"),
        });
    }
    Ok(RiskBudgetDecision::Allow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::ProducerIdentity;
    use serde_json::json;
    use tempfile::tempdir;

    fn kernel(root: &std::path::Path) -> Kernel {
        std::fs::create_dir_all(root.join("schemas")).unwrap();
        for entry in std::fs::read_dir(concat!(env!("CARGO_MANIFEST_DIR"), "/schemas")).unwrap() {
            let entry = entry.unwrap();
            std::fs::copy(entry.path(), root.join("schemas").join(entry.file_name())).unwrap();
        }
        Kernel::new(root, ProducerIdentity { repo: "r".into(), git_sha: "sha".into(), module: "risk_budget".into() })
    }

    #[test]
    fn breach_blocks_with_exceeded_code() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let rb = json!({"schema_id": "risk_budget", "schema_version": "v1", "max_margin_usd": "1000", "max_notional_usd": "100000"});
        let whatif = WhatIfResult { margin_change_usd: "999999".into(), notional_usd: "1000".into() };
        match evaluate(&k, &rb, &whatif, None, None).unwrap() {
            RiskBudgetDecision::Block { reason_code, .. } => assert_eq!(reason_code, C2_RISK_BUDGET_EXCEEDED),
            RiskBudgetDecision::Allow => panic!("expected block"),
        }
    }

    #[test]
    fn within_caps_allows() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let rb = json!({"schema_id": "risk_budget", "schema_version": "v1", "max_margin_usd": "1000", "max_notional_usd": "100000"});
        let whatif = WhatIfResult { margin_change_usd: "500".into(), notional_usd: "9000".into() };
        assert!(matches!(evaluate(&k, &rb, &whatif, None, None).unwrap(), RiskBudgetDecision::Allow));
    }

    #[test]
    fn malformed_budget_is_schema_invalid() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let rb = json!({"schema_id": "risk_budget"});
        let whatif = WhatIfResult { margin_change_usd: "1".into(), notional_usd: "1".into() };
        match evaluate(&k, &rb, &whatif, None, None).unwrap() {
            RiskBudgetDecision::Block { reason_code, .. } => assert_eq!(reason_code, C2_RISK_BUDGET_SCHEMA_INVALID),
            RiskBudgetDecision::Allow => panic!("expected block"),
        }
    }
}
