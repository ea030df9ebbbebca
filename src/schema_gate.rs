//! SchemaGate: JSON-Schema Draft 2020-12 validation with fail-closed
//! boundary errors kept distinct from validation failures.
//!
//! Grounded on `constellation_2/phaseD/lib/validate_against_schema_v1.py`'s
//! split between "could not even load/compile the schema" (boundary) and
//! "the instance is invalid" (validation failure), backed by the `jsonschema`
//! crate (grounded in `EffortlessMetrics-agent-backplane`'s Cargo.toml).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{KernelError, KernelResult};

/// A closed registry mapping a logical schema name (`"options_intent.v2"`)
/// to a file under the repo's schema tree. Unknown names are a boundary
/// error, never a validation failure, because asking for a schema that
/// doesn't exist in the registry is a programmer error, not a bad instance.
pub struct SchemaRegistry {
    schema_dir: PathBuf,
    names: HashMap<&'static str, &'static str>,
    compiled: Mutex<HashMap<String, jsonschema::Validator>>,
}

impl SchemaRegistry {
    pub fn new(schema_dir: impl Into<PathBuf>) -> Self {
        let mut names = HashMap::new();
        for (k, v) in KNOWN_SCHEMAS {
            names.insert(*k, *v);
        }
        Self { schema_dir: schema_dir.into(), names, compiled: Mutex::new(HashMap::new()) }
    }

    fn schema_path(&self, schema_name: &str) -> KernelResult<PathBuf> {
        let file = self
            .names
            .get(schema_name)
            .ok_or_else(|| KernelError::new("SCHEMA_UNKNOWN_NAME", schema_name.to_string()))?;
        Ok(self.schema_dir.join(file))
    }

    /// Validates `obj` against `schema_name`. `Ok(())` means valid. A
    /// boundary error (unknown schema, unreadable file, malformed schema
    /// document, compile failure) and a validation failure (the instance
    /// itself is invalid) are both returned as `Err(KernelError)`, but with
    /// distinct reason codes so callers/FailClosedController can tell them
    /// apart without string matching.
    pub fn validate(&self, schema_name: &str, obj: &serde_json::Value) -> KernelResult<()> {
        let path = self.schema_path(schema_name)?;
        let mut cache = self.compiled.lock();
        if !cache.contains_key(schema_name) {
            let validator = compile_schema(&path)?;
            cache.insert(schema_name.to_string(), validator);
        }
        let validator = cache.get(schema_name).expect("just inserted");
        match validator.iter_errors(obj).next() {
            None => Ok(()),
            Some(first) => Err(KernelError::new(
                "SCHEMA_VALIDATION_FAILED",
                format!("path='{}' schema_path='{}' message='{}'", first.instance_path, first.schema_path, first),
            )),
        }
    }
}

fn compile_schema(path: &Path) -> KernelResult<jsonschema::Validator> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| KernelError::new("SCHEMA_IO_ERROR", format!("{}: {e}", path.display())))?;
    let doc: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| KernelError::new("SCHEMA_MALFORMED", format!("{}: {e}", path.display())))?;
    jsonschema::validator_for(&doc)
        .map_err(|e| KernelError::new("SCHEMA_COMPILE_FAILED", format!("{}: {e}", path.display())))
}

/// Every `schema_name` this kernel is allowed to reference, mapped to its
/// file under `schemas/`. Adding a new artifact type means adding a row
/// here and the corresponding schema file — never a dynamic lookup.
const KNOWN_SCHEMAS: &[(&str, &str)] = &[
    ("options_intent.v2", "options_intent.v2.schema.json"),
    ("options_chain_snapshot.v1", "options_chain_snapshot.v1.schema.json"),
    ("freshness_certificate.v1", "freshness_certificate.v1.schema.json"),
    ("order_plan.v1", "order_plan.v1.schema.json"),
    ("equity_order_plan.v1", "equity_order_plan.v1.schema.json"),
    ("equity_order_plan.v2", "equity_order_plan.v2.schema.json"),
    ("mapping_ledger_record.v1", "mapping_ledger_record.v1.schema.json"),
    ("mapping_ledger_record.v2", "mapping_ledger_record.v2.schema.json"),
    ("binding_record.v1", "binding_record.v1.schema.json"),
    ("binding_record.v2", "binding_record.v2.schema.json"),
    ("submit_preflight_decision.v1", "submit_preflight_decision.v1.schema.json"),
    ("veto_record.v1", "veto_record.v1.schema.json"),
    ("broker_submission_record.v2", "broker_submission_record.v2.schema.json"),
    ("execution_event_record.v1", "execution_event_record.v1.schema.json"),
    ("positions_snapshot.v5", "positions_snapshot.v5.schema.json"),
    ("position_lifecycle_snapshot.v1", "position_lifecycle_snapshot.v1.schema.json"),
    ("defined_risk_snapshot.v1", "defined_risk_snapshot.v1.schema.json"),
    ("accounting_nav.v1", "accounting_nav.v1.schema.json"),
    ("accounting_exposure.v1", "accounting_exposure.v1.schema.json"),
    ("accounting_attribution.v1", "accounting_attribution.v1.schema.json"),
    ("accounting_failure.v1", "accounting_failure.v1.schema.json"),
    ("allocation_decision.v1", "allocation_decision.v1.schema.json"),
    ("allocation_summary.v1", "allocation_summary.v1.schema.json"),
    ("allocation_latest_pointer.v1", "allocation_latest_pointer.v1.schema.json"),
    ("allocation_failure.v1", "allocation_failure.v1.schema.json"),
    ("risk_budget.v1", "risk_budget.v1.schema.json"),
    ("cash_ledger_snapshot.v1", "cash_ledger_snapshot.v1.schema.json"),
    ("positions_effective_pointer.v1", "positions_effective_pointer.v1.schema.json"),
    ("day_report.v1", "day_report.v1.schema.json"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new(concat!(env!("CARGO_MANIFEST_DIR"), "/schemas"))
    }

    #[test]
    fn unknown_schema_name_is_a_boundary_error() {
        let err = registry().validate("no_such_schema", &json!({})).unwrap_err();
        assert_eq!(err.reason_code, "SCHEMA_UNKNOWN_NAME");
    }

    #[test]
    fn missing_required_field_is_a_validation_failure() {
        let err = registry().validate("risk_budget.v1", &json!({"schema_id": "risk_budget"})).unwrap_err();
        assert_eq!(err.reason_code, "SCHEMA_VALIDATION_FAILED");
    }

    #[test]
    fn valid_instance_passes() {
        let obj = json!({"schema_id": "risk_budget", "schema_version": "v1", "max_margin_usd": "1000", "max_notional_usd": "5000"});
        registry().validate("risk_budget.v1", &obj).unwrap();
    }
}
