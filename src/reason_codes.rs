//! The closed reason-code enumeration used by every `VetoRecord` and
//! `FailureRecord` (spec.md §6). Kept as associated constants rather than
//! an enum so each stage's error sites can reference them directly instead
//! of reconstructing a code from free text (Open Question (a): the
//! original's mapper classified reason codes by substring-matching a
//! rendered exception message; here every error site already carries its
//! code).

pub const C2_OPTIONS_ONLY_VIOLATION: &str = "C2_OPTIONS_ONLY_VIOLATION";
pub const C2_DEFINED_RISK_REQUIRED: &str = "C2_DEFINED_RISK_REQUIRED";
pub const C2_EXIT_POLICY_REQUIRED: &str = "C2_EXIT_POLICY_REQUIRED";
pub const C2_FRESHNESS_CERT_INVALID_OR_EXPIRED: &str = "C2_FRESHNESS_CERT_INVALID_OR_EXPIRED";
pub const C2_MAPPING_FAIL_CLOSED_REQUIRED: &str = "C2_MAPPING_FAIL_CLOSED_REQUIRED";
pub const C2_SUBMIT_FAIL_CLOSED_REQUIRED: &str = "C2_SUBMIT_FAIL_CLOSED_REQUIRED";
pub const C2_DETERMINISM_CANONICALIZATION_FAILED: &str = "C2_DETERMINISM_CANONICALIZATION_FAILED";
pub const C2_NONDETERMINISTIC_SELECTION_RULE: &str = "C2_NONDETERMINISTIC_SELECTION_RULE";
pub const C2_PRICE_DETERMINISM_FAILED: &str = "C2_PRICE_DETERMINISM_FAILED";
pub const C2_BINDING_HASH_MISMATCH: &str = "C2_BINDING_HASH_MISMATCH";
pub const C2_BROKER_ENV_NOT_PAPER: &str = "C2_BROKER_ENV_NOT_PAPER";
pub const C2_BROKER_ADAPTER_NOT_AVAILABLE: &str = "C2_BROKER_ADAPTER_NOT_AVAILABLE";
pub const C2_WHATIF_REQUIRED: &str = "C2_WHATIF_REQUIRED";
pub const C2_RISK_BUDGET_SCHEMA_INVALID: &str = "C2_RISK_BUDGET_SCHEMA_INVALID";
pub const C2_RISK_BUDGET_EXCEEDED: &str = "C2_RISK_BUDGET_EXCEEDED";
pub const C2_IDEMPOTENCY_DUPLICATE_SUBMISSION: &str = "C2_IDEMPOTENCY_DUPLICATE_SUBMISSION";
pub const C2_LINEAGE_VIOLATION: &str = "C2_LINEAGE_VIOLATION";
pub const C2_SINGLE_WRITER_VIOLATION: &str = "C2_SINGLE_WRITER_VIOLATION";
pub const C2_KILL_SWITCH_ACTIVE: &str = "C2_KILL_SWITCH_ACTIVE";
pub const C2_SYNTHETIC_BROKER_STATUS_REJECTED: &str = "C2_SYNTHETIC_BROKER_STATUS_REJECTED";
pub const PRODUCER_GIT_SHA_MISMATCH_FOR_EXISTING_DAY: &str = "PRODUCER_GIT_SHA_MISMATCH_FOR_EXISTING_DAY";

/// `AllocationGate`'s codes live in a separate `G_*` namespace in the
/// original (it is a distinct bounded context from the `C2_*` submission
/// pipeline) and are reproduced verbatim here.
pub const G_BLOCK_ACCOUNTING_NOT_OK: &str = "G_BLOCK_ACCOUNTING_NOT_OK";
pub const G_INTENTS_DAY_DIR_MISSING: &str = "G_INTENTS_DAY_DIR_MISSING";
pub const G_INTENTS_DAY_DIR_EMPTY: &str = "G_INTENTS_DAY_DIR_EMPTY";
pub const G_UNSUPPORTED_INTENT_SCHEMA: &str = "G_UNSUPPORTED_INTENT_SCHEMA";
pub const G_ENGINE_NOT_ALLOCATED: &str = "G_ENGINE_NOT_ALLOCATED";
pub const G_INTENT_EXCEEDS_ENGINE_CAP: &str = "G_INTENT_EXCEEDS_ENGINE_CAP";
pub const G_EXIT_INTENT_ALWAYS_ALLOWED_V2: &str = "G_EXIT_INTENT_ALWAYS_ALLOWED_V2";

/// Accounting's fail-closed boundary code for the cents/dollars invariant
/// (Open Question (c): kept deliberately strict).
pub const CENTS_NOT_DIVISIBLE_BY_100: &str = "CENTS_NOT_DIVISIBLE_BY_100";
