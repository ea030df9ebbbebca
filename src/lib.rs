//! Deterministic Artifact Kernel.
//!
//! Transforms trading intents and market snapshots into an immutable,
//! hash-chained audit ledger: intent -> mapping -> preflight -> broker
//! submission -> execution evidence -> positions -> accounting ->
//! allocation -> reporting.
//!
//! The kernel never executes trades, never touches the network, and never
//! reads the wall clock; every timestamp it embeds in truth is supplied by
//! the caller. See `SPEC_FULL.md` for the full design.

pub mod error;
pub mod value;
pub mod canon_hash;
pub mod decimal_codec;
pub mod timestamp;
pub mod schema_gate;
pub mod immutable_store;
pub mod reason_codes;
pub mod kernel;
pub mod broker;
pub mod fail_closed;
pub mod artifacts;
pub mod cli_support;

pub use error::KernelError;
pub use kernel::Kernel;
