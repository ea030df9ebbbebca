//! Kernel-wide error type.
//!
//! Every fallible kernel operation returns `Result<T, KernelError>`.
//! `reason_code` is drawn from the closed enumeration in `reason_codes.rs`
//! wherever the error is invariant/domain-shaped; boundary errors (schema
//! load, canonicalization, decimal parse, filesystem) carry their own
//! stable code instead. The FailClosedController is the only place that
//! turns a `KernelError` into a written artifact.

use std::fmt;

#[derive(Debug, Clone)]
pub struct KernelError {
    pub reason_code: &'static str,
    pub detail: String,
}

impl KernelError {
    pub fn new(reason_code: &'static str, detail: impl Into<String>) -> Self {
        Self { reason_code, detail: detail.into() }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason_code, self.detail)
    }
}

impl std::error::Error for KernelError {}

impl From<std::io::Error> for KernelError {
    fn from(e: std::io::Error) -> Self {
        KernelError::new("IO_ERROR", e.to_string())
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(e: serde_json::Error) -> Self {
        KernelError::new("JSON_PARSE_ERROR", e.to_string())
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
