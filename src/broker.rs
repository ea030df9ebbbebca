//! `BrokerAdapter`: the abstract contract the kernel submits through.
//!
//! Per spec.md §1/§5 the kernel is single-threaded, synchronous, and never
//! touches the network itself; real broker connectivity is an out-of-scope
//! collaborator. This module defines only the contract
//! (`connect/disconnect/whatif/submit/cancel`) plus an in-memory test
//! double used by the submit-boundary tests, grounded on
//! `constellation_2/phaseD/lib/submit_boundary_paper_v4.py`'s use of
//! `IBPaperAdapterV2`.

use crate::error::KernelResult;

#[derive(Debug, Clone)]
pub struct BrokerConnectionSpec {
    pub host: String,
    pub port: u16,
    pub client_id: i64,
}

/// All monetary values are JSON-safe decimal strings, never floats.
#[derive(Debug, Clone)]
pub struct WhatIfResult {
    pub margin_change_usd: String,
    pub notional_usd: String,
}

#[derive(Debug, Clone)]
pub struct SubmitResult {
    pub ok: bool,
    pub status: String,
    pub order_id: Option<String>,
    pub perm_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Immediate fill information a paper/simulated adapter may report at
    /// submit time. A live adapter with async fills would leave these at
    /// zero/`None` and rely on a later evidence-mirroring pass instead.
    pub filled_qty: i64,
    pub avg_price: Option<String>,
}

/// The contract only; no implementation of a real network adapter belongs
/// in this kernel.
pub trait BrokerAdapter {
    fn connect(&mut self) -> KernelResult<()>;
    fn disconnect(&mut self) -> KernelResult<()>;
    fn whatif_order(&mut self, order_plan: &serde_json::Value) -> KernelResult<WhatIfResult>;
    fn submit_order(&mut self, order_plan: &serde_json::Value) -> KernelResult<SubmitResult>;
    fn cancel_order(&mut self, order_id: &str) -> KernelResult<()>;
}

/// A deterministic, connection-free double used only by this repository's
/// own tests to exercise `SubmitBoundary` without a real broker.
#[cfg(test)]
pub struct ScriptedPaperBroker {
    pub connected: bool,
    pub whatif: WhatIfResult,
    pub submit: SubmitResult,
}

#[cfg(test)]
impl BrokerAdapter for ScriptedPaperBroker {
    fn connect(&mut self) -> KernelResult<()> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> KernelResult<()> {
        self.connected = false;
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
