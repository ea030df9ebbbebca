//! SnapshotBuilder: assembles an immutable `OptionsChainSnapshot v1` from a
//! raw underlying quote and contract list.
//!
//! Grounded on the `OptionsChainSnapshot v1` data-model entry (spec.md §3)
//! and `phaseA/lib/map_vertical_spread_v1.py`'s contract-record shape, which
//! the mapper later consumes unchanged.

use serde_json::json;

use crate::canon_hash::inject_self_hash;
use crate::decimal_codec;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::timestamp::UtcZ;

#[derive(Debug, Clone)]
pub struct RawContract {
    pub contract_key: String,
    pub expiry_utc: String,
    pub right: String,
    pub strike: String,
    pub bid: String,
    pub ask: String,
    pub open_interest: i64,
    pub volume: i64,
    pub ib_con_id: i64,
    pub ib_local_symbol: String,
}

impl RawContract {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "contract_key": self.contract_key,
            "expiry_utc": self.expiry_utc,
            "right": self.right,
            "strike": self.strike,
            "bid": self.bid,
            "ask": self.ask,
            "open_interest": self.open_interest,
            "volume": self.volume,
            "ib_conId": self.ib_con_id,
            "ib_localSymbol": self.ib_local_symbol,
        })
    }
}

/// Builds, self-hashes, and schema-validates an `OptionsChainSnapshot v1`.
/// `derived.features` is a small deterministic summary computed from the
/// contract list itself, never from wall-clock or external state.
pub fn build_snapshot(
    kernel: &Kernel,
    as_of_utc: &UtcZ,
    symbol: &str,
    spot_price: &str,
    contracts: &[RawContract],
) -> KernelResult<(serde_json::Value, String)> {
    decimal_codec::parse_str_strict(spot_price, "underlying.spot_price")?;
    for c in contracts {
        decimal_codec::parse_str_strict(&c.strike, "contract.strike")?;
        let bid = decimal_codec::parse_str_strict(&c.bid, "contract.bid")?;
        let ask = decimal_codec::parse_str_strict(&c.ask, "contract.ask")?;
        if ask < bid {
            return Err(KernelError::new("ASK_LT_BID_FORBIDDEN", c.contract_key.clone()));
        }
    }

    let mut sorted: Vec<&RawContract> = contracts.iter().collect();
    sorted.sort_by(|a, b| (&a.expiry_utc, &a.right, &a.strike).cmp(&(&b.expiry_utc, &b.right, &b.strike)));

    let call_count = sorted.iter().filter(|c| c.right == "C").count();
    let put_count = sorted.iter().filter(|c| c.right == "P").count();

    let obj = json!({
        "schema_id": "options_chain_snapshot",
        "schema_version": "v1",
        "as_of_utc": as_of_utc.format(),
        "underlying": {"symbol": symbol, "spot_price": spot_price},
        "contracts": sorted.iter().map(|c| c.to_json()).collect::<Vec<_>>(),
        "derived": {
            "features": {
                "contract_count": sorted.len() as i64,
                "call_count": call_count as i64,
                "put_count": put_count as i64,
            }
        },
        "canonical_json_hash": null,
    });
    let (injected, hash) = inject_self_hash(&obj, "canonical_json_hash")
        .map_err(|e| KernelError::new("C2_DETERMINISM_CANONICALIZATION_FAILED", e.to_string()))?;
    kernel.schema_registry.validate("options_chain_snapshot.v1", &injected)?;
    Ok((injected, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::ProducerIdentity;
    use tempfile::tempdir;

    fn kernel(root: &std::path::Path) -> Kernel {
        std::fs::create_dir_all(root.join("schemas")).unwrap();
        for entry in std::fs::read_dir(concat!(env!("CARGO_MANIFEST_DIR"), "/schemas")).unwrap() {
            let entry = entry.unwrap();
            std::fs::copy(entry.path(), root.join("schemas").join(entry.file_name())).unwrap();
        }
        Kernel::new(root, ProducerIdentity { repo: "r".into(), git_sha: "sha".into(), module: "snapshot".into() })
    }

    fn contract(key: &str, strike: &str) -> RawContract {
        RawContract {
            contract_key: key.into(),
            expiry_utc: "2026-02-20T21:00:00Z".into(),
            right: "P".into(),
            strike: strike.into(),
            bid: "1.00".into(),
            ask: "1.10".into(),
            open_interest: 10,
            volume: 5,
            ib_con_id: 1,
            ib_local_symbol: "SPY".into(),
        }
    }

    #[test]
    fn builds_and_self_hashes_deterministically() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let as_of = UtcZ::parse("2026-02-13T21:52:00Z").unwrap();
        let contracts = vec![contract("b", "500.00"), contract("a", "495.00")];
        let (o1, h1) = build_snapshot(&k, &as_of, "SPY", "500.00", &contracts).unwrap();
        let (o2, h2) = build_snapshot(&k, &as_of, "SPY", "500.00", &contracts).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(o1, o2);
        assert_eq!(o1["derived"]["features"]["contract_count"], json!(2));
    }

    #[test]
    fn rejects_inverted_book() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let as_of = UtcZ::parse("2026-02-13T21:52:00Z").unwrap();
        let mut bad = contract("a", "495.00");
        bad.bid = "2.00".into();
        bad.ask = "1.00".into();
        let err = build_snapshot(&k, &as_of, "SPY", "500.00", &[bad]).unwrap_err();
        assert_eq!(err.reason_code, "ASK_LT_BID_FORBIDDEN");
    }
}
