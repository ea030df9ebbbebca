//! Mapper: vertical-spread option mapping (spec.md §4.5).
//!
//! Grounded on `constellation_2/phaseA/lib/map_vertical_spread_v1.py`. Every
//! fallible step returns a `MapperError` that already carries its
//! `reason_code` (Open Question (a) resolved: no substring matching on a
//! rendered message anywhere in this module — see DESIGN.md).

use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;

use crate::artifacts::binding::{build_binding_record, ib_bag_order_v1_digest, BrokerLeg};
use crate::canon_hash::{canonical_hash, hash_for_artifact, inject_self_hash};
use crate::decimal_codec::{self, TickRounding};
use crate::fail_closed::VetoInputs;
use crate::kernel::Kernel;
use crate::reason_codes::*;
use crate::timestamp::{dte_days_calendar, UtcZ};

#[derive(Debug, Clone)]
pub struct MapperError {
    pub reason_code: &'static str,
    pub reason_detail: String,
    pub partial_hashes: VetoInputs,
}

impl MapperError {
    fn new(reason_code: &'static str, detail: impl Into<String>, partial: VetoInputs) -> Self {
        Self { reason_code, reason_detail: detail.into(), partial_hashes: partial }
    }
}

pub struct MapSuccess {
    pub order_plan: serde_json::Value,
    pub mapping_ledger_record: serde_json::Value,
    pub binding_record: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Right {
    Put,
    Call,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Credit,
    Debit,
}

#[derive(Debug, Clone)]
struct Contract {
    contract_key: String,
    expiry_utc: String,
    right: Right,
    strike: Decimal,
    strike_str: String,
    bid: Decimal,
    ask: Decimal,
    open_interest: i64,
    volume: i64,
    ib_con_id: i64,
    ib_local_symbol: String,
}

struct LiquidityPolicy {
    min_oi: i64,
    min_volume: i64,
    max_spread: Decimal,
}

fn liquid(c: &Contract, pol: &LiquidityPolicy) -> bool {
    c.open_interest >= pol.min_oi && c.volume >= pol.min_volume && (c.ask - c.bid) <= pol.max_spread
}

fn req_str<'a>(v: &'a serde_json::Value, path: &[&str], field: &str, partial: &VetoInputs) -> Result<&'a str, MapperError> {
    let mut cur = v;
    for p in path {
        cur = cur.get(*p).ok_or_else(|| MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, format!("missing field {field}"), partial.clone()))?;
    }
    cur.as_str().ok_or_else(|| MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, format!("field not a string: {field}"), partial.clone()))
}

fn req_dec(v: &serde_json::Value, path: &[&str], field: &str, partial: &VetoInputs) -> Result<Decimal, MapperError> {
    let mut cur = v;
    for p in path {
        cur = cur.get(*p).ok_or_else(|| MapperError::new(C2_PRICE_DETERMINISM_FAILED, format!("missing field {field}"), partial.clone()))?;
    }
    let as_value = crate::value::Value::from_json(cur)
        .map_err(|e| MapperError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;
    decimal_codec::parse_strict(&as_value, field).map_err(|e| MapperError::new(C2_PRICE_DETERMINISM_FAILED, e.to_string(), partial.clone()))
}

fn parse_contracts(chain: &serde_json::Value, partial: &VetoInputs) -> Result<Vec<Contract>, MapperError> {
    let arr = chain
        .get("contracts")
        .and_then(|c| c.as_array())
        .ok_or_else(|| MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, "chain.contracts missing", partial.clone()))?;
    let mut out = Vec::with_capacity(arr.len());
    let mut seen: BTreeMap<(String, &'static str, String), ()> = BTreeMap::new();
    for c in arr {
        let contract_key = c.get("contract_key").and_then(|v| v.as_str()).ok_or_else(|| {
            MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, "contract missing contract_key", partial.clone())
        })?.to_string();
        let expiry_utc = c.get("expiry_utc").and_then(|v| v.as_str()).ok_or_else(|| {
            MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, "contract missing expiry_utc", partial.clone())
        })?.to_string();
        let right_s = c.get("right").and_then(|v| v.as_str()).ok_or_else(|| {
            MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, "contract missing right", partial.clone())
        })?;
        let right = match right_s {
            "P" => Right::Put,
            "C" => Right::Call,
            other => return Err(MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, format!("unknown right: {other}"), partial.clone())),
        };
        let strike_str = c.get("strike").and_then(|v| v.as_str()).ok_or_else(|| {
            MapperError::new(C2_PRICE_DETERMINISM_FAILED, "contract missing strike", partial.clone())
        })?.to_string();
        let strike = decimal_codec::parse_str_strict(&strike_str, "strike")
            .map_err(|e| MapperError::new(C2_PRICE_DETERMINISM_FAILED, e.to_string(), partial.clone()))?;
        let bid = req_dec(c, &["bid"], "bid", partial)?;
        let ask = req_dec(c, &["ask"], "ask", partial)?;
        let open_interest = c.get("open_interest").and_then(|v| v.as_i64()).unwrap_or(0);
        let volume = c.get("volume").and_then(|v| v.as_i64()).unwrap_or(0);
        let ib_con_id = c.get("ib_conId").and_then(|v| v.as_i64()).unwrap_or(0);
        let ib_local_symbol = c.get("ib_localSymbol").and_then(|v| v.as_str()).unwrap_or("").to_string();

        let key = (expiry_utc.clone(), if right == Right::Put { "P" } else { "C" }, strike_str.clone());
        if seen.insert(key, ()).is_some() {
            return Err(MapperError::new(C2_NONDETERMINISTIC_SELECTION_RULE, format!("duplicate contract key at ({expiry_utc},{right_s},{strike_str})"), partial.clone()));
        }

        out.push(Contract { contract_key, expiry_utc, right, strike, strike_str, bid, ask, open_interest, volume, ib_con_id, ib_local_symbol });
    }
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
pub fn map_vertical_spread(
    kernel: &Kernel,
    intent: &serde_json::Value,
    chain: &serde_json::Value,
    cert: &serde_json::Value,
    now_utc: &UtcZ,
    tick_size: &str,
) -> Result<MapSuccess, MapperError> {
    let mut partial = VetoInputs::default();

    kernel
        .schema_registry
        .validate("options_intent.v2", intent)
        .map_err(|e| MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, e.to_string(), partial.clone()))?;
    kernel
        .schema_registry
        .validate("options_chain_snapshot.v1", chain)
        .map_err(|e| MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, e.to_string(), partial.clone()))?;
    kernel
        .schema_registry
        .validate("freshness_certificate.v1", cert)
        .map_err(|e| MapperError::new(C2_FRESHNESS_CERT_INVALID_OR_EXPIRED, e.to_string(), partial.clone()))?;

    let intent_hash = hash_for_artifact(intent).map_err(|e| MapperError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;
    let chain_hash = hash_for_artifact(chain).map_err(|e| MapperError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;
    let cert_hash = hash_for_artifact(cert).map_err(|e| MapperError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;
    partial.intent_hash = Some(intent_hash.clone());
    partial.chain_snapshot_hash = Some(chain_hash.clone());
    partial.freshness_cert_hash = Some(cert_hash.clone());

    let structure = req_str(intent, &["strategy", "structure"], "strategy.structure", &partial)?;
    if structure != "VERTICAL_SPREAD" {
        return Err(MapperError::new(C2_OPTIONS_ONLY_VIOLATION, format!("unsupported structure: {structure}"), partial));
    }
    let suite = req_str(intent, &["engine", "suite"], "engine.suite", &partial)?;
    if suite != "C2_OPTIONS_7" {
        return Err(MapperError::new(C2_OPTIONS_ONLY_VIOLATION, format!("unsupported engine suite: {suite}"), partial));
    }

    // Freshness: snapshot binding + validity window.
    let cert_snapshot_hash = cert.get("snapshot_hash").and_then(|v| v.as_str()).unwrap_or("");
    let cert_snapshot_asof = cert.get("snapshot_as_of_utc").and_then(|v| v.as_str()).unwrap_or("");
    let chain_asof = chain.get("as_of_utc").and_then(|v| v.as_str()).unwrap_or("");
    if cert_snapshot_hash != chain_hash || cert_snapshot_asof != chain_asof {
        return Err(MapperError::new(C2_FRESHNESS_CERT_INVALID_OR_EXPIRED, "snapshot binding mismatch", partial));
    }
    let valid_from = UtcZ::parse(cert.get("valid_from_utc").and_then(|v| v.as_str()).unwrap_or(""))
        .map_err(|e| MapperError::new(C2_FRESHNESS_CERT_INVALID_OR_EXPIRED, e.to_string(), partial.clone()))?;
    let valid_until = UtcZ::parse(cert.get("valid_until_utc").and_then(|v| v.as_str()).unwrap_or(""))
        .map_err(|e| MapperError::new(C2_FRESHNESS_CERT_INVALID_OR_EXPIRED, e.to_string(), partial.clone()))?;
    if *now_utc < valid_from || *now_utc > valid_until {
        return Err(MapperError::new(C2_FRESHNESS_CERT_INVALID_OR_EXPIRED, "now outside validity window", partial));
    }

    let tick = decimal_codec::parse_str_strict(tick_size, "tick_size")
        .map_err(|e| MapperError::new(C2_PRICE_DETERMINISM_FAILED, e.to_string(), partial.clone()))?;
    if tick <= Decimal::ZERO {
        return Err(MapperError::new(C2_PRICE_DETERMINISM_FAILED, "tick_size must be positive", partial));
    }

    let exit_policy = intent.get("exit_policy").and_then(|v| v.as_object());
    if exit_policy.is_none() {
        return Err(MapperError::new(C2_EXIT_POLICY_REQUIRED, "exit_policy missing", partial));
    }

    let expiry_policy_mode = req_str(intent, &["selection_policy", "expiry_policy", "mode"], "expiry_policy.mode", &partial)?;
    if expiry_policy_mode != "DTE_WINDOW" {
        return Err(MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, format!("unsupported expiry_policy.mode: {expiry_policy_mode}"), partial));
    }
    let dte_min = intent.get("selection_policy").and_then(|p| p.get("expiry_policy")).and_then(|p| p.get("dte_min")).and_then(|v| v.as_i64()).unwrap_or(0);
    let dte_max = intent.get("selection_policy").and_then(|p| p.get("expiry_policy")).and_then(|p| p.get("dte_max")).and_then(|v| v.as_i64()).unwrap_or(i64::MAX);

    let right_wanted_s = req_str(intent, &["strategy", "right"], "strategy.right", &partial)?;
    let right_wanted = match right_wanted_s {
        "PUT" => Right::Put,
        "CALL" => Right::Call,
        other => return Err(MapperError::new(C2_OPTIONS_ONLY_VIOLATION, format!("unknown right: {other}"), partial)),
    };
    let direction_s = req_str(intent, &["strategy", "direction"], "strategy.direction", &partial)?;
    let direction = match direction_s {
        "CREDIT" => Direction::Credit,
        "DEBIT" => Direction::Debit,
        other => return Err(MapperError::new(C2_OPTIONS_ONLY_VIOLATION, format!("unknown direction: {other}"), partial)),
    };

    let min_oi = intent.get("selection_policy").and_then(|p| p.get("liquidity_policy")).and_then(|p| p.get("min_oi")).and_then(|v| v.as_i64()).unwrap_or(0);
    let min_vol = intent.get("selection_policy").and_then(|p| p.get("liquidity_policy")).and_then(|p| p.get("min_volume")).and_then(|v| v.as_i64()).unwrap_or(0);
    let max_spread = req_dec(intent, &["selection_policy", "liquidity_policy", "max_spread"], "liquidity_policy.max_spread", &partial)?;
    let liquidity_policy = LiquidityPolicy { min_oi, min_volume: min_vol, max_spread };

    let contracts = parse_contracts(chain, &partial)?;
    let as_of = UtcZ::parse(chain_asof).map_err(|e| MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, e.to_string(), partial.clone()))?;

    // Expiry selection: lexicographically-earliest ISO-8601 expiry among
    // liquid contracts of the requested right within the DTE window.
    let mut expiries: Vec<&str> = contracts
        .iter()
        .filter(|c| c.right == right_wanted && liquid(c, &liquidity_policy))
        .filter_map(|c| {
            let expiry = UtcZ::parse(&c.expiry_utc).ok()?;
            let dte = dte_days_calendar(&as_of, &expiry).ok()?;
            if dte >= dte_min && dte <= dte_max {
                Some(c.expiry_utc.as_str())
            } else {
                None
            }
        })
        .collect();
    expiries.sort_unstable();
    expiries.dedup();
    let expiry_utc = expiries
        .first()
        .ok_or_else(|| MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, "no liquid contract in DTE window", partial.clone()))?
        .to_string();

    let spot = req_dec(chain, &["underlying", "spot_price"], "underlying.spot_price", &partial)?;
    let width = req_dec(intent, &["selection_policy", "width_policy", "width"], "width_policy.width", &partial)?;

    let mut candidates: Vec<&Contract> = contracts
        .iter()
        .filter(|c| c.right == right_wanted && c.expiry_utc == expiry_utc && liquid(c, &liquidity_policy))
        .collect();
    candidates.sort_by(|a, b| a.strike.cmp(&b.strike).then_with(|| a.contract_key.cmp(&b.contract_key)));
    if candidates.is_empty() {
        return Err(MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, "no liquid candidate strikes", partial));
    }

    let (short, long_strike): (&Contract, Decimal) = match (direction, right_wanted) {
        (Direction::Credit, Right::Put) => {
            let s = candidates.iter().filter(|c| c.strike <= spot).last().copied();
            let s = s.ok_or_else(|| MapperError::new(C2_NONDETERMINISTIC_SELECTION_RULE, "no short strike <= spot", partial.clone()))?;
            (s, s.strike - width)
        }
        (Direction::Credit, Right::Call) => {
            let s = candidates.iter().find(|c| c.strike >= spot).copied();
            let s = s.ok_or_else(|| MapperError::new(C2_NONDETERMINISTIC_SELECTION_RULE, "no short strike >= spot", partial.clone()))?;
            (s, s.strike + width)
        }
        (Direction::Debit, _) => {
            let near = candidates
                .iter()
                .min_by(|a, b| (a.strike - spot).abs().cmp(&(b.strike - spot).abs()).then_with(|| a.contract_key.cmp(&b.contract_key)))
                .copied();
            let near = near.ok_or_else(|| MapperError::new(C2_NONDETERMINISTIC_SELECTION_RULE, "no near strike", partial.clone()))?;
            let far_strike = if right_wanted == Right::Put { near.strike - width } else { near.strike + width };
            (near, far_strike)
        }
    };

    let long_strike_str = decimal_codec::format_2dp(long_strike, "long_strike").map_err(|e| MapperError::new(C2_PRICE_DETERMINISM_FAILED, e.to_string(), partial.clone()))?;
    let long = candidates
        .iter()
        .find(|c| c.strike_str == long_strike_str)
        .copied()
        .ok_or_else(|| MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, format!("required counterpart strike not found: {long_strike_str}"), partial.clone()))?;

    if short.strike == long.strike {
        return Err(MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, "short and long strikes are identical", partial));
    }

    let (short_mid, long_mid) = (
        decimal_codec::mid_full_precision(short.bid, short.ask, "short_mid").map_err(|e| MapperError::new(C2_PRICE_DETERMINISM_FAILED, e.to_string(), partial.clone()))?,
        decimal_codec::mid_full_precision(long.bid, long.ask, "long_mid").map_err(|e| MapperError::new(C2_PRICE_DETERMINISM_FAILED, e.to_string(), partial.clone()))?,
    );
    let spread_mid = match direction {
        Direction::Credit => short_mid - long_mid,
        Direction::Debit => long_mid - short_mid,
    };
    if spread_mid <= Decimal::ZERO {
        return Err(MapperError::new(C2_PRICE_DETERMINISM_FAILED, "spread_mid must be positive", partial));
    }

    let offset = req_dec(intent, &["selection_policy", "pricing_policy", "limit_offset"], "pricing_policy.limit_offset", &partial)?;
    let raw_limit = match direction {
        Direction::Credit => spread_mid - offset,
        Direction::Debit => spread_mid + offset,
    };
    if raw_limit <= Decimal::ZERO {
        return Err(MapperError::new(C2_PRICE_DETERMINISM_FAILED, "raw_limit must be positive", partial));
    }
    let rounding_s = req_str(intent, &["selection_policy", "pricing_policy", "tick_rounding"], "pricing_policy.tick_rounding", &partial)?;
    let rounding = match rounding_s {
        "ROUND_DOWN" => TickRounding::Down,
        "ROUND_UP" => TickRounding::Up,
        other => return Err(MapperError::new(C2_PRICE_DETERMINISM_FAILED, format!("unknown tick_rounding: {other}"), partial)),
    };
    let limit = decimal_codec::tick_quantize(raw_limit, tick, rounding).map_err(|e| MapperError::new(C2_PRICE_DETERMINISM_FAILED, e.to_string(), partial.clone()))?;
    if limit <= Decimal::ZERO {
        return Err(MapperError::new(C2_PRICE_DETERMINISM_FAILED, "limit must be positive", partial));
    }
    let limit_str = decimal_codec::format_2dp(limit, "limit").map_err(|e| MapperError::new(C2_PRICE_DETERMINISM_FAILED, e.to_string(), partial.clone()))?;

    let multiplier: i64 = intent.get("risk").and_then(|r| r.get("multiplier")).and_then(|v| v.as_i64()).unwrap_or(100);
    let contracts_n: i64 = intent.get("risk").and_then(|r| r.get("contracts")).and_then(|v| v.as_i64()).unwrap_or(1);
    let max_loss = match direction {
        Direction::Credit => (width - limit) * Decimal::from(multiplier) * Decimal::from(contracts_n),
        Direction::Debit => limit * Decimal::from(multiplier) * Decimal::from(contracts_n),
    };
    if max_loss <= Decimal::ZERO {
        return Err(MapperError::new(C2_DEFINED_RISK_REQUIRED, "max_loss_usd must be positive", partial));
    }
    let max_loss_str = decimal_codec::usd_quantize(max_loss).and_then(|d| decimal_codec::format_2dp(d, "max_loss_usd")).map_err(|e| MapperError::new(C2_DEFINED_RISK_REQUIRED, e.to_string(), partial.clone()))?;

    let (short_action, long_action) = ("SELL", "BUY");
    let short_strike_str = short.strike_str.clone();

    let seed = json!({
        "kind": "order_plan_id_seed_v1",
        "intent_hash": intent_hash,
        "chain_snapshot_hash": chain_hash,
        "freshness_cert_hash": cert_hash,
        "expiry_utc": expiry_utc,
        "short_contract_key": short.contract_key,
        "long_contract_key": long.contract_key,
        "limit_price": limit_str,
    });
    let plan_id = canonical_hash(&seed).map_err(|e| MapperError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;

    let order_plan = json!({
        "schema_id": "order_plan",
        "schema_version": "v1",
        "plan_id": plan_id,
        "intent_hash": intent_hash,
        "legs": [
            {"action": short_action, "ratio": 1, "right": right_wanted_s, "expiry_utc": expiry_utc, "strike": short_strike_str, "ib_conId": short.ib_con_id, "ib_localSymbol": short.ib_local_symbol},
            {"action": long_action, "ratio": 1, "right": right_wanted_s, "expiry_utc": expiry_utc, "strike": long.strike_str, "ib_conId": long.ib_con_id, "ib_localSymbol": long.ib_local_symbol},
        ],
        "order_terms": {
            "order_type": "LIMIT",
            "limit_price": limit_str,
            "time_in_force": "DAY",
            "is_credit": direction == Direction::Credit,
            "tick_rounding": rounding_s,
        },
        "exit_policy_ref": exit_policy,
        "risk_proof": {
            "defined_risk_proven": true,
            "max_loss_usd": max_loss_str,
            "width_points": decimal_codec::format_2dp(width, "width").unwrap_or_default(),
            "multiplier": multiplier,
            "contracts": contracts_n,
        },
        "canonical_json_hash": null,
    });
    let (order_plan, plan_hash) = inject_self_hash(&order_plan, "canonical_json_hash")
        .map_err(|e| MapperError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;
    kernel
        .schema_registry
        .validate("order_plan.v1", &order_plan)
        .map_err(|e| MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, e.to_string(), partial.clone()))?;
    partial.plan_hash = Some(plan_hash.clone());

    let mledger_seed = json!({
        "kind": "mapping_ledger_id_seed_v1",
        "plan_hash": plan_hash,
        "intent_hash": intent_hash,
        "chain_snapshot_hash": chain_hash,
        "freshness_cert_hash": cert_hash,
    });
    let record_id = canonical_hash(&mledger_seed).map_err(|e| MapperError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;
    let mapping_ledger_record = json!({
        "schema_id": "mapping_ledger_record",
        "schema_version": "v2",
        "record_id": record_id,
        "plan_hash": plan_hash,
        "chain_snapshot_hash": chain_hash,
        "freshness_cert_hash": cert_hash,
        "selection_trace": {
            "expiry_choice": expiry_utc,
            "strike_choice": {"short": short_strike_str, "long": long.strike_str},
            "liquidity_filter": {"min_oi": min_oi, "min_volume": min_vol, "max_spread": decimal_codec::format_2dp(max_spread, "max_spread").unwrap_or_default()},
            "tie_breakers": tie_break_label(direction, right_wanted),
        },
        "canonical_json_hash": null,
    });
    let (mapping_ledger_record, mapping_ledger_hash) = inject_self_hash(&mapping_ledger_record, "canonical_json_hash")
        .map_err(|e| MapperError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;
    kernel
        .schema_registry
        .validate("mapping_ledger_record.v2", &mapping_ledger_record)
        .map_err(|e| MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, e.to_string(), partial.clone()))?;

    let underlying = chain.get("underlying").and_then(|u| u.get("symbol")).and_then(|v| v.as_str()).unwrap_or("").to_string();
    let legs = vec![
        BrokerLeg { con_id: short.ib_con_id, action: short_action.to_string(), ratio: 1 },
        BrokerLeg { con_id: long.ib_con_id, action: long_action.to_string(), ratio: 1 },
    ];
    let (_payload, broker_digest) = ib_bag_order_v1_digest(&underlying, "VERTICAL_SPREAD", "LIMIT", &limit_str, "DAY", &legs)
        .map_err(|e| MapperError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;

    let (binding_record, _binding_hash) = build_binding_record(&plan_hash, &mapping_ledger_hash, Some(&cert_hash), &broker_digest, "IB_BAG_ORDER_V1")
        .map_err(|e| MapperError::new(C2_DETERMINISM_CANONICALIZATION_FAILED, e.to_string(), partial.clone()))?;
    kernel
        .schema_registry
        .validate("binding_record.v2", &binding_record)
        .map_err(|e| MapperError::new(C2_MAPPING_FAIL_CLOSED_REQUIRED, e.to_string(), partial))?;

    Ok(MapSuccess { order_plan, mapping_ledger_record, binding_record })
}

fn tie_break_label(direction: Direction, right: Right) -> &'static str {
    match (direction, right) {
        (Direction::Credit, Right::Put) => "PUT_CREDIT_SHORT=highest_strike_le_spot;tie=contract_key_lex",
        (Direction::Credit, Right::Call) => "CALL_CREDIT_SHORT=lowest_strike_ge_spot;tie=contract_key_lex",
        (Direction::Debit, _) => "DEBIT_NEAR=closest_abs(strike-spot);tie=strike_then_contract_key",
    }
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
        Kernel::new(root, ProducerIdentity { repo: "r".into(), git_sha: "sha".into(), module: "mapper".into() })
    }

    fn sample_intent() -> serde_json::Value {
        json!({
            "schema_id": "options_intent", "schema_version": "v2",
            "engine": {"suite": "C2_OPTIONS_7", "engine_id": "C2_VOL_INCOME_DEFINED_RISK_V1"},
            "strategy": {"structure": "VERTICAL_SPREAD", "right": "PUT", "direction": "CREDIT"},
            "selection_policy": {
                "expiry_policy": {"mode": "DTE_WINDOW", "dte_min": 0, "dte_max": 10},
                "width_policy": {"width": "5.00"},
                "liquidity_policy": {"min_oi": 1, "min_volume": 1, "max_spread": "1.00"},
                "pricing_policy": {"limit_offset": "0.05", "tick_rounding": "ROUND_DOWN"},
            },
            "risk": {"multiplier": 100, "contracts": 1},
            "exit_policy": {"policy_id": "EXIT_V1"},
        })
    }

    fn sample_chain() -> serde_json::Value {
        json!({
            "schema_id": "options_chain_snapshot", "schema_version": "v1",
            "as_of_utc": "2026-02-13T21:52:00Z",
            "underlying": {"symbol": "SPY", "spot_price": "500.00"},
            "contracts": [
                {"contract_key": "SPY-20260220-P-495", "expiry_utc": "2026-02-20T21:00:00Z", "right": "P", "strike": "495.00", "bid": "2.00", "ask": "2.10", "open_interest": 100, "volume": 50, "ib_conId": 1, "ib_localSymbol": "SPY P495"},
                {"contract_key": "SPY-20260220-P-490", "expiry_utc": "2026-02-20T21:00:00Z", "right": "P", "strike": "490.00", "bid": "1.00", "ask": "1.10", "open_interest": 100, "volume": 50, "ib_conId": 2, "ib_localSymbol": "SPY P490"},
            ],
        })
    }

    fn sample_cert(chain_hash: &str) -> serde_json::Value {
        json!({
            "schema_id": "freshness_certificate", "schema_version": "v1",
            "issued_at_utc": "2026-02-13T21:52:00Z",
            "valid_from_utc": "2026-02-13T21:52:00Z",
            "valid_until_utc": "2026-02-13T21:55:00Z",
            "snapshot_hash": chain_hash,
            "snapshot_as_of_utc": "2026-02-13T21:52:00Z",
        })
    }

    #[test]
    fn mapping_is_deterministic_across_two_runs() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let chain = sample_chain();
        let chain_hash = hash_for_artifact(&chain).unwrap();
        let cert = sample_cert(&chain_hash);
        let intent = sample_intent();
        let now = UtcZ::parse("2026-02-13T21:52:00Z").unwrap();

        let r1 = map_vertical_spread(&k, &intent, &chain, &cert, &now, "0.01").unwrap();
        let r2 = map_vertical_spread(&k, &intent, &chain, &cert, &now, "0.01").unwrap();
        assert_eq!(r1.order_plan["canonical_json_hash"], r2.order_plan["canonical_json_hash"]);
        assert_eq!(r1.mapping_ledger_record["canonical_json_hash"], r2.mapping_ledger_record["canonical_json_hash"]);
        assert_eq!(r1.binding_record["canonical_json_hash"], r2.binding_record["canonical_json_hash"]);
    }

    #[test]
    fn freshness_veto_when_now_outside_window() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let chain = sample_chain();
        let chain_hash = hash_for_artifact(&chain).unwrap();
        let cert = sample_cert(&chain_hash);
        let intent = sample_intent();
        let now = UtcZ::parse("2026-02-13T22:00:00Z").unwrap();

        let err = map_vertical_spread(&k, &intent, &chain, &cert, &now, "0.01").unwrap_err();
        assert_eq!(err.reason_code, C2_FRESHNESS_CERT_INVALID_OR_EXPIRED);
    }

    #[test]
    fn put_credit_picks_highest_strike_le_spot() {
        let dir = tempdir().unwrap();
        let k = kernel(dir.path());
        let chain = sample_chain();
        let chain_hash = hash_for_artifact(&chain).unwrap();
        let cert = sample_cert(&chain_hash);
        let intent = sample_intent();
        let now = UtcZ::parse("2026-02-13T21:52:00Z").unwrap();
        let r = map_vertical_spread(&k, &intent, &chain, &cert, &now, "0.01").unwrap();
        assert_eq!(r.order_plan["legs"][0]["strike"], json!("495.00"));
        assert_eq!(r.order_plan["legs"][1]["strike"], json!("490.00"));
    }
}
