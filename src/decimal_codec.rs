//! DecimalCodec: strict decimal parse/format, no binary floats anywhere.
//!
//! Grounded on `constellation_2/phaseB/lib/decimal_determinism_v1.py`
//! (`parse_decimal_strict_v1`, `quantize_2dp_v1`, `decimal_to_str_2dp_v1`,
//! `add_2dp_str_v1`/`sub_2dp_str_v1`/`mid_2dp_str_v1`) and
//! `phaseA/lib/map_vertical_spread_v1.py::_tick_quantize`. Backed by
//! `rust_decimal`, the decimal crate the pack's trading repos (e.g.
//! `LenWilliamson-chapaty`, `Zuytan-rustrade`) already depend on.

use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

use crate::error::{KernelError, KernelResult};
use crate::value::Value;

/// `ROUND_HALF_UP` in the decimal module sense rounds ties away from zero,
/// which is what `rust_decimal::RoundingStrategy::MidpointAwayFromZero`
/// implements.
const ROUND_HALF_UP: RoundingStrategy = RoundingStrategy::MidpointAwayFromZero;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickRounding {
    /// `ROUND_DOWN` in the mapping policy vocabulary: floor toward negative infinity.
    Down,
    /// `ROUND_UP`: ceiling toward positive infinity.
    Up,
}

fn boundary(code: &'static str, detail: impl Into<String>) -> KernelError {
    KernelError::new(code, detail)
}

/// Accepts an integer or a non-empty, non-scientific-notation decimal
/// string. Floats are unrepresentable in `Value` so they are rejected one
/// layer up, at the `serde_json::Value -> Value` boundary.
pub fn parse_strict(v: &Value, field: &str) -> KernelResult<Decimal> {
    match v {
        Value::Null => Err(boundary("DECIMAL_MISSING", field)),
        Value::Int(i) => Ok(Decimal::from(*i)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Err(boundary("DECIMAL_EMPTY", field));
            }
            if s.to_ascii_lowercase().contains('e') {
                return Err(boundary("SCIENTIFIC_NOTATION_FORBIDDEN", field));
            }
            Decimal::from_str(s).map_err(|e| boundary("DECIMAL_INVALID", format!("{field}: {e}")))
        }
        _ => Err(boundary("DECIMAL_TYPE_FORBIDDEN", field)),
    }
}

pub fn parse_str_strict(s: &str, field: &str) -> KernelResult<Decimal> {
    parse_strict(&Value::String(s.to_string()), field)
}

pub fn quantize_2dp(d: Decimal, _field: &str) -> KernelResult<Decimal> {
    Ok(d.round_dp_with_strategy(2, ROUND_HALF_UP))
}

/// Formats with exactly 2 fixed decimal digits, e.g. `"12.30"`. Never
/// produces exponent notation (rust_decimal's `Display` doesn't either, but
/// the check is kept to mirror the original's defense-in-depth).
pub fn format_2dp(d: Decimal, field: &str) -> KernelResult<String> {
    let q = quantize_2dp(d, field)?;
    let s = format!("{q:.2}");
    if s.to_ascii_lowercase().contains('e') {
        return Err(boundary("DECIMAL_EXPONENT_FORBIDDEN", field));
    }
    let frac_len = s.split('.').nth(1).map(|f| f.len()).unwrap_or(0);
    if frac_len != 2 {
        return Err(boundary("DECIMAL_NOT_2DP", field));
    }
    Ok(s)
}

pub fn add_2dp(a: Decimal, b: Decimal, field: &str) -> KernelResult<Decimal> {
    quantize_2dp(a + b, field)
}

/// Refuses a negative result (used for spread-width style subtractions).
pub fn sub_2dp(a: Decimal, b: Decimal, field: &str) -> KernelResult<Decimal> {
    let r = quantize_2dp(a - b, field)?;
    if r < Decimal::ZERO {
        return Err(boundary("DECIMAL_NEGATIVE_FORBIDDEN", field));
    }
    Ok(r)
}

/// `(bid+ask)/2` at full precision, then quantized. Refuses `ask < bid`.
pub fn mid_2dp(bid: Decimal, ask: Decimal, field: &str) -> KernelResult<Decimal> {
    if ask < bid {
        return Err(boundary("ASK_LT_BID_FORBIDDEN", field));
    }
    quantize_2dp((bid + ask) / Decimal::from(2), field)
}

/// Full-precision mid, not yet quantized — used where the caller still
/// needs to combine legs before a single final quantization (the mapper's
/// `spread_mid`).
pub fn mid_full_precision(bid: Decimal, ask: Decimal, field: &str) -> KernelResult<Decimal> {
    if ask < bid {
        return Err(boundary("ASK_LT_BID_FORBIDDEN", field));
    }
    Ok((bid + ask) / Decimal::from(2))
}

/// Quantizes `value` to the nearest multiple of `tick` using floor (`Down`)
/// or ceiling (`Up`). Rejects `tick <= 0`.
pub fn tick_quantize(value: Decimal, tick: Decimal, mode: TickRounding) -> KernelResult<Decimal> {
    if tick <= Decimal::ZERO {
        return Err(boundary("TICK_SIZE_MUST_BE_POSITIVE", tick.to_string()));
    }
    let q = value / tick;
    let qi = match mode {
        TickRounding::Down => q.floor(),
        TickRounding::Up => q.ceil(),
    };
    Ok(qi * tick)
}

pub fn usd_quantize(value: Decimal) -> KernelResult<Decimal> {
    quantize_2dp(value, "usd")
}

/// 6-decimal-place quantization (drawdown percentages).
pub fn quantize_6dp(d: Decimal, _field: &str) -> KernelResult<Decimal> {
    Ok(d.round_dp_with_strategy(6, ROUND_HALF_UP))
}

pub fn format_6dp(d: Decimal, field: &str) -> KernelResult<String> {
    let q = quantize_6dp(d, field)?;
    Ok(format!("{q:.6}"))
}
