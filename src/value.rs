//! A JSON value representation with no floating-point variant.
//!
//! Per the kernel's design notes, dynamic JSON typing is replaced with a
//! tagged-variant `Value` whose `Float` case is intentionally absent: float
//! ingestion is rejected at the `serde_json::Value -> Value` conversion
//! boundary, making it impossible to carry a float any further into the
//! kernel. Integers are the only numeric variant; anything that parsed as a
//! JSON number but isn't exactly representable as `i64` is rejected the same
//! way a float would be (ints outside `i64` are not expected anywhere in this
//! domain's artifacts: cents, counts, bp values).

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    Array(Vec<Value>),
    /// Keys are sorted by construction (`BTreeMap`), which is what makes
    /// `canonical_bytes` deterministic without a separate sort pass.
    Object(BTreeMap<String, Value>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalizationError {
    pub code: &'static str,
    pub path: String,
}

impl fmt::Display for CanonicalizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CANONICALIZATION_ERROR{{{}}} at {}", self.code, self.path)
    }
}

impl std::error::Error for CanonicalizationError {}

impl Value {
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a.as_slice()),
            _ => None,
        }
    }

    pub fn get<'a>(&'a self, key: &str) -> Option<&'a Value> {
        self.as_object().and_then(|m| m.get(key))
    }

    pub fn obj(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
        let mut m = BTreeMap::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v);
        }
        Value::Object(m)
    }

    pub fn from_str(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }

    /// Converts from `serde_json::Value`, rejecting floats and non-string
    /// object keys with an accurate `$.a.b[i].c`-style locator.
    pub fn from_json(v: &serde_json::Value) -> Result<Value, CanonicalizationError> {
        Self::from_json_at(v, "$")
    }

    fn from_json_at(v: &serde_json::Value, path: &str) -> Result<Value, CanonicalizationError> {
        match v {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else {
                    Err(CanonicalizationError { code: "FLOAT_FORBIDDEN", path: path.to_string() })
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Array(a) => {
                let mut out = Vec::with_capacity(a.len());
                for (i, item) in a.iter().enumerate() {
                    out.push(Self::from_json_at(item, &format!("{path}[{i}]"))?);
                }
                Ok(Value::Array(out))
            }
            serde_json::Value::Object(m) => {
                let mut out = BTreeMap::new();
                for (k, val) in m.iter() {
                    let child_path = format!("{path}.{k}");
                    out.insert(k.clone(), Self::from_json_at(val, &child_path)?);
                }
                Ok(Value::Object(out))
            }
        }
    }

    /// Recursively rejects floats (there are none to reject by construction),
    /// serializes with sorted keys, `,`/`:` separators, and no whitespace,
    /// emitting raw UTF-8 instead of `\uXXXX`-escaping non-ASCII.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_canonical(&mut out);
        out
    }

    fn write_canonical(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => out.extend_from_slice(b"null"),
            Value::Bool(true) => out.extend_from_slice(b"true"),
            Value::Bool(false) => out.extend_from_slice(b"false"),
            Value::Int(i) => out.extend_from_slice(i.to_string().as_bytes()),
            Value::String(s) => write_canonical_string(s, out),
            Value::Array(items) => {
                out.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(b',');
                    }
                    item.write_canonical(out);
                }
                out.push(b']');
            }
            Value::Object(map) => {
                out.push(b'{');
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push(b',');
                    }
                    write_canonical_string(k, out);
                    out.push(b':');
                    v.write_canonical(out);
                }
                out.push(b'}');
            }
        }
    }
}

fn write_canonical_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}
