//! The value codec: lossless round-trip of arbitrary in-memory values to and
//! from the byte-string model Redis (and the local tier, for consistency)
//! actually stores.
//!
//! Rust note on the absence sentinel: spec.md treats "no such entry" as a
//! distinguished member of the value domain that is itself unstorable. In
//! this implementation absence is instead represented structurally by
//! `Option<Value>` — `None` — so `Value` itself has no variant for it and
//! `encode` is infallible. The "fails with `UnsupportedValue` if given
//! absence" rule from spec.md is enforced one layer up, at `LocalTier::set`
//! and `RemoteTier::set`, which both take `Option<&Value>`-shaped input... in
//! practice via the tier trait's `Value` parameter, where passing no value
//! simply isn't expressible: callers delete a key instead of "setting
//! absence". See DESIGN.md.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One shared base so the four sentinel prefixes are guaranteed disjoint
/// from each other and from arbitrary caller data: `NULL`/`TRUE`/`FALSE` are
/// exact-match tokens, `ERROR:`/`JSON:` are prefixes followed by a JSON body.
const SENTINEL_BASE: &str = "b3f43c0a-83f1-4b8b-9c8e-9a9f6e6c8b01";

fn sentinel_null() -> String {
    format!("{SENTINEL_BASE}:NULL")
}
fn sentinel_true() -> String {
    format!("{SENTINEL_BASE}:TRUE")
}
fn sentinel_false() -> String {
    format!("{SENTINEL_BASE}:FALSE")
}
fn sentinel_error_prefix() -> String {
    format!("{SENTINEL_BASE}:ERROR:")
}
fn sentinel_json_prefix() -> String {
    format!("{SENTINEL_BASE}:JSON:")
}

/// A floating-point number that round-trips `NaN` and `±Infinity` through
/// JSON, which `serde_json`'s native f64 handling refuses to serialize.
#[derive(Debug, Clone, Copy)]
pub struct Number(pub f64);

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        if self.0.is_nan() && other.0.is_nan() {
            true
        } else {
            self.0 == other.0
        }
    }
}

impl From<f64> for Number {
    fn from(v: f64) -> Self {
        Number(v)
    }
}

impl Serialize for Number {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.is_nan() {
            serializer.serialize_str("NaN")
        } else if self.0.is_infinite() {
            serializer.serialize_str(if self.0.is_sign_positive() { "Infinity" } else { "-Infinity" })
        } else {
            serializer.serialize_f64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Number {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            F(f64),
            S(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::F(f) => Ok(Number(f)),
            Repr::S(s) => match s.as_str() {
                "NaN" => Ok(Number(f64::NAN)),
                "Infinity" => Ok(Number(f64::INFINITY)),
                "-Infinity" => Ok(Number(f64::NEG_INFINITY)),
                other => other
                    .parse::<f64>()
                    .map(Number)
                    .map_err(serde::de::Error::custom),
            },
        }
    }
}

/// The tagged sum of values the cache domain understands.
///
/// `Record` is a string-keyed object (`BTreeMap` gives a canonical, sorted
/// JSON body for free). `Map` is kept distinct from `Record` because its
/// keys are themselves arbitrary `Value`s (mirroring a JS `Map` versus a
/// plain object) — it round-trips as an association list rather than an
/// object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Sequence(Vec<Value>),
    Record(BTreeMap<String, Value>),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Error(ErrorValue),
}

/// An error object: a message plus arbitrary enumerable properties
/// (`name`, `retryable`, caller-defined fields, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorValue {
    pub message: String,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

impl ErrorValue {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }
}

impl std::fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ErrorValue {}

/// Canonical sort key used to compare `Map`/`Set` contents order-insensitively.
fn canonical_key(v: &Value) -> String {
    // Serialization is deterministic (Record is a BTreeMap), so two equal
    // values always produce the same key regardless of original insertion
    // order.
    serde_json::to_string(v).unwrap_or_default()
}

fn multiset_eq(a: &[Value], b: &[Value]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a_sorted: Vec<&Value> = a.iter().collect();
    let mut b_sorted: Vec<&Value> = b.iter().collect();
    a_sorted.sort_by_key(|v| canonical_key(v));
    b_sorted.sort_by_key(|v| canonical_key(v));
    a_sorted.iter().zip(b_sorted.iter()).all(|(x, y)| x == y)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => multiset_eq(a, b),
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len() && {
                    let mut a_sorted = a.clone();
                    let mut b_sorted = b.clone();
                    a_sorted.sort_by_key(|(k, _)| canonical_key(k));
                    b_sorted.sort_by_key(|(k, _)| canonical_key(k));
                    a_sorted == b_sorted
                }
            }
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
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
impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(Number(n))
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n.is_sign_positive() { "inf".to_string() } else { "-inf".to_string() }
    } else {
        // Rust's f64 Display is shortest round-trip representation.
        format!("{n}")
    }
}

/// Encode a value into the string Redis (or the local tier) stores.
///
/// Infallible: `Value` structurally excludes the absence sentinel (see
/// module docs), so there is nothing for this to reject.
#[must_use]
pub fn encode(v: &Value) -> String {
    match v {
        Value::Null => sentinel_null(),
        Value::Bool(true) => sentinel_true(),
        Value::Bool(false) => sentinel_false(),
        Value::Error(e) => {
            format!("{}{}", sentinel_error_prefix(), serde_json::to_string(e).unwrap_or_default())
        }
        Value::Sequence(_) | Value::Record(_) | Value::Map(_) | Value::Set(_) => {
            format!("{}{}", sentinel_json_prefix(), serde_json::to_string(v).unwrap_or_default())
        }
        Value::String(s) => s.clone(),
        Value::Number(n) => format_number(n.0),
    }
}

/// Decode a raw string read back from storage.
///
/// `raw = None` represents the "no such key" signal and decodes to absence
/// (`None`). A string that matches none of the codec's prefixes is returned
/// as a plain `Value::String` — this is also where an encoded bare scalar
/// (number or string) lands, since the codec deliberately does not tag
/// scalars: the original type of a bare scalar is not recoverable from
/// storage alone, only its round-trip-precise textual form is. Callers that
/// need a bare number back parse the returned string themselves.
#[must_use]
pub fn decode(raw: Option<&str>) -> Option<Value> {
    let s = raw?;
    if s == sentinel_null() {
        return Some(Value::Null);
    }
    if s == sentinel_true() {
        return Some(Value::Bool(true));
    }
    if s == sentinel_false() {
        return Some(Value::Bool(false));
    }
    if let Some(body) = s.strip_prefix(&sentinel_error_prefix()) {
        return Some(
            serde_json::from_str::<ErrorValue>(body)
                .map(Value::Error)
                .unwrap_or_else(|_| Value::String(s.to_string())),
        );
    }
    if let Some(body) = s.strip_prefix(&sentinel_json_prefix()) {
        return Some(
            serde_json::from_str::<Value>(body).unwrap_or_else(|_| Value::String(s.to_string())),
        );
    }
    Some(Value::String(s.to_string()))
}
