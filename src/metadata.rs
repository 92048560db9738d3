//! gRPC metadata (headers and trailers) and timeout intervals.
//!
//! Metadata travels as ASCII header values. Binary or non-ASCII values are
//! carried under a `-bin` form of their key as base64 text; the forward
//! transform, its receive-side inverse, and the compact `grpc-timeout`
//! interval grammar live here.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Key suffix marking a base64-encoded binary value.
pub const BIN_SUFFIX: &str = "-bin";

/// Metadata and interval errors.
#[derive(Debug)]
pub enum MetadataError {
    /// Interval string does not match `<digits><unit>` with 1-8 digits and
    /// unit one of `H`, `M`, `S`, `m`, `u`, `n`.
    InvalidInterval(String),
    /// No interval unit can carry the value within eight digits.
    IntervalOutOfRange { micros: u64 },
    /// A `-bin` value is not valid base64.
    InvalidBase64 { key: String },
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::InvalidInterval(s) => write!(f, "invalid interval {:?}", s),
            MetadataError::IntervalOutOfRange { micros } => {
                write!(f, "{} microseconds exceeds the encodable interval range", micros)
            }
            MetadataError::InvalidBase64 { key } => {
                write!(f, "metadata key {:?} carries invalid base64", key)
            }
        }
    }
}

impl std::error::Error for MetadataError {}

/// A metadata value prior to wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Text value. Non-ASCII text is base64-encoded on the wire.
    Str(String),
    /// Binary value. Always base64-encoded on the wire.
    Bin(Bytes),
    /// Repeated value; elements are scalars.
    List(Vec<Value>),
}

impl Value {
    /// Whether the value can travel on the wire untransformed.
    fn is_ascii(&self) -> bool {
        match self {
            Value::Str(s) => s.is_ascii(),
            Value::Bin(_) => false,
            Value::List(values) => values.iter().all(Value::is_ascii),
        }
    }

    /// Base64-encode every scalar in the value.
    fn to_base64(self) -> Value {
        match self {
            Value::Str(s) => Value::Str(base64_encode(s.as_bytes())),
            Value::Bin(b) => Value::Str(base64_encode(&b)),
            Value::List(values) => Value::List(values.into_iter().map(Value::to_base64).collect()),
        }
    }

    /// Base64-decode every scalar into a binary buffer.
    fn from_base64(self, key: &str) -> Result<Value, MetadataError> {
        match self {
            Value::Str(s) => base64_decode(&s)
                .map(|b| Value::Bin(Bytes::from(b)))
                .ok_or_else(|| MetadataError::InvalidBase64 {
                    key: key.to_string(),
                }),
            Value::Bin(_) => Ok(self),
            Value::List(values) => values
                .into_iter()
                .map(|v| v.from_base64(key))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bin(b)
    }
}

/// Rewrite a metadata entry for the wire.
///
/// Binary and non-ASCII values move to the `-bin` form of the key with
/// base64 text; a list with any binary or non-ASCII element is encoded
/// element-wise. Pure-ASCII entries pass through unchanged.
///
/// The transform is only idempotent on ASCII input: re-running it on a key
/// that already carries the suffix would suffix it again. Callers apply it
/// once, on the way out.
pub fn encode_bin_value(key: &str, value: Value) -> (String, Value) {
    if value.is_ascii() {
        (key.to_string(), value)
    } else {
        (format!("{}{}", key, BIN_SUFFIX), value.to_base64())
    }
}

/// Undo the `-bin` transform at the receiving end.
///
/// A key carrying the suffix is stripped and its value base64-decoded:
/// scalars become binary buffers, lists become lists of binary buffers.
/// Invalid base64 under a `-bin` key is a protocol error. Other keys pass
/// through untouched.
pub fn decode_bin_value(key: &str, value: Value) -> Result<(String, Value), MetadataError> {
    match key.strip_suffix(BIN_SUFFIX) {
        Some(stripped) => Ok((stripped.to_string(), value.from_base64(key)?)),
        None => Ok((key.to_string(), value)),
    }
}

/// gRPC metadata key-value pairs.
///
/// Used for headers (sent before the message) and trailers (sent after the
/// message with status). Keys are normalized to lowercase ASCII; multiple
/// values per key are allowed. Values may be text or binary; binary and
/// non-ASCII values travel under the `-bin` form of their key (see
/// [`encode_bin_value`]).
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    /// Values by lowercase key.
    entries: HashMap<String, Vec<Value>>,
}

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a text value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.insert_value(key, Value::Str(value.into()));
    }

    /// Insert a binary value.
    pub fn insert_bin(&mut self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.insert_value(key, Value::Bin(value.into()));
    }

    fn insert_value(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into().to_ascii_lowercase();
        self.entries.entry(key).or_default().push(value);
    }

    /// Get the first text value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())?
            .iter()
            .find_map(|v| match v {
                Value::Str(s) => Some(s.as_str()),
                _ => None,
            })
    }

    /// Get the first binary value for a key.
    pub fn get_bin(&self, key: &str) -> Option<&Bytes> {
        self.entries
            .get(&key.to_ascii_lowercase())?
            .iter()
            .find_map(|v| match v {
                Value::Bin(b) => Some(b),
                _ => None,
            })
    }

    /// Get all values for a key.
    pub fn get_all(&self, key: &str) -> Option<&[Value]> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(|v| v.as_slice())
    }

    /// Check if a key exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    /// Remove all values for a key.
    pub fn remove(&mut self, key: &str) -> Option<Vec<Value>> {
        self.entries.remove(&key.to_ascii_lowercase())
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v)))
    }

    /// Check if metadata is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the number of entries (including duplicates).
    pub fn len(&self) -> usize {
        self.entries.values().map(|v| v.len()).sum()
    }

    /// Encode every entry for the wire.
    ///
    /// Applies the `-bin` transform entry-wise and flattens repeated values
    /// into one `(key, text)` pair per element.
    pub fn into_wire(self) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(self.entries.len());
        for (key, values) in self.entries {
            for value in values {
                let (key, value) = encode_bin_value(&key, value);
                flatten(&key, value, &mut out);
            }
        }
        out
    }

    /// Rebuild metadata from wire header pairs.
    ///
    /// Applies the `-bin` inverse entry-wise; values under a stripped key
    /// come back as binary buffers.
    pub fn from_wire<I>(pairs: I) -> Result<Self, MetadataError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut metadata = Metadata::new();
        for (key, value) in pairs {
            let (key, value) = decode_bin_value(&key, Value::Str(value))?;
            metadata.insert_value(key, value);
        }
        Ok(metadata)
    }
}

impl FromIterator<(String, String)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut metadata = Metadata::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}

fn flatten(key: &str, value: Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Str(s) => out.push((key.to_string(), s)),
        Value::Bin(b) => out.push((key.to_string(), base64_encode(&b))),
        Value::List(values) => {
            for v in values {
                flatten(key, v, out);
            }
        }
    }
}

const BASE64_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Standard base64 with padding.
fn base64_encode(input: &[u8]) -> String {
    let mut output = String::with_capacity(input.len().div_ceil(3) * 4);

    for chunk in input.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = chunk.get(1).copied().unwrap_or(0) as u32;
        let b2 = chunk.get(2).copied().unwrap_or(0) as u32;
        let triple = (b0 << 16) | (b1 << 8) | b2;

        output.push(BASE64_ALPHABET[(triple >> 18) as usize & 0x3f] as char);
        output.push(BASE64_ALPHABET[(triple >> 12) as usize & 0x3f] as char);
        output.push(if chunk.len() > 1 {
            BASE64_ALPHABET[(triple >> 6) as usize & 0x3f] as char
        } else {
            '='
        });
        output.push(if chunk.len() > 2 {
            BASE64_ALPHABET[triple as usize & 0x3f] as char
        } else {
            '='
        });
    }

    output
}

/// Standard base64 decoder.
fn base64_decode(input: &str) -> Option<Vec<u8>> {
    let mut output = Vec::with_capacity(input.len() * 3 / 4);
    let mut buffer = 0u32;
    let mut bits = 0;

    for c in input.bytes() {
        if c == b'=' {
            break;
        }

        let value = BASE64_ALPHABET.iter().position(|&x| x == c)? as u32;
        buffer = (buffer << 6) | value;
        bits += 6;

        if bits >= 8 {
            bits -= 8;
            output.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }

    Some(output)
}

/// Interval units in encode preference order, with microsecond weights.
///
/// Coarsest first: the first unit dividing the value exactly wins, so an
/// hour's worth of microseconds encodes as `1H`, never `60M`.
const UNITS: [(char, u64); 5] = [
    ('H', 3_600_000_000),
    ('M', 60_000_000),
    ('S', 1_000_000),
    ('m', 1_000),
    ('u', 1),
];

/// Largest amount the eight-digit wire field can carry.
const MAX_AMOUNT: u64 = 99_999_999;

/// An RPC deadline carried as a compact interval, e.g. in `grpc-timeout`.
///
/// Wire form is `<digits><unit>` with at most eight digits and unit one of
/// `H` (hours), `M` (minutes), `S` (seconds), `m` (milliseconds), `u`
/// (microseconds), `n` (nanoseconds). The value is held in microseconds;
/// `n` is accepted on decode only, flooring to microseconds, and is never
/// produced on encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    /// Timeout in microseconds.
    micros: u64,
}

impl Timeout {
    /// Create a timeout from microseconds.
    pub fn from_micros(micros: u64) -> Self {
        Self { micros }
    }

    /// Create a timeout from milliseconds.
    pub fn from_millis(millis: u64) -> Self {
        Self {
            micros: millis * 1_000,
        }
    }

    /// Create a timeout from seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self {
            micros: secs * 1_000_000,
        }
    }

    /// Create a timeout from a duration.
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            micros: duration.as_micros() as u64,
        }
    }

    /// Get the timeout in microseconds.
    pub fn as_micros(&self) -> u64 {
        self.micros
    }

    /// Get the timeout as a duration.
    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(self.micros)
    }

    /// Encode as the compact interval form.
    ///
    /// Units are tried coarsest-first and the first unit dividing the value
    /// exactly is chosen. An amount over eight digits is stepped up to
    /// coarser units, flooring at each step, until it fits; a value too
    /// large even for hours is out of range.
    pub fn encode(&self) -> Result<String, MetadataError> {
        for (i, &(_, weight)) in UNITS.iter().enumerate() {
            if self.micros % weight == 0 {
                return self.encode_from(i);
            }
        }
        unreachable!("the microsecond unit divides every value")
    }

    fn encode_from(&self, unit: usize) -> Result<String, MetadataError> {
        let mut unit = unit;
        let mut amount = self.micros / UNITS[unit].1;

        while amount > MAX_AMOUNT && unit > 0 {
            unit -= 1;
            amount /= UNITS[unit].1 / UNITS[unit + 1].1;
        }

        if amount > MAX_AMOUNT {
            return Err(MetadataError::IntervalOutOfRange {
                micros: self.micros,
            });
        }

        Ok(format!("{}{}", amount, UNITS[unit].0))
    }

    /// Parse the interval grammar `^(\d{1,8})(H|M|S|m|u|n)$`.
    pub fn parse(s: &str) -> Result<Self, MetadataError> {
        let invalid = || MetadataError::InvalidInterval(s.to_string());

        if !s.is_ascii() || s.len() < 2 {
            return Err(invalid());
        }

        let (digits, unit) = s.split_at(s.len() - 1);
        if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let amount: u64 = digits.parse().map_err(|_| invalid())?;

        let micros = match unit {
            "H" => amount * 3_600_000_000,
            "M" => amount * 60_000_000,
            "S" => amount * 1_000_000,
            "m" => amount * 1_000,
            "u" => amount,
            "n" => amount / 1_000,
            _ => return Err(invalid()),
        };

        Ok(Self { micros })
    }

    /// Whether a string matches the interval grammar.
    pub fn is_interval(s: &str) -> bool {
        Self::parse(s).is_ok()
    }
}
