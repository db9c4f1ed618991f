//! Order-defining identifiers
//!
//! Every addressable node carries a display identifier such as `42`, `42.3`
//! or `42.31`. The identifier defines document order: integer parts compare
//! numerically, decimal parts compare as zero-padded digit strings, so
//! `1.2 < 1.18` is false and `1.18 < 1.2` is true.
//!
//! `NodeIdentifier::parse` is the only place a raw string becomes an
//! identifier. Everything downstream works on the typed value.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Raised when a string is not a valid order identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid node identifier: {0:?}")]
pub struct InvalidIdentifier(pub String);

/// Order-defining node identifier.
///
/// Equality, hashing and ordering all work on the normalized value, so
/// `1.10`, `1.1` and `1.100` are the same identifier and `7.0` equals `7`.
/// Construction through [`NodeIdentifier::parse`] or [`NodeIdentifier::decimal`]
/// strips trailing zeros from the decimal digits.
#[derive(Debug, Clone)]
pub enum NodeIdentifier {
    /// Plain integer identifier, e.g. `400`
    Integer(u64),
    /// Dotted decimal identifier, e.g. `400.12` (`int_part = 400`, `digits = "12"`)
    Decimal { int_part: u64, digits: String },
}

impl NodeIdentifier {
    /// Parse a raw identifier string (`^\d+(\.\d+)?$`, surrounding whitespace ignored).
    pub fn parse(raw: &str) -> Result<Self, InvalidIdentifier> {
        let trimmed = raw.trim();
        let (int_str, dec_str) = match trimmed.split_once('.') {
            Some((i, d)) => (i, Some(d)),
            None => (trimmed, None),
        };

        let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(int_str) {
            return Err(InvalidIdentifier(raw.to_string()));
        }
        let int_part = int_str
            .parse::<u64>()
            .map_err(|_| InvalidIdentifier(raw.to_string()))?;

        match dec_str {
            None => Ok(Self::Integer(int_part)),
            Some(d) if all_digits(d) => Ok(Self::decimal(int_part, d)),
            Some(_) => Err(InvalidIdentifier(raw.to_string())),
        }
    }

    /// Build an identifier from an integer part and decimal digits.
    ///
    /// Trailing zeros are dropped; an all-zero suffix yields an integer.
    pub fn decimal(int_part: u64, digits: &str) -> Self {
        let trimmed = digits.trim_end_matches('0');
        if trimmed.is_empty() {
            Self::Integer(int_part)
        } else {
            Self::Decimal {
                int_part,
                digits: trimmed.to_string(),
            }
        }
    }

    /// Whether a raw string would parse as an identifier.
    pub fn is_valid(raw: &str) -> bool {
        Self::parse(raw).is_ok()
    }

    /// Integer part (the floor of the identifier)
    pub fn int_part(&self) -> u64 {
        match self {
            Self::Integer(n) => *n,
            Self::Decimal { int_part, .. } => *int_part,
        }
    }

    /// Decimal digits after the dot, empty for integers
    pub fn digits(&self) -> &str {
        match self {
            Self::Integer(_) => "",
            Self::Decimal { digits, .. } => digits,
        }
    }

    /// Decimal nesting depth: number of digits after the dot
    pub fn depth(&self) -> usize {
        self.digits().len()
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Integer(_))
    }
}

impl PartialEq for NodeIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NodeIdentifier {}

impl Hash for NodeIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.int_part().hash(state);
        self.digits().trim_end_matches('0').hash(state);
    }
}

impl Ord for NodeIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.int_part().cmp(&other.int_part()) {
            Ordering::Equal => {}
            unequal => return unequal,
        }

        // Zero-padding both sides to a common length is equivalent to comparing
        // with trailing zeros removed, which avoids allocating padded copies.
        let a = self.digits().trim_end_matches('0');
        let b = other.digits().trim_end_matches('0');
        a.cmp(b)
    }
}

impl PartialOrd for NodeIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "{}", n),
            Self::Decimal { int_part, digits } => write!(f, "{}.{}", int_part, digits),
        }
    }
}

impl FromStr for NodeIdentifier {
    type Err = InvalidIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for NodeIdentifier {
    fn from(n: u64) -> Self {
        Self::Integer(n)
    }
}

impl Serialize for NodeIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Identifier of a chunk.
///
/// Chunks are ordered the same way nodes are, and overflow may create a chunk
/// between two existing ones (`3` and `4` yield `3.1`), so a chunk id is an
/// order identifier too. On the wire it is a JSON number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub NodeIdentifier);

impl ChunkId {
    pub fn new(n: u64) -> Self {
        Self(NodeIdentifier::Integer(n))
    }

    pub fn parse(raw: &str) -> Result<Self, InvalidIdentifier> {
        NodeIdentifier::parse(raw).map(Self)
    }

    pub fn as_identifier(&self) -> &NodeIdentifier {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for ChunkId {
    fn from(n: u64) -> Self {
        Self::new(n)
    }
}

impl Serialize for ChunkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.0 {
            NodeIdentifier::Integer(n) => serializer.serialize_u64(*n),
            decimal => {
                let value: f64 = decimal
                    .to_string()
                    .parse()
                    .map_err(serde::ser::Error::custom)?;
                serializer.serialize_f64(value)
            }
        }
    }
}

impl<'de> Deserialize<'de> for ChunkId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // f64 Display prints the shortest string that round-trips, so `3.1`
        // comes back as "3.1" rather than "3.0999999999999996".
        let value = f64::deserialize(deserializer)?;
        if !value.is_finite() || value < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "chunk id must be a non-negative number, got {}",
                value
            )));
        }
        ChunkId::parse(&value.to_string()).map_err(serde::de::Error::custom)
    }
}
