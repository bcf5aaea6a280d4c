//! Canonical extended JSON encodings for typed document values.
//!
//! The encrypted client consumes schemas and key vault documents in the
//! store's document format. Binary values carry a one-byte subtype, rendered as:
//!
//! ```text
//! {"$binary": {"base64": "<standard base64>", "subType": "<two hex digits>"}}
//! ```
//!
//! Key references use subtype `04`; the encryption layer rejects key ids that
//! are tagged as generic bytes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Subtype tag of a binary value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarySubtype {
    /// Plain bytes (`00`).
    Generic,
    /// UUID-like key reference (`04`).
    Uuid,
    /// Any other subtype, preserved as read.
    Other(u8),
}

impl BinarySubtype {
    /// Returns the raw subtype byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Generic => 0x00,
            Self::Uuid => 0x04,
            Self::Other(value) => value,
        }
    }

    /// Creates a subtype from its raw byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Generic,
            0x04 => Self::Uuid,
            other => Self::Other(other),
        }
    }
}

/// A typed binary value.
#[derive(Clone, PartialEq, Eq)]
pub struct Binary {
    subtype: BinarySubtype,
    bytes: Vec<u8>,
}

impl Binary {
    /// Creates a binary value with an explicit subtype.
    #[must_use]
    pub fn new(subtype: BinarySubtype, bytes: impl Into<Vec<u8>>) -> Self {
        Self { subtype, bytes: bytes.into() }
    }

    /// Creates a generic (`00`) binary value.
    #[must_use]
    pub fn generic(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(BinarySubtype::Generic, bytes)
    }

    /// Creates a key reference (`04`) binary value.
    #[must_use]
    pub fn uuid(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(BinarySubtype::Uuid, bytes)
    }

    /// Returns the subtype.
    #[must_use]
    pub const fn subtype(&self) -> BinarySubtype {
        self.subtype
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the value, returning the raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Renders the canonical extended JSON form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "$binary": {
                "base64": STANDARD.encode(&self.bytes),
                "subType": format!("{:02x}", self.subtype.as_u8()),
            }
        })
    }

    /// Parses the canonical extended JSON form.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if `value` is not a well-formed
    /// `$binary` document.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let inner = value
            .get("$binary")
            .and_then(Value::as_object)
            .ok_or_else(|| format!("expected a $binary document, found {}", kind_of(value)))?;
        let encoded = inner
            .get("base64")
            .and_then(Value::as_str)
            .ok_or_else(|| "$binary is missing a base64 string".to_string())?;
        let subtype = inner
            .get("subType")
            .and_then(Value::as_str)
            .ok_or_else(|| "$binary is missing a subType string".to_string())?;
        if subtype.is_empty() || subtype.len() > 2 {
            return Err(format!("invalid subType `{subtype}`"));
        }
        let subtype =
            u8::from_str_radix(subtype, 16).map_err(|_| format!("invalid subType `{subtype}`"))?;
        let bytes = STANDARD.decode(encoded).map_err(|e| format!("invalid base64: {e}"))?;
        Ok(Self { subtype: BinarySubtype::from_u8(subtype), bytes })
    }
}

impl fmt::Debug for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binary({:02x}, {})", self.subtype.as_u8(), STANDARD.encode(&self.bytes))
    }
}

impl Serialize for Binary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Binary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(de::Error::custom)
    }
}

/// Milliseconds since the Unix epoch, rendered as `{"$date": {"$numberLong": ".."}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime(i64);

impl DateTime {
    /// Creates a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the current time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        Self(millis)
    }

    /// Returns milliseconds since the epoch.
    #[must_use]
    pub const fn millis(self) -> i64 {
        self.0
    }
}

impl Serialize for DateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        json!({ "$date": { "$numberLong": self.0.to_string() } }).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        value
            .get("$date")
            .and_then(|d| d.get("$numberLong"))
            .and_then(Value::as_str)
            .and_then(|n| n.parse().ok())
            .map(Self)
            .ok_or_else(|| de::Error::custom("expected a $date document"))
    }
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_binary_renders_subtype_04() {
        let value = Binary::uuid(b"ABCD".to_vec()).to_value();
        assert_eq!(value, json!({"$binary": {"base64": "QUJDRA==", "subType": "04"}}));
    }

    #[test]
    fn test_from_value_reads_subtype() {
        let value = json!({"$binary": {"base64": "QUJDRA==", "subType": "00"}});
        let binary = Binary::from_value(&value).unwrap();
        assert_eq!(binary.subtype(), BinarySubtype::Generic);
        assert_eq!(binary.bytes(), b"ABCD");
    }

    #[test]
    fn test_from_value_rejects_other_shapes() {
        assert!(Binary::from_value(&json!("QUJDRA==")).is_err());
        assert!(Binary::from_value(&json!({"$binary": {"base64": "QUJDRA=="}})).is_err());
        assert!(Binary::from_value(&json!({"$binary": {"base64": "!!", "subType": "04"}})).is_err());
        assert!(Binary::from_value(&json!({"$binary": {"base64": "", "subType": "zz"}})).is_err());
    }

    #[test]
    fn test_date_time_serde() {
        let date = DateTime::from_millis(1_700_000_000_000);
        let value = serde_json::to_value(date).unwrap();
        assert_eq!(value, json!({"$date": {"$numberLong": "1700000000000"}}));
        let back: DateTime = serde_json::from_value(value).unwrap();
        assert_eq!(back, date);
    }
}
