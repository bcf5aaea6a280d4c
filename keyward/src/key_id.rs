//! Data key identifiers and their textual form.

use crate::error::Error;
use crate::extjson::Binary;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;
use std::str::FromStr;

/// Identifier of a wrapped data key.
///
/// The textual form is standard, padded base64 of the raw bytes. Keys created
/// by a key vault are 16-byte random UUIDs, so their text is 24 characters.
///
/// # Example
///
/// ```
/// use keyward::key_id::KeyId;
///
/// let id = KeyId::parse("QUJDRA==").unwrap();
/// assert_eq!(id.as_bytes(), b"ABCD");
/// assert_eq!(id.to_string(), "QUJDRA==");
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct KeyId(Vec<u8>);

impl KeyId {
    /// Creates an identifier from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKeyId` if `bytes` is empty.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, Error> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(Error::InvalidKeyId("key identifier is empty".to_string()));
        }
        Ok(Self(bytes))
    }

    /// Generates a fresh 16-byte random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().as_bytes().to_vec())
    }

    /// Parses the base64 textual form.
    ///
    /// Non-canonical text (missing padding, stray trailing bits) is rejected so
    /// that parsing and printing always round-trip.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKeyId` if `text` is not valid base64 or decodes to
    /// no bytes.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let bytes = STANDARD
            .decode(text)
            .map_err(|e| Error::InvalidKeyId(format!("`{text}` is not base64: {e}")))?;
        Self::from_bytes(bytes)
    }

    /// Returns the raw identifier bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the identifier tagged as a key reference (subtype `04`).
    #[must_use]
    pub fn to_binary(&self) -> Binary {
        Binary::uuid(self.0.clone())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD.encode(&self.0))
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({self})")
    }
}

impl FromStr for KeyId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extjson::BinarySubtype;
    use proptest::prelude::*;

    #[test]
    fn test_generated_id_is_24_chars() {
        let id = KeyId::generate();
        assert_eq!(id.as_bytes().len(), 16);
        assert_eq!(id.to_string().len(), 24);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(KeyId::parse("not base64!"), Err(Error::InvalidKeyId(_))));
        assert!(matches!(KeyId::parse(""), Err(Error::InvalidKeyId(_))));
        assert!(matches!(KeyId::parse("QUJDRA"), Err(Error::InvalidKeyId(_))));
    }

    #[test]
    fn test_parse_rejects_surrounding_whitespace() {
        assert!(matches!(KeyId::parse(" QUJDRA=="), Err(Error::InvalidKeyId(_))));
        assert!(matches!(KeyId::parse("QUJDRA==\n"), Err(Error::InvalidKeyId(_))));
        assert_eq!(KeyId::parse("QUJDRA==").unwrap().to_string(), "QUJDRA==");
    }

    #[test]
    fn test_binary_is_tagged_as_key_reference() {
        let binary = KeyId::parse("QUJDRA==").unwrap().to_binary();
        assert_eq!(binary.subtype(), BinarySubtype::Uuid);
        assert_eq!(binary.bytes(), b"ABCD");
    }

    proptest! {
        #[test]
        fn prop_text_round_trips(bytes in proptest::collection::vec(any::<u8>(), 1..64)) {
            let text = KeyId::from_bytes(bytes.clone()).unwrap().to_string();
            let parsed = KeyId::parse(&text).unwrap();
            prop_assert_eq!(parsed.as_bytes(), &bytes[..]);
            prop_assert_eq!(parsed.to_string(), text);
        }
    }
}
