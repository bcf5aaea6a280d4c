//! Local master key provider.
//!
//! Data keys are wrapped with key material held by the application itself.
//! Not for production use.

use super::{CredentialBundle, CredentialValue, REDACTED};
use crate::error::ConfigError;
use secrecy::{ExposeSecret, SecretVec};
use std::fmt;

/// Size of local master key material in bytes.
pub const LOCAL_MASTER_KEY_SIZE: usize = 96;

/// Raw 96-byte master key held in process.
pub struct LocalProvider {
    key: SecretVec<u8>,
}

impl LocalProvider {
    /// Creates a provider from raw key material.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::LocalKeyLength` unless `key` is exactly
    /// [`LOCAL_MASTER_KEY_SIZE`] bytes.
    pub fn new(key: Vec<u8>) -> Result<Self, ConfigError> {
        if key.len() != LOCAL_MASTER_KEY_SIZE {
            return Err(ConfigError::LocalKeyLength {
                expected: LOCAL_MASTER_KEY_SIZE,
                actual: key.len(),
            });
        }
        Ok(Self { key: SecretVec::new(key) })
    }

    /// Returns the master key material.
    #[must_use]
    pub const fn key(&self) -> &SecretVec<u8> {
        &self.key
    }

    pub(super) fn credentials(&self) -> CredentialBundle {
        CredentialBundle::new().with("key", CredentialValue::bytes(self.key.expose_secret().clone()))
    }
}

impl Clone for LocalProvider {
    fn clone(&self) -> Self {
        Self { key: SecretVec::new(self.key.expose_secret().clone()) }
    }
}

impl fmt::Debug for LocalProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalProvider").field("key", &REDACTED).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_length() {
        assert_eq!(
            LocalProvider::new(vec![0u8; 32]).unwrap_err(),
            ConfigError::LocalKeyLength { expected: 96, actual: 32 }
        );
        assert!(LocalProvider::new(Vec::new()).is_err());
    }

    #[test]
    fn test_credentials_hold_raw_bytes() {
        let provider = LocalProvider::new(vec![7u8; LOCAL_MASTER_KEY_SIZE]).unwrap();
        let bundle = provider.credentials();
        assert_eq!(bundle.len(), 1);
        assert_eq!(bundle.get("key").and_then(|v| v.expose_bytes()), Some(&[7u8; 96][..]));
    }

    #[test]
    fn test_clone_keeps_key_and_debug_hides_it() {
        let provider = LocalProvider::new(vec![0xAB; LOCAL_MASTER_KEY_SIZE]).unwrap();
        let copy = provider.clone();
        assert_eq!(copy.key().expose_secret(), provider.key().expose_secret());

        let rendered = format!("{copy:?}");
        assert!(rendered.contains(REDACTED));
        assert!(!rendered.contains("171"));
    }
}
