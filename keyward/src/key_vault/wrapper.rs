//! Master key wrapping of data keys.

use crate::error::KeyWrapError;
use crate::provider::{LocalProvider, MasterKeyOptions, LOCAL_MASTER_KEY_SIZE};
use chacha20poly1305::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretVec};
use sha2::Sha256;

/// Nonce size for ChaCha20-Poly1305 (96 bits).
const NONCE_SIZE: usize = 12;

/// Authentication tag size for ChaCha20-Poly1305.
const TAG_SIZE: usize = 16;

/// HKDF info for deriving the local wrapping key.
const WRAP_KEY_INFO: &[u8] = b"keyward|local-master-key|v1";

/// Associated data bound to every wrapped data key.
const WRAP_AAD: &[u8] = b"keyward|data-key";

/// Wraps and unwraps data keys with a master key.
///
/// This is the master key service seam a key vault calls when minting a data
/// key. Implementations must be thread-safe (`Send + Sync`).
pub trait KeyWrapper: Send + Sync {
    /// Wraps (encrypts) a data key.
    ///
    /// # Arguments
    ///
    /// * `master_key` - Location of the remote master key; `None` for local wrapping
    /// * `data_key` - The plaintext data key
    ///
    /// # Errors
    ///
    /// Returns `KeyWrapError::WrapFailed` if wrapping fails.
    fn wrap_data_key(
        &self,
        master_key: Option<&MasterKeyOptions>,
        data_key: &[u8],
    ) -> Result<Vec<u8>, KeyWrapError>;

    /// Unwraps (decrypts) a data key.
    ///
    /// # Errors
    ///
    /// Returns `KeyWrapError::UnwrapFailed` if unwrapping fails.
    fn unwrap_data_key(
        &self,
        master_key: Option<&MasterKeyOptions>,
        wrapped: &[u8],
    ) -> Result<SecretVec<u8>, KeyWrapError>;
}

/// Wraps data keys with the 96-byte local master key.
///
/// A 32-byte wrapping key is derived from the master key with HKDF-SHA256;
/// wrapped output is `[nonce:12][ciphertext+tag]`.
pub struct LocalKeyWrapper {
    wrap_key: SecretVec<u8>,
}

impl LocalKeyWrapper {
    /// Creates a wrapper from raw master key material.
    ///
    /// # Errors
    ///
    /// Returns `KeyWrapError::InvalidMasterKey` unless `master_key` is 96 bytes.
    pub fn new(master_key: &[u8]) -> Result<Self, KeyWrapError> {
        if master_key.len() != LOCAL_MASTER_KEY_SIZE {
            return Err(KeyWrapError::InvalidMasterKey(format!(
                "expected {LOCAL_MASTER_KEY_SIZE} bytes, got {}",
                master_key.len()
            )));
        }
        let hkdf = Hkdf::<Sha256>::new(None, master_key);
        let mut wrap_key = vec![0u8; 32];
        hkdf.expand(WRAP_KEY_INFO, &mut wrap_key)
            .map_err(|_| KeyWrapError::InvalidMasterKey("key derivation failed".to_string()))?;
        Ok(Self { wrap_key: SecretVec::new(wrap_key) })
    }

    /// Creates a wrapper for a local provider.
    ///
    /// # Errors
    ///
    /// Returns `KeyWrapError::InvalidMasterKey` if derivation fails.
    pub fn from_provider(provider: &LocalProvider) -> Result<Self, KeyWrapError> {
        Self::new(provider.key().expose_secret())
    }

    fn cipher(&self) -> Result<ChaCha20Poly1305, KeyWrapError> {
        ChaCha20Poly1305::new_from_slice(self.wrap_key.expose_secret())
            .map_err(|e| KeyWrapError::InvalidMasterKey(format!("invalid wrapping key: {e}")))
    }
}

impl KeyWrapper for LocalKeyWrapper {
    fn wrap_data_key(
        &self,
        master_key: Option<&MasterKeyOptions>,
        data_key: &[u8],
    ) -> Result<Vec<u8>, KeyWrapError> {
        if let Some(options) = master_key {
            return Err(KeyWrapError::InvalidMasterKey(format!(
                "local wrapping takes no master key options, got {}",
                options.kind()
            )));
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);

        let ciphertext = self
            .cipher()?
            .encrypt(&nonce, Payload { msg: data_key, aad: WRAP_AAD })
            .map_err(|e| KeyWrapError::WrapFailed(format!("ChaCha20-Poly1305 encryption failed: {e}")))?;

        let mut wrapped = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        wrapped.extend_from_slice(&nonce_bytes);
        wrapped.extend_from_slice(&ciphertext);
        Ok(wrapped)
    }

    fn unwrap_data_key(
        &self,
        _master_key: Option<&MasterKeyOptions>,
        wrapped: &[u8],
    ) -> Result<SecretVec<u8>, KeyWrapError> {
        if wrapped.len() < NONCE_SIZE + TAG_SIZE {
            return Err(KeyWrapError::UnwrapFailed(format!(
                "wrapped key too short: {} bytes",
                wrapped.len()
            )));
        }
        let (nonce_bytes, ciphertext) = wrapped.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let data_key = self
            .cipher()?
            .decrypt(nonce, Payload { msg: ciphertext, aad: WRAP_AAD })
            .map_err(|_| KeyWrapError::UnwrapFailed("authentication failed".to_string()))?;
        Ok(SecretVec::new(data_key))
    }
}
