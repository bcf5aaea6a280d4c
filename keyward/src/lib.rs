//! # `keyward`
//!
//! Key management and schema compilation for client-side field-level
//! encryption in a document store.
//!
//! ## Features
//!
//! - Master key providers for AWS, Azure, GCP, and a local 96-byte key
//! - Find-before-create data key resolution by alias
//! - Encryption schema compilation with deterministic/random algorithm selection
//! - Auto-encryption options for an external encrypted client
//!
//! ## Example
//!
//! ```rust
//! use keyward::prelude::*;
//!
//! let provider = MasterKeyProvider::from(LocalProvider::new(vec![7u8; 96])?);
//! let vault = LocalKeyVault::in_memory();
//! let ctx = CallContext::new();
//!
//! let key_id = get_or_create_data_key(
//!     &"encryption.__keyVault".parse::<Namespace>()?,
//!     &vault,
//!     "demo-data-key",
//!     &provider,
//!     &ctx,
//! )?;
//! let schema = EncryptionSchema::compile(&key_id.to_string())?;
//! assert_eq!(schema.key_ids(), &[key_id]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod data_key;
pub mod error;
pub mod extjson;
pub mod key_id;
pub mod key_vault;
pub mod provider;
pub mod schema;

pub use error::Error;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::client::{prepare_auto_encryption, AutoEncryptionOptions, EncryptedClientFactory};
    pub use crate::config::{ConfigSource, Settings};
    pub use crate::data_key::{get_or_create_data_key, CreationPolicy, DataKeyManager};
    pub use crate::error::{ConfigError, Error, VaultError};
    pub use crate::key_id::KeyId;
    pub use crate::key_vault::{CallContext, KeyVaultConnector, KeyVaultSession, LocalKeyVault, Namespace};
    pub use crate::provider::{LocalProvider, MasterKeyProvider, ProviderKind};
    pub use crate::schema::{Algorithm, EncryptionSchema, SchemaMap};
}
