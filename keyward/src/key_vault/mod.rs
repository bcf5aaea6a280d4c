//! Key vault access.
//!
//! The key vault is a collection of wrapped data key records. Reaching it and
//! asking it to mint new data keys is the job of an external client; this
//! module defines the seam ([`KeyVaultConnector`] / [`KeyVaultSession`]) that
//! the data key manager drives, the record shape, and [`LocalKeyVault`], an
//! in-process implementation.

mod local;
mod wrapper;

pub use local::{LocalKeyVault, DATA_KEY_SIZE};
pub use wrapper::{KeyWrapper, LocalKeyWrapper};

use crate::error::{ConfigError, Error, VaultError};
use crate::extjson::{Binary, DateTime};
use crate::key_id::KeyId;
use crate::provider::{KmsProviders, MasterKeyOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A `database.collection` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    /// Creates a namespace from its parts.
    #[must_use]
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self { database: database.into(), collection: collection.into() }
    }

    /// Returns the database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl FromStr for Namespace {
    type Err = ConfigError;

    /// Splits at the first dot; collection names may themselves contain dots.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::Invalid {
            name: "namespace".to_string(),
            reason: format!("`{s}` {reason}"),
        };
        let (database, collection) =
            s.split_once('.').ok_or_else(|| invalid("is not of the form database.collection"))?;
        if database.is_empty() || collection.is_empty() {
            return Err(invalid("has an empty database or collection name"));
        }
        Ok(Self::new(database, collection))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Deadline and cancellation signal for blocking key vault calls.
///
/// Clones share the cancellation flag.
///
/// # Example
///
/// ```
/// use keyward::key_vault::CallContext;
/// use std::time::Duration;
///
/// let ctx = CallContext::new().with_timeout(Duration::from_secs(10));
/// let handle = ctx.cancel_handle();
/// assert!(ctx.check().is_ok());
/// handle.cancel();
/// assert!(ctx.check().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl CallContext {
    /// Creates a context with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a deadline relative to now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Sets an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns a handle that cancels this context and its clones.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }

    /// Fails if the context was cancelled or its deadline has passed.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Cancelled` or `VaultError::DeadlineExceeded`.
    pub fn check(&self) -> Result<(), VaultError> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(VaultError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(VaultError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

/// Cancels a [`CallContext`].
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A request to mint and store a new wrapped data key.
#[derive(Debug, Clone, Copy)]
pub struct CreateDataKey<'a> {
    /// Name of the master key service that wraps the key.
    pub provider: &'a str,
    /// Master key location; `None` for the local provider.
    pub master_key: Option<&'a MasterKeyOptions>,
    /// Aliases to record on the new key.
    pub key_alt_names: &'a [String],
}

/// Opens administrative sessions against a key vault.
pub trait KeyVaultConnector {
    /// Connects to the key vault at `namespace`.
    ///
    /// `kms_providers` are the credentials later creation calls authenticate with.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Unavailable` if the store cannot be reached, or a
    /// cancellation error from `ctx`.
    fn connect(
        &self,
        namespace: &Namespace,
        kms_providers: &KmsProviders,
        ctx: &CallContext,
    ) -> Result<Box<dyn KeyVaultSession + '_>, VaultError>;
}

/// An open administrative session. Must be closed with [`close`](Self::close).
pub trait KeyVaultSession {
    /// Finds the raw record whose `keyAltNames` contains `alt_name`.
    ///
    /// `Ok(None)` means no record matched; it is not an error.
    ///
    /// # Errors
    ///
    /// Returns connectivity or cancellation errors.
    fn find_by_alt_name(
        &mut self,
        alt_name: &str,
        ctx: &CallContext,
    ) -> Result<Option<Value>, VaultError>;

    /// Mints a data key, has it wrapped by the master key service, stores the
    /// record, and returns its `_id`.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::DuplicateAltName` if a unique alt-name index rejects
    /// the record, or connectivity, wrapping, or cancellation errors.
    fn create_data_key(
        &mut self,
        request: &CreateDataKey<'_>,
        ctx: &CallContext,
    ) -> Result<Binary, VaultError>;

    /// Ensures a unique index on `keyAltNames` for records that have one.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::DuplicateAltName` if existing records already
    /// violate uniqueness, or connectivity errors.
    fn ensure_alt_name_index(&mut self, ctx: &CallContext) -> Result<(), VaultError>;

    /// Releases the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session could not be shut down cleanly.
    fn close(self: Box<Self>) -> Result<(), VaultError>;
}

/// Record status of a usable data key.
pub const STATUS_ACTIVE: i32 = 0;

/// A wrapped data key as stored in the key vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataKeyRecord {
    /// Key identifier, subtype `04`.
    #[serde(rename = "_id")]
    pub id: Binary,
    /// Human-readable aliases.
    #[serde(default)]
    pub key_alt_names: Vec<String>,
    /// Data key wrapped by the master key.
    pub key_material: Binary,
    /// Master key description, tagged with `provider`.
    pub master_key: Value,
    /// When the record was created.
    pub creation_date: DateTime,
    /// When the record was last updated.
    pub update_date: DateTime,
    /// Always [`STATUS_ACTIVE`] for records created here.
    #[serde(default)]
    pub status: i32,
}

impl DataKeyRecord {
    /// Parses a raw key vault document.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Malformed` if a field is missing or mistyped.
    pub fn from_document(document: &Value) -> Result<Self, VaultError> {
        Self::deserialize(document).map_err(|e| VaultError::Malformed(e.to_string()))
    }

    /// Renders the record as a key vault document.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Malformed` if serialization fails.
    pub fn to_document(&self) -> Result<Value, VaultError> {
        serde_json::to_value(self).map_err(|e| VaultError::Malformed(e.to_string()))
    }

    /// Returns the record's key identifier.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKeyId` if the `_id` is empty.
    pub fn key_id(&self) -> Result<KeyId, Error> {
        KeyId::from_bytes(self.id.bytes())
    }

    /// Returns the provider tag recorded in `masterKey`.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        self.master_key.get("provider").and_then(Value::as_str)
    }

    /// Returns the remote master key options, `None` for local keys.
    #[must_use]
    pub fn master_key_options(&self) -> Option<MasterKeyOptions> {
        MasterKeyOptions::deserialize(&self.master_key).ok()
    }

    /// Returns true if `alt_name` is one of the record's aliases.
    #[must_use]
    pub fn has_alt_name(&self, alt_name: &str) -> bool {
        self.key_alt_names.iter().any(|name| name == alt_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_namespace_parse() {
        let ns: Namespace = "encryption.__keyVault".parse().unwrap();
        assert_eq!(ns.database(), "encryption");
        assert_eq!(ns.collection(), "__keyVault");
        assert_eq!(ns.to_string(), "encryption.__keyVault");

        let ns: Namespace = "db.system.keys".parse().unwrap();
        assert_eq!(ns.collection(), "system.keys");

        assert!("nodot".parse::<Namespace>().is_err());
        assert!(".coll".parse::<Namespace>().is_err());
        assert!("db.".parse::<Namespace>().is_err());
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = CallContext::new().with_deadline(Instant::now());
        assert!(matches!(ctx.check(), Err(VaultError::DeadlineExceeded)));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_cancel_is_shared_by_clones() {
        let ctx = CallContext::new();
        let clone = ctx.clone();
        ctx.cancel_handle().cancel();
        assert!(matches!(clone.check(), Err(VaultError::Cancelled)));
    }

    #[test]
    fn test_record_document_shape() {
        let document = json!({
            "_id": {"$binary": {"base64": "AAECAwQFBgcICQoLDA0ODw==", "subType": "04"}},
            "keyAltNames": ["demo-data-key"],
            "keyMaterial": {"$binary": {"base64": "AAAA", "subType": "00"}},
            "masterKey": {"provider": "gcp", "projectId": "p", "location": "global", "keyRing": "r", "keyName": "k"},
            "creationDate": {"$date": {"$numberLong": "1"}},
            "updateDate": {"$date": {"$numberLong": "1"}},
            "status": 0
        });
        let record = DataKeyRecord::from_document(&document).unwrap();
        assert!(record.has_alt_name("demo-data-key"));
        assert_eq!(record.provider(), Some("gcp"));
        assert_eq!(record.key_id().unwrap().to_string(), "AAECAwQFBgcICQoLDA0ODw==");
        assert!(matches!(record.master_key_options(), Some(MasterKeyOptions::Gcp(_))));
        assert_eq!(record.to_document().unwrap(), document);
    }

    #[test]
    fn test_record_rejects_missing_fields() {
        let document = json!({"keyAltNames": ["a"]});
        assert!(matches!(DataKeyRecord::from_document(&document), Err(VaultError::Malformed(_))));
    }
}
