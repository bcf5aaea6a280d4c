//! In-process key vault, optionally persisted to a JSON file.

use super::{
    CallContext, CreateDataKey, DataKeyRecord, KeyVaultConnector, KeyVaultSession, KeyWrapper,
    LocalKeyWrapper, Namespace, STATUS_ACTIVE,
};
use crate::error::{KeyWrapError, VaultError};
use crate::extjson::{Binary, DateTime};
use crate::key_id::KeyId;
use crate::provider::{KmsProviders, ProviderKind};
use chacha20poly1305::aead::{rand_core::RngCore, OsRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Size of a freshly minted data key in bytes.
pub const DATA_KEY_SIZE: usize = 96;

/// Key vault contents: raw documents per namespace.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaultState {
    #[serde(default)]
    collections: BTreeMap<String, Vec<Value>>,
    /// Namespaces with a unique index on `keyAltNames`.
    #[serde(default)]
    unique_alt_names: BTreeSet<String>,
}

impl VaultState {
    fn find(&self, namespace: &str, alt_name: &str) -> Option<&Value> {
        self.collections.get(namespace)?.iter().find(|doc| alt_name_matches(doc, alt_name))
    }

    fn duplicate_alt_name(&self, namespace: &str) -> Option<String> {
        let mut seen = BTreeSet::new();
        self.collections
            .get(namespace)?
            .iter()
            .flat_map(alt_names)
            .find(|name| !seen.insert(name.clone()))
    }

    /// Adds the documents and indexes of `other` that are missing here.
    fn merge(&mut self, other: Self) {
        for (namespace, documents) in other.collections {
            let ours = self.collections.entry(namespace).or_default();
            for document in documents {
                if !ours.iter().any(|have| same_document(have, &document)) {
                    ours.push(document);
                }
            }
        }
        self.unique_alt_names.extend(other.unique_alt_names);
    }
}

/// A key vault held in process memory.
///
/// Opened with [`open`](Self::open), every change is written back to a JSON
/// file of extended-JSON documents, so data keys survive restarts. Each access
/// first merges in what is on disk, so several handles on one file see and
/// keep each other's records. Writers in separate processes are not locked
/// against each other; two writes landing at the same instant can still lose
/// one record.
///
/// Data keys for the `local` provider are wrapped with the master key found in
/// the session's credentials. Remote providers need a [`KeyWrapper`] registered
/// with [`with_wrapper`](Self::with_wrapper); without one, creation fails as
/// unavailable.
///
/// # Example
///
/// ```
/// use keyward::data_key::get_or_create_data_key;
/// use keyward::key_vault::{CallContext, LocalKeyVault};
/// use keyward::provider::{LocalProvider, MasterKeyProvider};
///
/// let vault = LocalKeyVault::in_memory();
/// let provider = MasterKeyProvider::from(LocalProvider::new(vec![3u8; 96])?);
/// let namespace: keyward::key_vault::Namespace = "encryption.__keyVault".parse()?;
///
/// let id = get_or_create_data_key(&namespace, &vault, "demo-data-key", &provider, &CallContext::new())?;
/// assert_eq!(id.to_string().len(), 24);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct LocalKeyVault {
    state: Mutex<VaultState>,
    path: Option<PathBuf>,
    wrappers: HashMap<String, Arc<dyn KeyWrapper>>,
}

impl LocalKeyVault {
    /// Creates an empty, unpersisted key vault.
    #[must_use]
    pub fn in_memory() -> Self {
        Self { state: Mutex::new(VaultState::default()), path: None, wrappers: HashMap::new() }
    }

    /// Opens a file-backed key vault, creating it on first write.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Io` if the file cannot be read, or
    /// `VaultError::Malformed` if it is not a key vault file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, VaultError> {
        let path = path.into();
        let state = read_state(&path)?;
        debug!(path = %path.display(), "opened key vault file");
        Ok(Self { state: Mutex::new(state), path: Some(path), wrappers: HashMap::new() })
    }

    /// Registers the master key service used for `provider`.
    #[must_use]
    pub fn with_wrapper(mut self, provider: impl Into<String>, wrapper: Arc<dyn KeyWrapper>) -> Self {
        self.wrappers.insert(provider.into(), wrapper);
        self
    }

    /// Returns the file backing this vault, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Stores a raw document as-is, bypassing validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault cannot be persisted.
    pub fn insert_document(&self, namespace: &Namespace, document: Value) -> Result<(), VaultError> {
        let mut state = self.lock()?;
        let key = namespace.to_string();
        state.collections.entry(key.clone()).or_default().push(document);
        if let Err(err) = self.persist(&state) {
            if let Some(docs) = state.collections.get_mut(&key) {
                docs.pop();
            }
            return Err(err);
        }
        Ok(())
    }

    /// Returns copies of all raw documents in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Unavailable` if the vault lock is poisoned.
    pub fn documents(&self, namespace: &Namespace) -> Result<Vec<Value>, VaultError> {
        let state = self.lock()?;
        Ok(state.collections.get(&namespace.to_string()).cloned().unwrap_or_default())
    }

    /// Returns the parsed records in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Malformed` if any stored document is not a record.
    pub fn records(&self, namespace: &Namespace) -> Result<Vec<DataKeyRecord>, VaultError> {
        self.documents(namespace)?.iter().map(DataKeyRecord::from_document).collect()
    }

    /// Counts records in `namespace` carrying `alt_name`.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Unavailable` if the vault lock is poisoned.
    pub fn count_alt_name(&self, namespace: &Namespace, alt_name: &str) -> Result<usize, VaultError> {
        let state = self.lock()?;
        Ok(state
            .collections
            .get(&namespace.to_string())
            .map_or(0, |docs| docs.iter().filter(|doc| alt_name_matches(doc, alt_name)).count()))
    }

    /// Locks the in-memory state, merging in the file's current contents.
    fn lock(&self) -> Result<MutexGuard<'_, VaultState>, VaultError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| VaultError::Unavailable("key vault lock poisoned".to_string()))?;
        if let Some(path) = &self.path {
            state.merge(read_state(path)?);
        }
        Ok(state)
    }

    fn persist(&self, state: &VaultState) -> Result<(), VaultError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| VaultError::Malformed(format!("cannot serialize key vault: {e}")))?;
        let tmp = path.with_extension(format!("{:08x}.tmp", OsRng.next_u32()));
        fs::write(&tmp, bytes)?;
        if let Err(err) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }
}

fn read_state(path: &Path) -> Result<VaultState, VaultError> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| VaultError::Malformed(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(VaultState::default()),
        Err(e) => Err(e.into()),
    }
}

impl KeyVaultConnector for LocalKeyVault {
    fn connect(
        &self,
        namespace: &Namespace,
        kms_providers: &KmsProviders,
        ctx: &CallContext,
    ) -> Result<Box<dyn KeyVaultSession + '_>, VaultError> {
        ctx.check()?;

        let mut wrappers = self.wrappers.clone();
        let local_key = kms_providers
            .get(ProviderKind::Local.as_str())
            .and_then(|bundle| bundle.get("key"))
            .and_then(|value| value.expose_bytes());
        if let Some(key) = local_key {
            let wrapper: Arc<dyn KeyWrapper> = Arc::new(LocalKeyWrapper::new(key)?);
            wrappers.insert(ProviderKind::Local.as_str().to_string(), wrapper);
        }

        debug!(%namespace, providers = ?kms_providers.names().collect::<Vec<_>>(), "key vault session opened");
        Ok(Box::new(LocalSession { vault: self, namespace: namespace.to_string(), wrappers }))
    }
}

struct LocalSession<'a> {
    vault: &'a LocalKeyVault,
    namespace: String,
    wrappers: HashMap<String, Arc<dyn KeyWrapper>>,
}

impl KeyVaultSession for LocalSession<'_> {
    fn find_by_alt_name(
        &mut self,
        alt_name: &str,
        ctx: &CallContext,
    ) -> Result<Option<Value>, VaultError> {
        ctx.check()?;
        let state = self.vault.lock()?;
        Ok(state.find(&self.namespace, alt_name).cloned())
    }

    fn create_data_key(
        &mut self,
        request: &CreateDataKey<'_>,
        ctx: &CallContext,
    ) -> Result<Binary, VaultError> {
        ctx.check()?;

        let wrapper = self.wrappers.get(request.provider).ok_or_else(|| {
            VaultError::Unavailable(format!("no route to the `{}` master key service", request.provider))
        })?;
        if let Some(options) = request.master_key {
            if options.kind().as_str() != request.provider {
                return Err(KeyWrapError::InvalidMasterKey(format!(
                    "{} master key options given for provider `{}`",
                    options.kind(),
                    request.provider
                ))
                .into());
            }
        }

        let mut data_key = Zeroizing::new(vec![0u8; DATA_KEY_SIZE]);
        OsRng.fill_bytes(&mut data_key);
        let wrapped = wrapper.wrap_data_key(request.master_key, &data_key)?;
        drop(data_key);

        // Wrapping may have taken a round-trip to a remote service.
        ctx.check()?;

        let master_key = match request.master_key {
            Some(options) => options.to_document(),
            None => serde_json::json!({ "provider": request.provider }),
        };
        let now = DateTime::now();
        let record = DataKeyRecord {
            id: KeyId::generate().to_binary(),
            key_alt_names: request.key_alt_names.to_vec(),
            key_material: Binary::generic(wrapped),
            master_key,
            creation_date: now,
            update_date: now,
            status: STATUS_ACTIVE,
        };
        let document = record.to_document()?;

        let mut state = self.vault.lock()?;
        if state.unique_alt_names.contains(&self.namespace) {
            if let Some(taken) =
                request.key_alt_names.iter().find(|name| state.find(&self.namespace, name).is_some())
            {
                return Err(VaultError::DuplicateAltName(taken.clone()));
            }
        }
        state.collections.entry(self.namespace.clone()).or_default().push(document);
        if let Err(err) = self.vault.persist(&state) {
            if let Some(docs) = state.collections.get_mut(&self.namespace) {
                docs.pop();
            }
            return Err(err);
        }

        info!(namespace = %self.namespace, provider = request.provider, "created data key");
        Ok(record.id)
    }

    fn ensure_alt_name_index(&mut self, ctx: &CallContext) -> Result<(), VaultError> {
        ctx.check()?;
        let mut state = self.vault.lock()?;
        if state.unique_alt_names.contains(&self.namespace) {
            return Ok(());
        }
        if let Some(duplicate) = state.duplicate_alt_name(&self.namespace) {
            return Err(VaultError::DuplicateAltName(duplicate));
        }
        state.unique_alt_names.insert(self.namespace.clone());
        if let Err(err) = self.vault.persist(&state) {
            state.unique_alt_names.remove(&self.namespace);
            return Err(err);
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), VaultError> {
        debug!(namespace = %self.namespace, "key vault session closed");
        Ok(())
    }
}

/// Matches the store's query semantics: an array field matches if any element
/// equals the value, a scalar field if it equals the value.
fn alt_name_matches(document: &Value, alt_name: &str) -> bool {
    match document.get("keyAltNames") {
        Some(Value::Array(names)) => names.iter().any(|n| n.as_str() == Some(alt_name)),
        Some(Value::String(name)) => name == alt_name,
        _ => false,
    }
}

/// Records are identified by `_id`; documents without one by their contents.
fn same_document(a: &Value, b: &Value) -> bool {
    match (a.get("_id"), b.get("_id")) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn alt_names(document: &Value) -> Vec<String> {
    match document.get("keyAltNames") {
        Some(Value::Array(names)) => names.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        Some(Value::String(name)) => vec![name.clone()],
        _ => Vec::new(),
    }
}
