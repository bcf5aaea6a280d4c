//! Data key lookup and creation.
//!
//! A data key is looked up in the key vault by alias and created through the
//! master key provider only when no record carries that alias yet. Repeated
//! sequential calls converge on one identifier.
//!
//! With the default [`CreationPolicy::FindThenCreate`], the lookup and the
//! insert are separate steps: two callers racing on an unused alias can both
//! miss and both create, leaving two records for one alias.
//! [`CreationPolicy::UniqueAltName`] closes that gap when the key vault
//! supports a unique index on `keyAltNames`.

use crate::error::{ConfigError, Error, VaultError};
use crate::extjson::Binary;
use crate::key_id::KeyId;
use crate::key_vault::{CallContext, CreateDataKey, KeyVaultConnector, KeyVaultSession, Namespace};
use crate::provider::MasterKeyProvider;
use serde_json::Value;
use tracing::{debug, info, warn};

/// How a missing data key is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CreationPolicy {
    /// Look the alias up, create if absent. Not safe against concurrent first use.
    #[default]
    FindThenCreate,
    /// Ensure a unique index on `keyAltNames` first; a duplicate-alias failure
    /// on insert means another caller won, and its record is returned.
    UniqueAltName,
}

/// Resolves data keys in one key vault.
///
/// # Example
///
/// ```
/// use keyward::data_key::{CreationPolicy, DataKeyManager};
/// use keyward::key_vault::{CallContext, LocalKeyVault};
/// use keyward::provider::{LocalProvider, MasterKeyProvider};
///
/// let vault = LocalKeyVault::in_memory();
/// let provider = MasterKeyProvider::from(LocalProvider::new(vec![3u8; 96])?);
/// let manager = DataKeyManager::new("encryption.__keyVault".parse::<keyward::key_vault::Namespace>()?, &vault)
///     .with_policy(CreationPolicy::UniqueAltName);
///
/// let ctx = CallContext::new();
/// let first = manager.get_or_create("billing", &provider, &ctx)?;
/// let second = manager.get_or_create("billing", &provider, &ctx)?;
/// assert_eq!(first, second);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct DataKeyManager<'a, C: KeyVaultConnector + ?Sized> {
    namespace: Namespace,
    store: &'a C,
    policy: CreationPolicy,
}

impl<'a, C: KeyVaultConnector + ?Sized> DataKeyManager<'a, C> {
    /// Creates a manager for the key vault at `namespace`.
    #[must_use]
    pub fn new(namespace: Namespace, store: &'a C) -> Self {
        Self { namespace, store, policy: CreationPolicy::default() }
    }

    /// Sets the creation policy.
    #[must_use]
    pub fn with_policy(mut self, policy: CreationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the key vault namespace.
    #[must_use]
    pub const fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Returns the identifier of the data key aliased `alias`, creating it
    /// with `provider` if no record carries the alias.
    ///
    /// The administrative session is closed on every path. If the operation
    /// already failed, a close failure is logged and the original error wins.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if `alias` is empty
    /// - `Error::KeyVault` for connectivity, wrapping, or cancellation failures
    /// - `Error::Decode` if the stored record's `_id` is not binary
    pub fn get_or_create(
        &self,
        alias: &str,
        provider: &MasterKeyProvider,
        ctx: &CallContext,
    ) -> Result<KeyId, Error> {
        if alias.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "keyAltName".to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        let target = Target { alias, provider: provider.name() };

        let mut session = self
            .store
            .connect(&self.namespace, &provider.credentials(), ctx)
            .map_err(|e| target.fail("connect to key vault", e))?;

        let result = self.resolve(session.as_mut(), &target, provider, ctx);
        let closed = session.close();

        match (result, closed) {
            (Ok(id), Ok(())) => Ok(id),
            (Ok(_), Err(source)) => Err(target.fail("close key vault session", source)),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                warn!(alias, error = %close_err, "closing key vault session failed after an earlier error");
                Err(err)
            }
        }
    }

    fn resolve(
        &self,
        session: &mut dyn KeyVaultSession,
        target: &Target<'_>,
        provider: &MasterKeyProvider,
        ctx: &CallContext,
    ) -> Result<KeyId, Error> {
        if self.policy == CreationPolicy::UniqueAltName {
            session.ensure_alt_name_index(ctx).map_err(|e| target.fail("ensure alt name index", e))?;
        }

        if let Some(id) = find(session, target, ctx)? {
            debug!(alias = target.alias, key_id = %id, "found existing data key");
            return Ok(id);
        }

        let options = provider.data_key_options();
        let alt_names = [target.alias.to_string()];
        let request = CreateDataKey {
            provider: target.provider,
            master_key: options.as_ref(),
            key_alt_names: &alt_names,
        };

        match session.create_data_key(&request, ctx) {
            Ok(id) => {
                let id = key_id_from(target, id)?;
                info!(alias = target.alias, provider = target.provider, key_id = %id, "created data key");
                Ok(id)
            }
            Err(VaultError::DuplicateAltName(_)) if self.policy == CreationPolicy::UniqueAltName => {
                debug!(alias = target.alias, "lost data key creation race, reading winner");
                find(session, target, ctx)?.ok_or_else(|| {
                    target.fail(
                        "find data key",
                        VaultError::Malformed("alias reported as taken but no record found".to_string()),
                    )
                })
            }
            Err(source) => Err(target.fail("create data key", source)),
        }
    }
}

/// Returns the identifier of the data key aliased `alias` in the key vault at
/// `namespace`, creating it with `provider` if absent.
///
/// # Errors
///
/// See [`DataKeyManager::get_or_create`].
pub fn get_or_create_data_key<C: KeyVaultConnector + ?Sized>(
    namespace: &Namespace,
    store: &C,
    alias: &str,
    provider: &MasterKeyProvider,
    ctx: &CallContext,
) -> Result<KeyId, Error> {
    DataKeyManager::new(namespace.clone(), store).get_or_create(alias, provider, ctx)
}

/// The alias and provider an operation is acting for.
struct Target<'a> {
    alias: &'a str,
    provider: &'static str,
}

impl Target<'_> {
    fn fail(&self, operation: &'static str, source: VaultError) -> Error {
        Error::KeyVault {
            operation,
            alias: self.alias.to_string(),
            provider: self.provider.to_string(),
            source,
        }
    }

    fn decode_error(&self, reason: impl Into<String>) -> Error {
        Error::Decode { alias: self.alias.to_string(), reason: reason.into() }
    }
}

fn find(
    session: &mut dyn KeyVaultSession,
    target: &Target<'_>,
    ctx: &CallContext,
) -> Result<Option<KeyId>, Error> {
    let document = session
        .find_by_alt_name(target.alias, ctx)
        .map_err(|e| target.fail("find data key", e))?;
    document.map(|doc| decode_id(target, &doc)).transpose()
}

fn decode_id(target: &Target<'_>, document: &Value) -> Result<KeyId, Error> {
    let raw = document.get("_id").ok_or_else(|| target.decode_error("record has no _id"))?;
    let binary = Binary::from_value(raw).map_err(|reason| target.decode_error(reason))?;
    key_id_from(target, binary)
}

fn key_id_from(target: &Target<'_>, id: Binary) -> Result<KeyId, Error> {
    KeyId::from_bytes(id.into_bytes()).map_err(|_| target.decode_error("_id is empty"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        AwsMasterKey, AwsProvider, KmsProviders, LocalProvider, MasterKeyOptions,
        LOCAL_MASTER_KEY_SIZE,
    };
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    /// A key vault whose responses are queued up front.
    #[derive(Default)]
    struct ScriptedVault {
        connect_error: RefCell<Option<VaultError>>,
        finds: RefCell<VecDeque<Result<Option<Value>, VaultError>>>,
        creates: RefCell<VecDeque<Result<Binary, VaultError>>>,
        close_fails: bool,
        connects: Cell<usize>,
        closes: Cell<usize>,
        indexes: Cell<usize>,
        create_requests: RefCell<Vec<(String, Option<MasterKeyOptions>, Vec<String>)>>,
        seen_providers: RefCell<Vec<String>>,
    }

    impl ScriptedVault {
        fn find(self, result: Result<Option<Value>, VaultError>) -> Self {
            self.finds.borrow_mut().push_back(result);
            self
        }

        fn create(self, result: Result<Binary, VaultError>) -> Self {
            self.creates.borrow_mut().push_back(result);
            self
        }
    }

    struct ScriptedSession<'a>(&'a ScriptedVault);

    impl KeyVaultConnector for ScriptedVault {
        fn connect(
            &self,
            _namespace: &Namespace,
            kms_providers: &KmsProviders,
            ctx: &CallContext,
        ) -> Result<Box<dyn KeyVaultSession + '_>, VaultError> {
            ctx.check()?;
            if let Some(err) = self.connect_error.borrow_mut().take() {
                return Err(err);
            }
            self.connects.set(self.connects.get() + 1);
            self.seen_providers.borrow_mut().extend(kms_providers.names().map(str::to_string));
            Ok(Box::new(ScriptedSession(self)))
        }
    }

    impl KeyVaultSession for ScriptedSession<'_> {
        fn find_by_alt_name(&mut self, _alt: &str, ctx: &CallContext) -> Result<Option<Value>, VaultError> {
            ctx.check()?;
            self.0.finds.borrow_mut().pop_front().unwrap_or(Ok(None))
        }

        fn create_data_key(&mut self, request: &CreateDataKey<'_>, ctx: &CallContext) -> Result<Binary, VaultError> {
            ctx.check()?;
            self.0.create_requests.borrow_mut().push((
                request.provider.to_string(),
                request.master_key.cloned(),
                request.key_alt_names.to_vec(),
            ));
            self.0.creates.borrow_mut().pop_front().expect("unexpected create")
        }

        fn ensure_alt_name_index(&mut self, _ctx: &CallContext) -> Result<(), VaultError> {
            self.0.indexes.set(self.0.indexes.get() + 1);
            Ok(())
        }

        fn close(self: Box<Self>) -> Result<(), VaultError> {
            self.0.closes.set(self.0.closes.get() + 1);
            if self.0.close_fails {
                return Err(VaultError::Unavailable("close failed".to_string()));
            }
            Ok(())
        }
    }

    fn local() -> MasterKeyProvider {
        LocalProvider::new(vec![0u8; LOCAL_MASTER_KEY_SIZE]).unwrap().into()
    }

    fn aws() -> MasterKeyProvider {
        AwsProvider::new(
            "AKIAEXAMPLE",
            "secret",
            AwsMasterKey { region: "us-east-1".into(), key_arn: "arn".into(), endpoint: None },
        )
        .unwrap()
        .into()
    }

    fn ns() -> Namespace {
        Namespace::new("encryption", "__keyVault")
    }

    fn record(id_base64: &str) -> Value {
        json!({ "_id": { "$binary": { "base64": id_base64, "subType": "04" } }, "keyAltNames": ["demo-data-key"] })
    }

    #[test]
    fn test_existing_record_is_returned_without_write() {
        let vault = ScriptedVault::default().find(Ok(Some(record("AAECAwQFBgcICQoLDA0ODw=="))));
        let id = get_or_create_data_key(&ns(), &vault, "demo-data-key", &local(), &CallContext::new()).unwrap();

        assert_eq!(id.to_string(), "AAECAwQFBgcICQoLDA0ODw==");
        assert!(vault.create_requests.borrow().is_empty());
        assert_eq!(vault.closes.get(), 1);
    }

    #[test]
    fn test_missing_record_is_created_with_provider_options() {
        let vault = ScriptedVault::default().create(Ok(Binary::uuid(vec![7u8; 16])));
        let id = get_or_create_data_key(&ns(), &vault, "demo-data-key", &aws(), &CallContext::new()).unwrap();

        assert_eq!(id.as_bytes(), &[7u8; 16]);
        let requests = vault.create_requests.borrow();
        assert_eq!(requests.len(), 1);
        let (provider, options, alt_names) = &requests[0];
        assert_eq!(provider, "aws");
        assert!(matches!(options, Some(MasterKeyOptions::Aws(key)) if key.key_arn == "arn"));
        assert_eq!(alt_names, &["demo-data-key".to_string()]);
        assert_eq!(*vault.seen_providers.borrow(), ["aws".to_string()]);
        assert_eq!(vault.closes.get(), 1);
    }

    #[test]
    fn test_lookup_failure_is_not_treated_as_missing() {
        let vault = ScriptedVault::default().find(Err(VaultError::Unavailable("connection reset".into())));
        let err = get_or_create_data_key(&ns(), &vault, "demo-data-key", &local(), &CallContext::new())
            .unwrap_err();

        assert!(matches!(&err, Error::KeyVault { operation: "find data key", .. }));
        assert!(err.is_retryable());
        assert!(vault.create_requests.borrow().is_empty());
        assert_eq!(vault.closes.get(), 1);
    }

    #[test]
    fn test_malformed_id_is_a_decode_error() {
        let vault = ScriptedVault::default()
            .find(Ok(Some(json!({ "_id": "not-binary", "keyAltNames": ["demo-data-key"] }))));
        let err = get_or_create_data_key(&ns(), &vault, "demo-data-key", &local(), &CallContext::new())
            .unwrap_err();

        assert!(matches!(err, Error::Decode { alias, .. } if alias == "demo-data-key"));
        assert_eq!(vault.closes.get(), 1);
    }

    #[test]
    fn test_missing_id_is_a_decode_error() {
        let vault = ScriptedVault::default().find(Ok(Some(json!({ "keyAltNames": ["demo-data-key"] }))));
        let err = get_or_create_data_key(&ns(), &vault, "demo-data-key", &local(), &CallContext::new())
            .unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn test_creation_failure_closes_session() {
        let vault = ScriptedVault::default().create(Err(VaultError::Unavailable("kms timeout".into())));
        let err = get_or_create_data_key(&ns(), &vault, "demo-data-key", &aws(), &CallContext::new())
            .unwrap_err();

        assert!(matches!(
            &err,
            Error::KeyVault { operation: "create data key", provider, .. } if provider == "aws"
        ));
        assert_eq!(vault.closes.get(), 1);
    }

    #[test]
    fn test_close_failure_after_success_is_reported() {
        let vault = ScriptedVault { close_fails: true, ..ScriptedVault::default() }
            .find(Ok(Some(record("QUJDRA=="))));
        let err = get_or_create_data_key(&ns(), &vault, "demo-data-key", &local(), &CallContext::new())
            .unwrap_err();
        assert!(matches!(err, Error::KeyVault { operation: "close key vault session", .. }));
    }

    #[test]
    fn test_close_failure_after_error_keeps_original_error() {
        let vault = ScriptedVault { close_fails: true, ..ScriptedVault::default() }
            .find(Ok(Some(json!({ "_id": 1 }))));
        let err = get_or_create_data_key(&ns(), &vault, "demo-data-key", &local(), &CallContext::new())
            .unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
        assert_eq!(vault.closes.get(), 1);
    }

    #[test]
    fn test_cancelled_before_connect() {
        let vault = ScriptedVault::default();
        let ctx = CallContext::new();
        ctx.cancel_handle().cancel();

        let err = get_or_create_data_key(&ns(), &vault, "demo-data-key", &local(), &ctx).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(vault.connects.get(), 0);
    }

    #[test]
    fn test_connect_failure_is_surfaced() {
        let vault = ScriptedVault {
            connect_error: RefCell::new(Some(VaultError::Unavailable("no route".into()))),
            ..ScriptedVault::default()
        };
        let err = get_or_create_data_key(&ns(), &vault, "demo-data-key", &local(), &CallContext::new())
            .unwrap_err();
        assert!(matches!(err, Error::KeyVault { operation: "connect to key vault", .. }));
        assert_eq!(vault.closes.get(), 0);
    }

    #[test]
    fn test_unique_policy_converges_on_winner() {
        let vault = ScriptedVault::default()
            .find(Ok(None))
            .create(Err(VaultError::DuplicateAltName("demo-data-key".into())))
            .find(Ok(Some(record("QUJDRA=="))));
        let manager = DataKeyManager::new(ns(), &vault).with_policy(CreationPolicy::UniqueAltName);

        let id = manager.get_or_create("demo-data-key", &local(), &CallContext::new()).unwrap();
        assert_eq!(id.to_string(), "QUJDRA==");
        assert_eq!(vault.indexes.get(), 1);
        assert_eq!(vault.closes.get(), 1);
    }

    #[test]
    fn test_default_policy_surfaces_duplicate() {
        let vault = ScriptedVault::default().create(Err(VaultError::DuplicateAltName("demo-data-key".into())));
        let err = get_or_create_data_key(&ns(), &vault, "demo-data-key", &local(), &CallContext::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::KeyVault { source: VaultError::DuplicateAltName(_), .. }
        ));
        assert_eq!(vault.indexes.get(), 0);
    }

    #[test]
    fn test_empty_alias_is_rejected() {
        let vault = ScriptedVault::default();
        let err = get_or_create_data_key(&ns(), &vault, " ", &local(), &CallContext::new()).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Invalid { .. })));
        assert_eq!(vault.connects.get(), 0);
    }
}
