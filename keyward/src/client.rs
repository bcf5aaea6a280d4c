//! Hand-off to the encrypted client.
//!
//! The core does not read or write encrypted documents. It resolves the data
//! key, compiles the schema, and packages both with the provider credentials
//! as [`AutoEncryptionOptions`] for an [`EncryptedClientFactory`].

use crate::config::Settings;
use crate::data_key::get_or_create_data_key;
use crate::error::Error;
use crate::key_vault::{CallContext, KeyVaultConnector, Namespace};
use crate::provider::{KmsProviders, MasterKeyProvider};
use crate::schema::{EncryptionSchema, SchemaMap};
use serde_json::{json, Map, Value};
use tracing::info;

/// Settings for the query analysis process the encrypted client spawns.
///
/// Unset fields are left to the client's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraOptions {
    pub mongocryptd_uri: Option<String>,
    pub mongocryptd_bypass_spawn: Option<bool>,
    pub mongocryptd_spawn_path: Option<String>,
    pub mongocryptd_spawn_args: Option<Vec<String>>,
}

impl ExtraOptions {
    /// Returns true if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Renders the set fields with the names the client expects.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let mut map = Map::new();
        if let Some(uri) = &self.mongocryptd_uri {
            map.insert("mongocryptdURI".to_string(), json!(uri));
        }
        if let Some(bypass) = self.mongocryptd_bypass_spawn {
            map.insert("mongocryptdBypassSpawn".to_string(), json!(bypass));
        }
        if let Some(path) = &self.mongocryptd_spawn_path {
            map.insert("mongocryptdSpawnPath".to_string(), json!(path));
        }
        if let Some(args) = &self.mongocryptd_spawn_args {
            map.insert("mongocryptdSpawnArgs".to_string(), json!(args));
        }
        Value::Object(map)
    }
}

/// Everything an encrypted client needs to encrypt and decrypt automatically.
#[derive(Debug, Clone)]
pub struct AutoEncryptionOptions {
    pub key_vault_namespace: Namespace,
    pub kms_providers: KmsProviders,
    pub schema_map: SchemaMap,
    pub extra_options: ExtraOptions,
}

impl AutoEncryptionOptions {
    #[must_use]
    pub fn new(key_vault_namespace: Namespace, kms_providers: KmsProviders, schema_map: SchemaMap) -> Self {
        Self { key_vault_namespace, kms_providers, schema_map, extra_options: ExtraOptions::default() }
    }

    #[must_use]
    pub fn with_extra_options(mut self, extra_options: ExtraOptions) -> Self {
        self.extra_options = extra_options;
        self
    }

    /// Renders the options document, credential values included.
    #[must_use]
    pub fn to_document(&self) -> Value {
        self.render(self.kms_providers.to_document())
    }

    /// Renders the options document with credential values masked.
    #[must_use]
    pub fn to_redacted_document(&self) -> Value {
        self.render(self.kms_providers.to_redacted_document())
    }

    fn render(&self, kms_providers: Value) -> Value {
        let mut map = Map::new();
        map.insert("keyVaultNamespace".to_string(), json!(self.key_vault_namespace.to_string()));
        map.insert("kmsProviders".to_string(), kms_providers);
        map.insert("schemaMap".to_string(), self.schema_map.to_document());
        if !self.extra_options.is_empty() {
            map.insert("extraOptions".to_string(), self.extra_options.to_document());
        }
        Value::Object(map)
    }
}

/// Builds a client that applies the schema map on every read and write.
pub trait EncryptedClientFactory {
    /// The encrypting client.
    type Client;
    /// Failure to build the client.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Builds a client from the options.
    ///
    /// # Errors
    ///
    /// Returns an implementation-defined error if the client cannot be built.
    fn connect(&self, options: &AutoEncryptionOptions) -> Result<Self::Client, Self::Error>;
}

/// Resolves the data key, compiles the schema for the target collection, and
/// packages the result with the provider credentials.
///
/// # Errors
///
/// Propagates data key and schema errors.
pub fn prepare_auto_encryption<C: KeyVaultConnector + ?Sized>(
    settings: &Settings,
    provider: &MasterKeyProvider,
    store: &C,
    ctx: &CallContext,
) -> Result<AutoEncryptionOptions, Error> {
    let key_id =
        get_or_create_data_key(&settings.key_vault_namespace, store, &settings.key_alt_name, provider, ctx)?;
    let schema = EncryptionSchema::compile(&key_id.to_string())?;

    let schema_map: SchemaMap = [(settings.target_namespace.clone(), schema)].into_iter().collect();
    info!(
        provider = provider.name(),
        key_id = %key_id,
        target = %settings.target_namespace,
        "prepared auto encryption options"
    );
    Ok(AutoEncryptionOptions::new(settings.key_vault_namespace.clone(), provider.credentials(), schema_map))
}

/// Runs [`prepare_auto_encryption`] and hands the options to `factory`.
///
/// # Errors
///
/// Propagates preparation errors; factory failures become `Error::ClientFactory`.
pub fn open_encrypted_client<C, F>(
    settings: &Settings,
    provider: &MasterKeyProvider,
    store: &C,
    factory: &F,
    ctx: &CallContext,
) -> Result<F::Client, Error>
where
    C: KeyVaultConnector + ?Sized,
    F: EncryptedClientFactory,
{
    let options = prepare_auto_encryption(settings, provider, store, ctx)?;
    factory.connect(&options).map_err(|e| Error::ClientFactory(Box::new(e)))
}
