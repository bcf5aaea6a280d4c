//! Azure Key Vault master key provider.

use super::{non_empty, CredentialBundle, MasterKeyOptions};
use crate::config::ConfigSource;
use crate::error::ConfigError;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Directory (tenant) id.
pub const ENV_TENANT_ID: &str = "FLE_AZURE_TENANT_ID";
/// Application (client) id.
pub const ENV_CLIENT_ID: &str = "FLE_AZURE_CLIENT_ID";
/// Client secret.
pub const ENV_CLIENT_SECRET: &str = "FLE_AZURE_CLIENT_SECRET";
/// Optional identity platform override, defaults to `login.microsoftonline.com`.
pub const ENV_IDENTITY_PLATFORM_ENDPOINT: &str = "FLE_AZURE_IDENTITY_PLATFORM_ENDPOINT";
/// Key vault endpoint, e.g. `example.vault.azure.net`.
pub const ENV_KEYVAULT_ENDPOINT: &str = "FLE_AZURE_KEYVAULT_ENDPOINT";
/// Name of the wrapping key.
pub const ENV_KEY_NAME: &str = "FLE_AZURE_KEY_NAME";
/// Optional key version, defaults to the current version.
pub const ENV_KEY_VERSION: &str = "FLE_AZURE_KEY_VERSION";

/// Location of the Azure wrapping key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureMasterKey {
    /// Key vault endpoint.
    pub key_vault_endpoint: String,
    /// Key name.
    pub key_name: String,
    /// Key version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_version: Option<String>,
}

/// Credentials and master key location for Azure Key Vault.
#[derive(Debug, Clone)]
pub struct AzureProvider {
    tenant_id: String,
    client_id: String,
    client_secret: SecretString,
    identity_platform_endpoint: Option<String>,
    master_key: AzureMasterKey,
}

impl AzureProvider {
    /// Creates a provider from explicit values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if a required value is empty.
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        master_key: AzureMasterKey,
    ) -> Result<Self, ConfigError> {
        let tenant_id = non_empty("tenantId", tenant_id.into())?;
        let client_id = non_empty("clientId", client_id.into())?;
        let client_secret = non_empty("clientSecret", client_secret.into())?;
        non_empty("keyVaultEndpoint", &master_key.key_vault_endpoint)?;
        non_empty("keyName", &master_key.key_name)?;
        Ok(Self {
            tenant_id,
            client_id,
            client_secret: SecretString::new(client_secret),
            identity_platform_endpoint: None,
            master_key,
        })
    }

    /// Overrides the identity platform endpoint.
    #[must_use]
    pub fn with_identity_platform_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.identity_platform_endpoint = Some(endpoint.into());
        self
    }

    /// Reads the provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` naming every absent required value.
    pub fn from_config(source: &ConfigSource) -> Result<Self, ConfigError> {
        let [tenant_id, client_id, client_secret, key_vault_endpoint, key_name] = source.require_all([
            ENV_TENANT_ID,
            ENV_CLIENT_ID,
            ENV_CLIENT_SECRET,
            ENV_KEYVAULT_ENDPOINT,
            ENV_KEY_NAME,
        ])?;
        let master_key = AzureMasterKey {
            key_vault_endpoint,
            key_name,
            key_version: source.optional(ENV_KEY_VERSION),
        };
        let mut provider = Self::new(tenant_id, client_id, client_secret, master_key)?;
        provider.identity_platform_endpoint = source.optional(ENV_IDENTITY_PLATFORM_ENDPOINT);
        Ok(provider)
    }

    /// Returns the master key location.
    #[must_use]
    pub const fn master_key(&self) -> &AzureMasterKey {
        &self.master_key
    }

    pub(super) fn credentials(&self) -> CredentialBundle {
        CredentialBundle::new()
            .with_text("tenantId", self.tenant_id.as_str())
            .with_text("clientId", self.client_id.as_str())
            .with_text("clientSecret", self.client_secret.expose_secret().as_str())
            .with_optional("identityPlatformEndpoint", self.identity_platform_endpoint.as_deref())
    }

    pub(super) fn data_key_options(&self) -> MasterKeyOptions {
        MasterKeyOptions::Azure(self.master_key.clone())
    }
}
