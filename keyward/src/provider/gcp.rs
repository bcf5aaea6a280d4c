//! Google Cloud KMS master key provider.

use super::{non_empty, CredentialBundle, MasterKeyOptions};
use crate::config::ConfigSource;
use crate::error::ConfigError;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Service account email.
pub const ENV_EMAIL: &str = "FLE_GCP_EMAIL";
/// Service account private key (base64 PKCS#8).
pub const ENV_PRIVATE_KEY: &str = "FLE_GCP_PRIVATE_KEY";
/// Optional OAuth endpoint override, defaults to `oauth2.googleapis.com`.
pub const ENV_CRED_ENDPOINT: &str = "FLE_GCP_CRED_ENDPOINT";
/// Project id.
pub const ENV_PROJ_ID: &str = "FLE_GCP_PROJ_ID";
/// Key location, e.g. `global`.
pub const ENV_LOCATION: &str = "FLE_GCP_LOCATION";
/// Key ring.
pub const ENV_KEY_RING: &str = "FLE_GCP_KEY_RING";
/// Key name.
pub const ENV_KEY_NAME: &str = "FLE_GCP_KEY_NAME";
/// Optional key version, defaults to the primary version.
pub const ENV_KEY_VERSION: &str = "FLE_GCP_KEY_VERSION";
/// Optional KMS endpoint override, defaults to `cloudkms.googleapis.com`.
pub const ENV_KEY_ENDPOINT: &str = "FLE_GCP_KEY_ENDPOINT";

/// Location of the GCP wrapping key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpMasterKey {
    /// Project id.
    pub project_id: String,
    /// Key location.
    pub location: String,
    /// Key ring.
    pub key_ring: String,
    /// Key name.
    pub key_name: String,
    /// Key version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_version: Option<String>,
    /// KMS endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Credentials and master key location for Google Cloud KMS.
#[derive(Debug, Clone)]
pub struct GcpProvider {
    email: String,
    private_key: SecretString,
    endpoint: Option<String>,
    master_key: GcpMasterKey,
}

impl GcpProvider {
    /// Creates a provider from explicit values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if a required value is empty.
    pub fn new(
        email: impl Into<String>,
        private_key: impl Into<String>,
        master_key: GcpMasterKey,
    ) -> Result<Self, ConfigError> {
        let email = non_empty("email", email.into())?;
        let private_key = non_empty("privateKey", private_key.into())?;
        non_empty("projectId", &master_key.project_id)?;
        non_empty("location", &master_key.location)?;
        non_empty("keyRing", &master_key.key_ring)?;
        non_empty("keyName", &master_key.key_name)?;
        Ok(Self { email, private_key: SecretString::new(private_key), endpoint: None, master_key })
    }

    /// Overrides the OAuth endpoint used to authenticate.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Reads the provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` naming every absent required value.
    pub fn from_config(source: &ConfigSource) -> Result<Self, ConfigError> {
        let [email, private_key, project_id, location, key_ring, key_name] = source.require_all([
            ENV_EMAIL,
            ENV_PRIVATE_KEY,
            ENV_PROJ_ID,
            ENV_LOCATION,
            ENV_KEY_RING,
            ENV_KEY_NAME,
        ])?;
        let master_key = GcpMasterKey {
            project_id,
            location,
            key_ring,
            key_name,
            key_version: source.optional(ENV_KEY_VERSION),
            endpoint: source.optional(ENV_KEY_ENDPOINT),
        };
        let mut provider = Self::new(email, private_key, master_key)?;
        provider.endpoint = source.optional(ENV_CRED_ENDPOINT);
        Ok(provider)
    }

    /// Returns the master key location.
    #[must_use]
    pub const fn master_key(&self) -> &GcpMasterKey {
        &self.master_key
    }

    pub(super) fn credentials(&self) -> CredentialBundle {
        CredentialBundle::new()
            .with_text("email", self.email.as_str())
            .with_text("privateKey", self.private_key.expose_secret().as_str())
            .with_optional("endpoint", self.endpoint.as_deref())
    }

    pub(super) fn data_key_options(&self) -> MasterKeyOptions {
        MasterKeyOptions::Gcp(self.master_key.clone())
    }
}
