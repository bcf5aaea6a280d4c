//! Master key providers.
//!
//! Each external key-wrapping service contributes two things: a credential
//! bundle used to authenticate with it, and the location of the master key
//! new data keys are wrapped with. The set of services is closed, so providers
//! are variants of [`MasterKeyProvider`] rather than trait objects.
//!
//! Construction only reads configuration; no provider makes network calls.

mod aws;
mod azure;
mod credentials;
mod gcp;
mod local;

pub use aws::{AwsMasterKey, AwsProvider};
pub use azure::{AzureMasterKey, AzureProvider};
pub use credentials::{CredentialBundle, CredentialValue, KmsProviders, REDACTED};
pub use gcp::{GcpMasterKey, GcpProvider};
pub use local::{LocalProvider, LOCAL_MASTER_KEY_SIZE};

/// Configuration names read by each provider.
pub mod env {
    pub use super::aws::{
        ENV_ACCESS_KEY as AWS_ACCESS_KEY, ENV_KEY_ARN as AWS_KEY_ARN,
        ENV_KEY_ENDPOINT as AWS_KEY_ENDPOINT, ENV_KEY_REGION as AWS_KEY_REGION,
        ENV_SECRET_ACCESS_KEY as AWS_SECRET_ACCESS_KEY,
    };
    pub use super::azure::{
        ENV_CLIENT_ID as AZURE_CLIENT_ID, ENV_CLIENT_SECRET as AZURE_CLIENT_SECRET,
        ENV_IDENTITY_PLATFORM_ENDPOINT as AZURE_IDENTITY_PLATFORM_ENDPOINT,
        ENV_KEYVAULT_ENDPOINT as AZURE_KEYVAULT_ENDPOINT, ENV_KEY_NAME as AZURE_KEY_NAME,
        ENV_KEY_VERSION as AZURE_KEY_VERSION, ENV_TENANT_ID as AZURE_TENANT_ID,
    };
    pub use super::gcp::{
        ENV_CRED_ENDPOINT as GCP_CRED_ENDPOINT, ENV_EMAIL as GCP_EMAIL,
        ENV_KEY_ENDPOINT as GCP_KEY_ENDPOINT, ENV_KEY_NAME as GCP_KEY_NAME,
        ENV_KEY_RING as GCP_KEY_RING, ENV_KEY_VERSION as GCP_KEY_VERSION,
        ENV_LOCATION as GCP_LOCATION, ENV_PRIVATE_KEY as GCP_PRIVATE_KEY,
        ENV_PROJ_ID as GCP_PROJ_ID,
    };
}

use crate::config::ConfigSource;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Tag identifying a master key service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// AWS KMS.
    Aws,
    /// Azure Key Vault.
    Azure,
    /// Google Cloud KMS.
    Gcp,
    /// Key material held locally.
    Local,
}

impl ProviderKind {
    /// Returns the provider name used as the credential and key vault tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(Self::Aws),
            "azure" => Ok(Self::Azure),
            "gcp" => Ok(Self::Gcp),
            "local" => Ok(Self::Local),
            _ => Err(ConfigError::UnknownProvider(s.to_string())),
        }
    }
}

/// Where and how a remote service should wrap a new data key.
///
/// Serializes with a `provider` tag, which is the `masterKey` shape stored in
/// key vault records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum MasterKeyOptions {
    /// AWS customer master key.
    Aws(AwsMasterKey),
    /// Azure Key Vault key.
    Azure(AzureMasterKey),
    /// Google Cloud KMS key.
    Gcp(GcpMasterKey),
}

impl MasterKeyOptions {
    /// Returns the provider these options belong to.
    #[must_use]
    pub const fn kind(&self) -> ProviderKind {
        match self {
            Self::Aws(_) => ProviderKind::Aws,
            Self::Azure(_) => ProviderKind::Azure,
            Self::Gcp(_) => ProviderKind::Gcp,
        }
    }

    /// Renders the options with the `provider` tag, as stored in a key vault
    /// record's `masterKey`.
    #[must_use]
    pub fn to_document(&self) -> Value {
        // Plain structs of strings always serialize.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A configured master key service.
///
/// # Example
///
/// ```
/// use keyward::provider::{LocalProvider, MasterKeyProvider};
///
/// let provider = MasterKeyProvider::from(LocalProvider::new(vec![0u8; 96])?);
/// assert_eq!(provider.name(), "local");
/// assert!(provider.data_key_options().is_none());
/// # Ok::<(), keyward::error::ConfigError>(())
/// ```
#[derive(Debug, Clone)]
pub enum MasterKeyProvider {
    /// AWS KMS.
    Aws(AwsProvider),
    /// Azure Key Vault.
    Azure(AzureProvider),
    /// Google Cloud KMS.
    Gcp(GcpProvider),
    /// Local key material.
    Local(LocalProvider),
}

impl MasterKeyProvider {
    /// Builds the provider selected by `kind`.
    ///
    /// Remote providers are read from `source`. The local provider's key
    /// material lives outside configuration, so it is obtained from `local`,
    /// which is only called when `kind` is [`ProviderKind::Local`].
    ///
    /// # Errors
    ///
    /// Returns the configuration error of the selected provider, or whatever
    /// `local` returns.
    pub fn from_config<E, F>(kind: ProviderKind, source: &ConfigSource, local: F) -> Result<Self, E>
    where
        E: From<ConfigError>,
        F: FnOnce() -> Result<LocalProvider, E>,
    {
        let provider = match kind {
            ProviderKind::Aws => Self::Aws(AwsProvider::from_config(source)?),
            ProviderKind::Azure => Self::Azure(AzureProvider::from_config(source)?),
            ProviderKind::Gcp => Self::Gcp(GcpProvider::from_config(source)?),
            ProviderKind::Local => Self::Local(local()?),
        };
        Ok(provider)
    }

    /// Returns the provider tag.
    #[must_use]
    pub const fn kind(&self) -> ProviderKind {
        match self {
            Self::Aws(_) => ProviderKind::Aws,
            Self::Azure(_) => ProviderKind::Azure,
            Self::Gcp(_) => ProviderKind::Gcp,
            Self::Local(_) => ProviderKind::Local,
        }
    }

    /// Returns the provider name (`"aws"`, `"azure"`, `"gcp"`, `"local"`).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Returns a one-entry mapping from [`name`](Self::name) to the provider's
    /// authentication bundle.
    #[must_use]
    pub fn credentials(&self) -> KmsProviders {
        let bundle = match self {
            Self::Aws(provider) => provider.credentials(),
            Self::Azure(provider) => provider.credentials(),
            Self::Gcp(provider) => provider.credentials(),
            Self::Local(provider) => provider.credentials(),
        };
        KmsProviders::single(self.name(), bundle)
    }

    /// Returns the master key location for new data keys, `None` for local.
    #[must_use]
    pub fn data_key_options(&self) -> Option<MasterKeyOptions> {
        match self {
            Self::Aws(provider) => Some(provider.data_key_options()),
            Self::Azure(provider) => Some(provider.data_key_options()),
            Self::Gcp(provider) => Some(provider.data_key_options()),
            Self::Local(_) => None,
        }
    }
}

impl From<AwsProvider> for MasterKeyProvider {
    fn from(provider: AwsProvider) -> Self {
        Self::Aws(provider)
    }
}

impl From<AzureProvider> for MasterKeyProvider {
    fn from(provider: AzureProvider) -> Self {
        Self::Azure(provider)
    }
}

impl From<GcpProvider> for MasterKeyProvider {
    fn from(provider: GcpProvider) -> Self {
        Self::Gcp(provider)
    }
}

impl From<LocalProvider> for MasterKeyProvider {
    fn from(provider: LocalProvider) -> Self {
        Self::Local(provider)
    }
}

fn non_empty<S: AsRef<str>>(field: &str, value: S) -> Result<S, ConfigError> {
    if value.as_ref().trim().is_empty() {
        return Err(ConfigError::Missing(vec![field.to_string()]));
    }
    Ok(value)
}
