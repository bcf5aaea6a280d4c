//! AWS KMS master key provider.

use super::{non_empty, CredentialBundle, MasterKeyOptions};
use crate::config::ConfigSource;
use crate::error::ConfigError;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Access key id.
pub const ENV_ACCESS_KEY: &str = "FLE_AWS_ACCESS_KEY";
/// Secret access key.
pub const ENV_SECRET_ACCESS_KEY: &str = "FLE_AWS_SECRET_ACCESS_KEY";
/// ARN of the customer master key.
pub const ENV_KEY_ARN: &str = "FLE_AWS_KEY_ARN";
/// Region of the customer master key.
pub const ENV_KEY_REGION: &str = "FLE_AWS_KEY_REGION";
/// Optional KMS endpoint override.
pub const ENV_KEY_ENDPOINT: &str = "FLE_AWS_KEY_ENDPOINT";

/// Location of the AWS customer master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsMasterKey {
    /// Region holding the key.
    pub region: String,
    /// Key ARN.
    #[serde(rename = "key")]
    pub key_arn: String,
    /// Defaults to `kms.<region>.amazonaws.com`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Credentials and master key location for AWS KMS.
#[derive(Debug, Clone)]
pub struct AwsProvider {
    access_key_id: String,
    secret_access_key: SecretString,
    master_key: AwsMasterKey,
}

impl AwsProvider {
    /// Creates a provider from explicit values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if a required value is empty.
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        master_key: AwsMasterKey,
    ) -> Result<Self, ConfigError> {
        let access_key_id = non_empty("accessKeyId", access_key_id.into())?;
        let secret_access_key = non_empty("secretAccessKey", secret_access_key.into())?;
        non_empty("key", &master_key.key_arn)?;
        non_empty("region", &master_key.region)?;
        Ok(Self {
            access_key_id,
            secret_access_key: SecretString::new(secret_access_key),
            master_key,
        })
    }

    /// Reads the provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` naming every absent required value.
    pub fn from_config(source: &ConfigSource) -> Result<Self, ConfigError> {
        let [access_key_id, secret_access_key, key_arn, region] =
            source.require_all([ENV_ACCESS_KEY, ENV_SECRET_ACCESS_KEY, ENV_KEY_ARN, ENV_KEY_REGION])?;
        let master_key =
            AwsMasterKey { region, key_arn, endpoint: source.optional(ENV_KEY_ENDPOINT) };
        Self::new(access_key_id, secret_access_key, master_key)
    }

    /// Returns the master key location.
    #[must_use]
    pub const fn master_key(&self) -> &AwsMasterKey {
        &self.master_key
    }

    pub(super) fn credentials(&self) -> CredentialBundle {
        CredentialBundle::new()
            .with_text("accessKeyId", self.access_key_id.as_str())
            .with_text("secretAccessKey", self.secret_access_key.expose_secret().as_str())
    }

    pub(super) fn data_key_options(&self) -> MasterKeyOptions {
        MasterKeyOptions::Aws(self.master_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> ConfigSource {
        ConfigSource::from_pairs([
            (ENV_ACCESS_KEY, "AKIAEXAMPLE"),
            (ENV_SECRET_ACCESS_KEY, "wJalrXUtnFEMI"),
            (ENV_KEY_ARN, "arn:aws:kms:us-east-1:123456789012:key/abcd"),
            (ENV_KEY_REGION, "us-east-1"),
        ])
    }

    #[test]
    fn test_from_config() {
        let provider = AwsProvider::from_config(&source()).unwrap();
        assert_eq!(provider.master_key().region, "us-east-1");
        assert_eq!(provider.master_key().endpoint, None);

        let bundle = provider.credentials();
        assert_eq!(bundle.field_names().collect::<Vec<_>>(), ["accessKeyId", "secretAccessKey"]);
        assert_eq!(bundle.get("secretAccessKey").and_then(|v| v.expose_text()), Some("wJalrXUtnFEMI"));
    }

    #[test]
    fn test_missing_values_are_listed() {
        let source = ConfigSource::from_pairs([(ENV_ACCESS_KEY, "AKIAEXAMPLE")]);
        let err = AwsProvider::from_config(&source).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing(vec![
                ENV_SECRET_ACCESS_KEY.into(),
                ENV_KEY_ARN.into(),
                ENV_KEY_REGION.into()
            ])
        );
    }

    #[test]
    fn test_master_key_document_shape() {
        let key = AwsMasterKey {
            region: "eu-west-1".into(),
            key_arn: "arn".into(),
            endpoint: Some("kms.example.com".into()),
        };
        assert_eq!(
            serde_json::to_value(&key).unwrap(),
            serde_json::json!({"region": "eu-west-1", "key": "arn", "endpoint": "kms.example.com"})
        );
    }
}
