//! Configuration loading.
//!
//! Values are read once into a [`ConfigSource`] and passed down explicitly;
//! provider constructors never touch the process environment themselves.

use crate::error::ConfigError;
use crate::key_vault::Namespace;
use crate::provider::ProviderKind;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Selects the master key provider.
pub const ENV_KMS_PROVIDER: &str = "FLE_KMS_PROVIDER";
/// Overrides the key vault namespace.
pub const ENV_KEY_VAULT_NAMESPACE: &str = "FLE_KEY_VAULT_NAMESPACE";
/// Overrides the data key alias.
pub const ENV_KEY_ALT_NAME: &str = "FLE_KEY_ALT_NAME";
/// Overrides the namespace the schema is compiled for.
pub const ENV_TARGET_NAMESPACE: &str = "FLE_TARGET_NAMESPACE";
/// Overrides where the local master key is persisted.
pub const ENV_LOCAL_MASTER_KEY_PATH: &str = "FLE_LOCAL_MASTER_KEY_PATH";

/// Default key vault namespace.
pub const DEFAULT_KEY_VAULT_NAMESPACE: &str = "encryption.__keyVault";
/// Default data key alias.
pub const DEFAULT_KEY_ALT_NAME: &str = "demo-data-key";
/// Default target namespace.
pub const DEFAULT_TARGET_NAMESPACE: &str = "medicalRecords.patients";
/// Default local master key file.
pub const DEFAULT_LOCAL_MASTER_KEY_PATH: &str = "master-key.txt";

/// A snapshot of named configuration values.
///
/// Empty and whitespace-only values are treated as absent.
///
/// # Example
///
/// ```
/// use keyward::config::ConfigSource;
///
/// let source = ConfigSource::from_pairs([("FLE_AWS_KEY_REGION", "us-east-1")]);
/// assert_eq!(source.get("FLE_AWS_KEY_REGION"), Some("us-east-1"));
/// assert!(source.require("FLE_AWS_KEY_ARN").is_err());
/// ```
#[derive(Clone, Default)]
pub struct ConfigSource {
    values: BTreeMap<String, String>,
}

impl ConfigSource {
    /// Captures the current process environment.
    ///
    /// Variables whose name or value is not valid Unicode are skipped.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_pairs(
            std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
        )
    }

    /// Builds a source from explicit pairs.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self { values: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }

    /// Returns a non-empty value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str).filter(|v| !v.trim().is_empty())
    }

    /// Returns an owned non-empty value.
    #[must_use]
    pub fn optional(&self, name: &str) -> Option<String> {
        self.get(name).map(str::to_string)
    }

    /// Returns a required value.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the value is absent or empty.
    pub fn require(&self, name: &str) -> Result<&str, ConfigError> {
        self.get(name).ok_or_else(|| ConfigError::Missing(vec![name.to_string()]))
    }

    /// Returns several required values at once.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` naming every absent or empty value.
    pub fn require_all<const N: usize>(
        &self,
        names: [&str; N],
    ) -> Result<[String; N], ConfigError> {
        let missing: Vec<String> = names
            .iter()
            .filter(|name| self.get(name).is_none())
            .map(|name| (*name).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        Ok(names.map(|name| self.get(name).unwrap_or_default().to_string()))
    }
}

impl std::fmt::Debug for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Values may hold credentials.
        f.debug_struct("ConfigSource").field("names", &self.values.keys()).finish()
    }
}

/// Application-level settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Which master key service wraps data keys.
    pub provider: ProviderKind,
    /// Where wrapped data keys are stored.
    pub key_vault_namespace: Namespace,
    /// Alias of the application's data key.
    pub key_alt_name: String,
    /// Collection whose documents the schema applies to.
    pub target_namespace: Namespace,
    /// Where the local master key is persisted.
    pub local_master_key_path: PathBuf,
}

impl Settings {
    /// Loads settings, falling back to defaults for absent values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a present value is malformed.
    pub fn load(source: &ConfigSource) -> Result<Self, ConfigError> {
        let provider = match source.get(ENV_KMS_PROVIDER) {
            Some(tag) => tag.parse()?,
            None => ProviderKind::Local,
        };
        let key_vault_namespace = namespace(source, ENV_KEY_VAULT_NAMESPACE, DEFAULT_KEY_VAULT_NAMESPACE)?;
        let target_namespace = namespace(source, ENV_TARGET_NAMESPACE, DEFAULT_TARGET_NAMESPACE)?;
        let key_alt_name =
            source.optional(ENV_KEY_ALT_NAME).unwrap_or_else(|| DEFAULT_KEY_ALT_NAME.to_string());
        let local_master_key_path = Self::local_master_key_path(source);

        Ok(Self { provider, key_vault_namespace, key_alt_name, target_namespace, local_master_key_path })
    }

    /// Resolves only the local master key path; never fails.
    #[must_use]
    pub fn local_master_key_path(source: &ConfigSource) -> PathBuf {
        source.get(ENV_LOCAL_MASTER_KEY_PATH).unwrap_or(DEFAULT_LOCAL_MASTER_KEY_PATH).into()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Local,
            key_vault_namespace: Namespace::new("encryption", "__keyVault"),
            key_alt_name: DEFAULT_KEY_ALT_NAME.to_string(),
            target_namespace: Namespace::new("medicalRecords", "patients"),
            local_master_key_path: DEFAULT_LOCAL_MASTER_KEY_PATH.into(),
        }
    }
}

fn namespace(source: &ConfigSource, name: &str, default: &str) -> Result<Namespace, ConfigError> {
    source.get(name).unwrap_or(default).parse().map_err(|err| match err {
        ConfigError::Invalid { reason, .. } => ConfigError::Invalid { name: name.to_string(), reason },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_values_are_missing() {
        let source = ConfigSource::from_pairs([("A", ""), ("B", "   "), ("C", "value")]);
        assert_eq!(source.get("A"), None);
        assert_eq!(source.get("B"), None);
        assert_eq!(source.get("C"), Some("value"));
    }

    #[test]
    fn test_require_all_reports_every_missing_name() {
        let source = ConfigSource::from_pairs([("B", "b")]);
        let err = source.require_all(["A", "B", "C"]).unwrap_err();
        assert_eq!(err, ConfigError::Missing(vec!["A".into(), "C".into()]));

        let source = ConfigSource::from_pairs([("A", "a"), ("B", "b")]);
        assert_eq!(source.require_all(["A", "B"]).unwrap(), ["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::load(&ConfigSource::default()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.key_vault_namespace.to_string(), DEFAULT_KEY_VAULT_NAMESPACE);
    }

    #[test]
    fn test_settings_overrides() {
        let source = ConfigSource::from_pairs([
            (ENV_KMS_PROVIDER, "gcp"),
            (ENV_KEY_VAULT_NAMESPACE, "keys.vault"),
            (ENV_KEY_ALT_NAME, "billing"),
            (ENV_TARGET_NAMESPACE, "billing.invoices"),
        ]);
        let settings = Settings::load(&source).unwrap();
        assert_eq!(settings.provider, ProviderKind::Gcp);
        assert_eq!(settings.key_vault_namespace, Namespace::new("keys", "vault"));
        assert_eq!(settings.key_alt_name, "billing");
        assert_eq!(settings.target_namespace, Namespace::new("billing", "invoices"));
    }

    #[test]
    fn test_settings_rejects_bad_values() {
        let source = ConfigSource::from_pairs([(ENV_KMS_PROVIDER, "kmip")]);
        assert_eq!(Settings::load(&source), Err(ConfigError::UnknownProvider("kmip".into())));

        let source = ConfigSource::from_pairs([(ENV_KEY_VAULT_NAMESPACE, "novault")]);
        assert!(matches!(
            Settings::load(&source),
            Err(ConfigError::Invalid { name, .. }) if name == ENV_KEY_VAULT_NAMESPACE
        ));
    }

    #[test]
    fn test_debug_hides_values() {
        let source = ConfigSource::from_pairs([("FLE_AWS_SECRET_ACCESS_KEY", "hunter2")]);
        let debug = format!("{source:?}");
        assert!(debug.contains("FLE_AWS_SECRET_ACCESS_KEY"));
        assert!(!debug.contains("hunter2"));
    }
}
