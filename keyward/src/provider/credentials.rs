//! Credential bundles handed to the encrypted client.

use crate::extjson::Binary;
use secrecy::{ExposeSecret, SecretString, SecretVec};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Placeholder written in place of credential values by redacted renderings.
pub const REDACTED: &str = "[REDACTED]";

/// A single credential field value.
pub enum CredentialValue {
    /// Textual value (ids, secrets, endpoints).
    Text(SecretString),
    /// Raw bytes (local master key material).
    Bytes(SecretVec<u8>),
}

impl CredentialValue {
    /// Creates a textual value.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(SecretString::new(value.into()))
    }

    /// Creates a byte value.
    #[must_use]
    pub fn bytes(value: Vec<u8>) -> Self {
        Self::Bytes(SecretVec::new(value))
    }

    /// Returns true if the value holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.expose_secret().is_empty(),
            Self::Bytes(bytes) => bytes.expose_secret().is_empty(),
        }
    }

    /// Exposes a textual value.
    #[must_use]
    pub fn expose_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.expose_secret()),
            Self::Bytes(_) => None,
        }
    }

    /// Exposes a byte value.
    #[must_use]
    pub fn expose_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Text(_) => None,
            Self::Bytes(bytes) => Some(bytes.expose_secret()),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.expose_secret().clone()),
            Self::Bytes(bytes) => Binary::generic(bytes.expose_secret().clone()).to_value(),
        }
    }
}

impl Clone for CredentialValue {
    fn clone(&self) -> Self {
        match self {
            Self::Text(text) => Self::Text(text.clone()),
            Self::Bytes(bytes) => Self::Bytes(SecretVec::new(bytes.expose_secret().clone())),
        }
    }
}

impl fmt::Debug for CredentialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Authentication fields for one master key service.
///
/// Field names are fixed by the service's API and kept as literals.
#[derive(Clone, Default)]
pub struct CredentialBundle {
    fields: BTreeMap<&'static str, CredentialValue>,
}

impl CredentialBundle {
    /// Creates an empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field.
    #[must_use]
    pub fn with(mut self, field: &'static str, value: CredentialValue) -> Self {
        self.fields.insert(field, value);
        self
    }

    /// Adds a textual field.
    #[must_use]
    pub fn with_text(self, field: &'static str, value: impl Into<String>) -> Self {
        self.with(field, CredentialValue::text(value))
    }

    /// Adds a textual field only when a value is present.
    #[must_use]
    pub fn with_optional(self, field: &'static str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.with_text(field, value),
            None => self,
        }
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&CredentialValue> {
        self.fields.get(field)
    }

    /// Returns the field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.keys().copied()
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the bundle has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn render(&self, redact: bool) -> Value {
        let fields = self
            .fields
            .iter()
            .map(|(name, value)| {
                let value = if redact { Value::String(REDACTED.to_string()) } else { value.to_value() };
                ((*name).to_string(), value)
            })
            .collect::<Map<_, _>>();
        Value::Object(fields)
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.fields.iter()).finish()
    }
}

/// Credential bundles keyed by provider name.
///
/// # Example
///
/// ```
/// use keyward::provider::{CredentialBundle, KmsProviders};
///
/// let providers = KmsProviders::single(
///     "aws",
///     CredentialBundle::new()
///         .with_text("accessKeyId", "AKIA...")
///         .with_text("secretAccessKey", "secret"),
/// );
/// assert_eq!(providers.names().collect::<Vec<_>>(), ["aws"]);
/// ```
#[derive(Clone, Default)]
pub struct KmsProviders {
    providers: BTreeMap<String, CredentialBundle>,
}

impl KmsProviders {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set holding one provider.
    #[must_use]
    pub fn single(name: impl Into<String>, bundle: CredentialBundle) -> Self {
        let mut providers = Self::new();
        providers.insert(name, bundle);
        providers
    }

    /// Adds or replaces a provider's bundle.
    pub fn insert(&mut self, name: impl Into<String>, bundle: CredentialBundle) {
        self.providers.insert(name.into(), bundle);
    }

    /// Adds every provider from `other`, replacing bundles with the same name.
    pub fn merge(&mut self, other: Self) {
        self.providers.extend(other.providers);
    }

    /// Returns a provider's bundle.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CredentialBundle> {
        self.providers.get(name)
    }

    /// Returns provider names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.providers.keys().map(String::as_str)
    }

    /// Returns the number of providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if no provider is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Renders the document the encrypted client expects, secrets included.
    #[must_use]
    pub fn to_document(&self) -> Value {
        self.render(false)
    }

    /// Renders the same shape with every value replaced by a placeholder.
    #[must_use]
    pub fn to_redacted_document(&self) -> Value {
        self.render(true)
    }

    fn render(&self, redact: bool) -> Value {
        Value::Object(
            self.providers
                .iter()
                .map(|(name, bundle)| (name.clone(), bundle.render(redact)))
                .collect(),
        )
    }
}

impl fmt::Debug for KmsProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.providers.iter()).finish()
    }
}
