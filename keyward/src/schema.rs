//! Encryption schema compilation.
//!
//! An [`EncryptionSchema`] mirrors the field structure of a target document.
//! Each leaf carries an encryption directive `{bsonType, algorithm}`; the root
//! binds one data key to every leaf through `encryptMetadata.keyId`.
//!
//! # Algorithm selection
//!
//! - **Deterministic**: equal plaintext yields equal ciphertext, so the field
//!   stays searchable by exact match. Only for fields that need it.
//! - **Random**: no equality leakage. Everything else.
//!
//! # Example
//!
//! ```
//! use keyward::schema::{Algorithm, EncryptionSchema};
//!
//! let schema = EncryptionSchema::compile("QUJDRA==")?;
//! assert_eq!(schema.directive("ssn").unwrap().algorithm, Algorithm::Deterministic);
//! assert_eq!(schema.directive("bloodType").unwrap().algorithm, Algorithm::Random);
//!
//! let document = schema.to_document();
//! assert_eq!(document["encryptMetadata"]["keyId"][0]["$binary"]["subType"], "04");
//! # Ok::<(), keyward::Error>(())
//! ```

use crate::error::Error;
use crate::key_id::KeyId;
use crate::key_vault::Namespace;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Field-level encryption algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Equality-searchable encryption
    Deterministic,
    /// Randomized encryption
    Random,
}

impl Algorithm {
    /// Returns the algorithm identifier the encrypted client expects.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deterministic => "AEAD_AES_256_CBC_HMAC_SHA_512-Deterministic",
            Self::Random => "AEAD_AES_256_CBC_HMAC_SHA_512-Random",
        }
    }

    /// Picks the algorithm for a field: deterministic only when it must stay
    /// searchable by exact match.
    #[must_use]
    pub const fn for_field(searchable: bool) -> Self {
        if searchable {
            Self::Deterministic
        } else {
            Self::Random
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Document value types an encrypted field may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BsonType {
    String,
    Int,
    Long,
    Double,
    Bool,
    Date,
    Object,
    Array,
    BinData,
    Decimal,
}

impl BsonType {
    /// Returns the `bsonType` token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Long => "long",
            Self::Double => "double",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::Object => "object",
            Self::Array => "array",
            Self::BinData => "binData",
            Self::Decimal => "decimal",
        }
    }
}

impl fmt::Display for BsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for BsonType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "string" => Self::String,
            "int" => Self::Int,
            "long" => Self::Long,
            "double" => Self::Double,
            "bool" => Self::Bool,
            "date" => Self::Date,
            "object" => Self::Object,
            "array" => Self::Array,
            "binData" => Self::BinData,
            "decimal" => Self::Decimal,
            other => return Err(Error::SchemaLayout(format!("unknown bsonType `{other}`"))),
        })
    }
}

/// Sensitivity classification of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Dotted path; intermediate segments become object nodes.
    pub path: String,
    /// Value type stored at the path.
    pub bson_type: BsonType,
    /// Whether the field must stay searchable by exact match.
    pub searchable: bool,
}

impl FieldSpec {
    /// A field that must stay searchable by exact match.
    pub fn searchable(path: impl Into<String>, bson_type: BsonType) -> Self {
        Self { path: path.into(), bson_type, searchable: true }
    }

    /// A field with no search requirement.
    pub fn sensitive(path: impl Into<String>, bson_type: BsonType) -> Self {
        Self { path: path.into(), bson_type, searchable: false }
    }
}

/// The patient record layout.
#[must_use]
pub fn patient_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::searchable("ssn", BsonType::Int),
        FieldSpec::sensitive("bloodType", BsonType::String),
        FieldSpec::sensitive("medicalRecords", BsonType::Array),
        FieldSpec::searchable("insurance.policyNumber", BsonType::Int),
    ]
}

/// Encryption directive for one leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptDirective {
    pub bson_type: BsonType,
    pub algorithm: Algorithm,
    /// Overrides the schema-level key for this leaf.
    pub key_id: Option<Vec<KeyId>>,
}

impl EncryptDirective {
    /// Creates a directive that uses the schema-level key.
    #[must_use]
    pub const fn new(bson_type: BsonType, algorithm: Algorithm) -> Self {
        Self { bson_type, algorithm, key_id: None }
    }

    /// Binds this leaf to its own key.
    #[must_use]
    pub fn with_key_id(mut self, key_id: KeyId) -> Self {
        self.key_id = Some(vec![key_id]);
        self
    }

    /// Renders `{"encrypt": {...}}`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut encrypt = Map::new();
        encrypt.insert("bsonType".to_string(), json!(self.bson_type.as_str()));
        encrypt.insert("algorithm".to_string(), json!(self.algorithm.as_str()));
        if let Some(key_ids) = &self.key_id {
            encrypt.insert("keyId".to_string(), key_id_array(key_ids));
        }
        json!({ "encrypt": encrypt })
    }
}

impl From<&FieldSpec> for EncryptDirective {
    fn from(spec: &FieldSpec) -> Self {
        Self::new(spec.bson_type, Algorithm::for_field(spec.searchable))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SchemaNode {
    Object(Vec<(String, SchemaNode)>),
    Encrypt(EncryptDirective),
}

/// A compiled per-collection encryption schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionSchema {
    key_ids: Vec<KeyId>,
    properties: Vec<(String, SchemaNode)>,
}

impl EncryptionSchema {
    /// Creates a schema with no fields whose leaves are wrapped by `key_id`.
    #[must_use]
    pub fn new(key_id: KeyId) -> Self {
        Self { key_ids: vec![key_id], properties: Vec::new() }
    }

    /// Compiles the patient record layout for the base64 key identifier.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKeyId` if `key_id` does not parse.
    pub fn compile(key_id: &str) -> Result<Self, Error> {
        Self::compile_fields(key_id, &patient_fields())
    }

    /// Compiles an arbitrary field classification.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKeyId` if `key_id` does not parse, or
    /// `Error::SchemaLayout` if two specs collide on one path.
    pub fn compile_fields(key_id: &str, fields: &[FieldSpec]) -> Result<Self, Error> {
        let mut schema = Self::new(KeyId::parse(key_id)?);
        for spec in fields {
            schema.insert(&spec.path, EncryptDirective::from(spec))?;
        }
        Ok(schema)
    }

    /// Adds a leaf directive at a dotted path.
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaLayout` if the path is empty, already holds a
    /// leaf, or passes through an existing leaf.
    pub fn insert(&mut self, path: &str, directive: EncryptDirective) -> Result<(), Error> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(Error::SchemaLayout(format!("`{path}` is not a valid field path")));
        }
        insert_node(&mut self.properties, path, &segments, directive)
    }

    /// Returns the key identifiers bound at the root.
    #[must_use]
    pub fn key_ids(&self) -> &[KeyId] {
        &self.key_ids
    }

    /// Looks up the directive at a dotted path.
    #[must_use]
    pub fn directive(&self, path: &str) -> Option<&EncryptDirective> {
        let mut nodes = &self.properties;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let (_, node) = nodes.iter().find(|(name, _)| name == segment)?;
            match (node, segments.peek()) {
                (SchemaNode::Encrypt(directive), None) => return Some(directive),
                (SchemaNode::Object(children), Some(_)) => nodes = children,
                _ => return None,
            }
        }
        None
    }

    /// Returns every leaf as `(dotted path, directive)` in declaration order.
    #[must_use]
    pub fn directives(&self) -> Vec<(String, &EncryptDirective)> {
        let mut out = Vec::new();
        collect_leaves(&self.properties, "", &mut out);
        out
    }

    /// Renders the schema document the encrypted client consumes.
    #[must_use]
    pub fn to_document(&self) -> Value {
        json!({
            "bsonType": "object",
            "encryptMetadata": { "keyId": key_id_array(&self.key_ids) },
            "properties": render(&self.properties),
        })
    }
}

/// Schemas keyed by the collection they apply to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaMap {
    schemas: BTreeMap<Namespace, EncryptionSchema>,
}

impl SchemaMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `schema` to `namespace`, returning any schema it replaced.
    pub fn insert(&mut self, namespace: Namespace, schema: EncryptionSchema) -> Option<EncryptionSchema> {
        self.schemas.insert(namespace, schema)
    }

    #[must_use]
    pub fn get(&self, namespace: &Namespace) -> Option<&EncryptionSchema> {
        self.schemas.get(namespace)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Renders `{"db.coll": schema, ...}`.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let map: Map<String, Value> = self
            .schemas
            .iter()
            .map(|(namespace, schema)| (namespace.to_string(), schema.to_document()))
            .collect();
        Value::Object(map)
    }
}

impl FromIterator<(Namespace, EncryptionSchema)> for SchemaMap {
    fn from_iter<I: IntoIterator<Item = (Namespace, EncryptionSchema)>>(iter: I) -> Self {
        Self { schemas: iter.into_iter().collect() }
    }
}

fn insert_node(
    nodes: &mut Vec<(String, SchemaNode)>,
    path: &str,
    segments: &[&str],
    directive: EncryptDirective,
) -> Result<(), Error> {
    let Some((head, rest)) = segments.split_first() else {
        return Err(Error::SchemaLayout(format!("`{path}` is not a valid field path")));
    };
    let existing = nodes.iter().position(|(name, _)| name == head);

    match (existing, rest.is_empty()) {
        (None, true) => {
            nodes.push(((*head).to_string(), SchemaNode::Encrypt(directive)));
            Ok(())
        }
        (None, false) => {
            let mut children = Vec::new();
            insert_node(&mut children, path, rest, directive)?;
            nodes.push(((*head).to_string(), SchemaNode::Object(children)));
            Ok(())
        }
        (Some(_), true) => Err(Error::SchemaLayout(format!(
            "`{path}` is declared twice or collides with an object node"
        ))),
        (Some(index), false) => match &mut nodes[index].1 {
            SchemaNode::Object(children) => insert_node(children, path, rest, directive),
            SchemaNode::Encrypt(_) => Err(Error::SchemaLayout(format!(
                "`{path}` nests under encrypted field `{head}`"
            ))),
        },
    }
}

fn collect_leaves<'a>(
    nodes: &'a [(String, SchemaNode)],
    prefix: &str,
    out: &mut Vec<(String, &'a EncryptDirective)>,
) {
    for (name, node) in nodes {
        let path = if prefix.is_empty() { name.clone() } else { format!("{prefix}.{name}") };
        match node {
            SchemaNode::Encrypt(directive) => out.push((path, directive)),
            SchemaNode::Object(children) => collect_leaves(children, &path, out),
        }
    }
}

fn render(nodes: &[(String, SchemaNode)]) -> Value {
    let map: Map<String, Value> = nodes
        .iter()
        .map(|(name, node)| {
            let value = match node {
                SchemaNode::Encrypt(directive) => directive.to_value(),
                SchemaNode::Object(children) => {
                    json!({ "bsonType": "object", "properties": render(children) })
                }
            };
            (name.clone(), value)
        })
        .collect();
    Value::Object(map)
}

fn key_id_array(key_ids: &[KeyId]) -> Value {
    Value::Array(key_ids.iter().map(|id| id.to_binary().to_value()).collect())
}
