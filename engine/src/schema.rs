//! Schema definition, payload validation, and per-field merge policy.
//!
//! Schemas define the structure of collections, how each field should be
//! validated, and — new relative to plain validation — how each field is
//! reconciled when two devices touch it concurrently. The reconciliation
//! kind is resolved once per field at registration time so the merge engine
//! never has to guess from payload shape.

use crate::{error::Result, CollectionName, Error, Operation, SchemaVersion};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The JSON shape a field's value must take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    /// Arbitrary nested JSON.
    Json,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::String => write!(f, "String"),
            ValueType::Int => write!(f, "Int"),
            ValueType::Float => write!(f, "Float"),
            ValueType::Bool => write!(f, "Bool"),
            ValueType::Timestamp => write!(f, "Timestamp"),
            ValueType::Json => write!(f, "Json"),
        }
    }
}

/// How a field is reconciled when two devices edit it concurrently.
///
/// This is the field-level merge policy of the merge engine (see
/// `crate::merge`): every field in a collection schema carries exactly one
/// of these, resolved once at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeKind {
    /// Last-writer-wins by HLC, ties broken by lexicographic device id.
    #[default]
    Scalar,
    /// Set-union; removed elements become tombstones retained for the grace window.
    Set,
    /// Commutative increment: `new = base + sum(concurrent deltas)`.
    Counter,
    /// No automatic merge; concurrent writers produce a conflict resolved by
    /// the collection's `ResolverStrategy`.
    Opaque,
}

/// Strategy used to resolve a conflict on an `Opaque` field, selected per
/// record type (collection) at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResolverStrategy {
    /// Keep the currently-committed state, drop the incoming op.
    ServerWins,
    /// Accept the incoming op in full.
    ClientWins,
    /// Commit a conflict record; resolution is deferred to another op.
    #[default]
    Manual,
}

/// Definition of a field in a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    pub value_type: ValueType,
    pub merge: MergeKind,
    pub required: bool,
}

impl FieldDef {
    /// A required scalar field of the given JSON type, last-writer-wins on conflict.
    pub fn required(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            merge: MergeKind::Scalar,
            required: true,
        }
    }

    /// An optional scalar field of the given JSON type, last-writer-wins on conflict.
    pub fn optional(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            merge: MergeKind::Scalar,
            required: false,
        }
    }

    /// Override the merge policy, e.g. `FieldDef::optional(..).with_merge(MergeKind::Counter)`.
    pub fn with_merge(mut self, merge: MergeKind) -> Self {
        self.merge = merge;
        self
    }

    /// Validate a JSON value against this field definition's declared type.
    pub fn validate(&self, value: Option<&serde_json::Value>) -> Result<()> {
        match value {
            None if self.required => Err(Error::MissingRequiredField(self.name.clone())),
            None => Ok(()),
            Some(serde_json::Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            Some(serde_json::Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &serde_json::Value) -> Result<()> {
        let valid = match self.value_type {
            ValueType::String => value.is_string(),
            ValueType::Int => value.is_i64() || value.is_u64(),
            ValueType::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            ValueType::Bool => value.is_boolean(),
            ValueType::Timestamp => value.is_u64() || value.is_i64(),
            ValueType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.value_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        serde_json::Value::Number(_) => "Float",
        serde_json::Value::String(_) => "String",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

/// Schema for a collection (record type), including the resolver strategy
/// used when an `Opaque` field conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    pub name: CollectionName,
    pub fields: Vec<FieldDef>,
    pub resolver: ResolverStrategy,
}

impl CollectionSchema {
    pub fn new(name: impl Into<CollectionName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
            resolver: ResolverStrategy::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: ResolverStrategy) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate a payload against this schema. Only fields declared in the
    /// schema are checked; unknown keys pass through (payloads are patches,
    /// not full records, once past creation).
    pub fn validate_payload(&self, payload: &serde_json::Value) -> Result<()> {
        let obj = payload
            .as_object()
            .ok_or_else(|| Error::InvalidPayload("payload must be an object".into()))?;

        for field in &self.fields {
            field.validate(obj.get(&field.name))?;
        }

        Ok(())
    }
}

/// Schema for the entire store: a versioned registry of collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub version: SchemaVersion,
    pub collections: HashMap<CollectionName, CollectionSchema>,
}

impl Schema {
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            collections: HashMap::new(),
        }
    }

    pub fn add_collection(&mut self, collection: CollectionSchema) -> &mut Self {
        self.collections.insert(collection.name.clone(), collection);
        self
    }

    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.add_collection(collection);
        self
    }

    pub fn get_collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.get(name)
    }

    /// Validate an operation's patch against the schema for its collection.
    pub fn validate_operation(&self, op: &Operation) -> Result<()> {
        let collection_name = op.collection();

        let collection_schema = self
            .collections
            .get(collection_name)
            .ok_or_else(|| Error::CollectionNotFound(collection_name.clone()))?;

        if let Some(patch) = op.patch() {
            collection_schema.validate_payload(patch)?;
        }

        Ok(())
    }
}
