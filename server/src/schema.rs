//! The collection schema this deployment synchronizes.
//!
//! A real deployment would load this from its own data model; here it is
//! built in once at startup and shared by every owner partition.

use vectorsync_engine::{CollectionSchema, FieldDef, MergeKind, ResolverStrategy, Schema, ValueType};

/// The schema every owner's [`vectorsync_engine::VersionStore`] validates
/// operations against.
pub fn default_schema() -> Schema {
    Schema::new(1)
        .with_collection(
            CollectionSchema::new(
                "notes",
                vec![
                    FieldDef::required("title", ValueType::String),
                    FieldDef::optional("body", ValueType::String)
                        .with_merge(MergeKind::Opaque),
                    FieldDef::optional("tags", ValueType::Json).with_merge(MergeKind::Set),
                    FieldDef::optional("pinned", ValueType::Bool),
                ],
            )
            .with_resolver(ResolverStrategy::Manual),
        )
        .with_collection(CollectionSchema::new(
            "counters",
            vec![
                FieldDef::required("name", ValueType::String),
                FieldDef::optional("value", ValueType::Int).with_merge(MergeKind::Counter),
            ],
        ))
        .with_collection(CollectionSchema::new(
            "contacts",
            vec![
                FieldDef::required("name", ValueType::String),
                FieldDef::optional("email", ValueType::String),
                FieldDef::optional("phone", ValueType::String),
                FieldDef::optional("favorite", ValueType::Bool),
            ],
        ))
}
