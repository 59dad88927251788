//! Error taxonomy for the biocypher library.
//!
//! Every variant names the label, id or field that caused it so a user can find
//! the offending source record.

use thiserror::Error;

/// Which kind of entity a writer-side error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Node,
    Edge,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Node => write!(f, "node"),
            EntityKind::Edge => write!(f, "relationship"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load ontology from {source_name}: {reason}")]
    OntologyLoad { source_name: String, reason: String },

    #[error("cannot join ontology {tail} onto head: {reason}")]
    OntologyJoin { tail: String, reason: String },

    #[error("leaf label `{label}` does not resolve to any ontology class")]
    UnresolvedLeaf { label: String },

    #[error("label `{label}` is not mapped in the schema configuration")]
    UnknownLabel { label: String },

    #[error("{kind} `{id}` with label `{label}` is missing required field `{field}`")]
    MissingRequiredField {
        kind: EntityKind,
        label: String,
        id: String,
        field: String,
    },

    #[error("property `{key}` on `{label}` has an unsupported value: {reason}")]
    UnsupportedProperty {
        label: String,
        key: String,
        reason: String,
    },

    #[error("{kind} `{id}` introduces property `{key}` not present in the fixed schema of `{label}`")]
    SchemaDrift {
        kind: EntityKind,
        label: String,
        id: String,
        key: String,
    },

    #[error("duplicate {kind} `{id}` in partition `{label}`")]
    DuplicateEntity {
        kind: EntityKind,
        label: String,
        id: String,
    },

    #[error("partition `{label}` has been flushed and accepts no more rows")]
    WriterClosed { label: String },

    #[error("write run is incomplete: {reason}")]
    IncompleteRun { reason: String },

    #[error("cannot serialize {kind} `{id}` of `{label}`: {reason}")]
    Serialization {
        kind: EntityKind,
        label: String,
        id: String,
        reason: String,
    },

    #[error("failed to fetch ontology from {url}: offline mode is enabled")]
    OfflineRetrieval { url: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
