//! Shared option types that replace boolean flag parameters in the Rust API.

use serde::{Deserialize, Serialize};

/// Controls what happens when a node id repeats within its label partition.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail the run with a duplicate-entity error.
    #[default]
    Fail,
    /// Drop the repeated entity and keep the first one.
    Skip,
}

impl DuplicatePolicy {
    pub fn is_skip(self) -> bool {
        matches!(self, DuplicatePolicy::Skip)
    }
}

impl From<bool> for DuplicatePolicy {
    fn from(skip: bool) -> Self {
        if skip {
            DuplicatePolicy::Skip
        } else {
            DuplicatePolicy::Fail
        }
    }
}

/// How a partition reacts to a property key that is not in its fixed column schema.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Reject the row with a schema-drift error.
    #[default]
    Strict,
    /// Append the new column and backfill empty cells for earlier rows.
    Widen,
}

impl SchemaMode {
    pub fn is_widen(self) -> bool {
        matches!(self, SchemaMode::Widen)
    }
}

impl From<bool> for SchemaMode {
    fn from(widen: bool) -> Self {
        if widen {
            SchemaMode::Widen
        } else {
            SchemaMode::Strict
        }
    }
}

/// Whether the entity factory enforces required fields.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum ValidationMode {
    Strict,
    #[default]
    Lenient,
}

impl ValidationMode {
    pub fn is_strict(self) -> bool {
        matches!(self, ValidationMode::Strict)
    }
}

impl From<bool> for ValidationMode {
    fn from(strict: bool) -> Self {
        if strict {
            ValidationMode::Strict
        } else {
            ValidationMode::Lenient
        }
    }
}

/// What to do with relationships whose endpoints were not written as nodes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipPolicy {
    /// Keep the relationship and log it; the import tool decides.
    #[default]
    Keep,
    /// Drop the relationship from the output.
    Skip,
}

impl RelationshipPolicy {
    pub fn is_skip(self) -> bool {
        matches!(self, RelationshipPolicy::Skip)
    }
}

impl From<bool> for RelationshipPolicy {
    fn from(skip: bool) -> Self {
        if skip {
            RelationshipPolicy::Skip
        } else {
            RelationshipPolicy::Keep
        }
    }
}

/// Naming convention applied to property keys before they are persisted.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyNaming {
    #[default]
    Preserve,
    SnakeCase,
    LowerCamelCase,
}
