//! Ontology-driven knowledge graph construction.
//!
//! Input labels are resolved onto an ontology hierarchy, records are turned
//! into typed nodes and relationships, and the result is written as
//! label-partitioned files for `neo4j-admin import`.

pub mod api;
pub mod config;
pub mod consts;
pub mod entity;
pub mod errors;
pub mod factory;
pub mod ledger;
pub mod ontology;
pub mod options;
pub mod schema;
pub mod util;
pub mod writer;

pub use api::{init_logging, BioCypher};
pub use errors::{Error, Result};
