//! Append-only ledger of the ontology/schema states used to produce outputs.
//!
//! Every completed run appends a [`VersionNode`]; the last one is current.
//! Drift between the current digest and the newly recorded one is reported to
//! the caller and never resolved here.

use crate::consts::{VERSION_EDGE_LABEL, VERSION_NODE_LABEL};
use crate::entity::{BioCypherEdge, BioCypherNode, Entity, Properties};
use crate::errors::Result;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionNode {
    pub state_id: u64,
    pub timestamp: DateTime<Utc>,
    pub ontology_source: String,
    pub leaf_mapping_digest: String,
    pub prior_states: usize,
    /// Snapshot of the leaf mappings this state was computed from.
    #[serde(default)]
    pub schema: serde_json::Value,
}

impl VersionNode {
    pub fn node_id(&self) -> String {
        format!("biocypher:{}", self.state_id)
    }
}

/// Relation between a newly recorded digest and the previous current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    Initial,
    Unchanged,
    Changed { previous: String, current: String },
}

impl Drift {
    pub fn is_changed(&self) -> bool {
        matches!(self, Drift::Changed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub state_id: u64,
    pub drift: Drift,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionLedger {
    states: Vec<VersionNode>,
}

impl VersionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let ledger: VersionLedger = serde_json::from_reader(BufReader::new(file))?;
        debug!("Loaded {} ledger states from {}", ledger.len(), path.display());
        Ok(ledger)
    }

    /// Loads the ledger at `path`, or starts an empty one if the file is missing.
    pub fn load_or_new(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut writer = BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn current_version(&self) -> Option<&VersionNode> {
        self.states.last()
    }

    pub fn states(&self) -> &[VersionNode] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn record_version(
        &mut self,
        ontology_source: &str,
        leaf_mapping_digest: &str,
    ) -> RecordOutcome {
        self.record_version_with_schema(
            ontology_source,
            leaf_mapping_digest,
            serde_json::Value::Null,
        )
    }

    /// Appends a new state and makes it current.
    pub fn record_version_with_schema(
        &mut self,
        ontology_source: &str,
        leaf_mapping_digest: &str,
        schema: serde_json::Value,
    ) -> RecordOutcome {
        let drift = match self.current_version() {
            None => Drift::Initial,
            Some(prev) if prev.leaf_mapping_digest == leaf_mapping_digest => Drift::Unchanged,
            Some(prev) => Drift::Changed {
                previous: prev.leaf_mapping_digest.clone(),
                current: leaf_mapping_digest.to_string(),
            },
        };
        let state_id = self.current_version().map_or(1, |v| v.state_id + 1);
        let node = VersionNode {
            state_id,
            timestamp: Utc::now(),
            ontology_source: ontology_source.to_string(),
            leaf_mapping_digest: leaf_mapping_digest.to_string(),
            prior_states: self.states.len(),
            schema,
        };
        self.states.push(node);

        match &drift {
            Drift::Changed { previous, current } => warn!(
                "Leaf mappings drifted since state {}: {} -> {}",
                state_id - 1,
                previous,
                current
            ),
            _ => info!("Recorded ledger state {} ({:?})", state_id, drift),
        }
        RecordOutcome { state_id, drift }
    }

    /// The ledger as graph entities: one `BioCypher` node per state and a
    /// `PRECEDES` relationship from each state to its successor.
    pub fn meta_entities(&self) -> Vec<Entity> {
        let mut out = Vec::with_capacity(self.states.len() * 2);
        for state in &self.states {
            let props = Properties::new()
                .with("state_id", state.state_id as i64)
                .with("timestamp", state.timestamp.to_rfc3339())
                .with("ontology_source", state.ontology_source.clone())
                .with("leaf_mapping_digest", state.leaf_mapping_digest.clone())
                .with("prior_states", state.prior_states as i64)
                .with("schema", state.schema.to_string());
            out.push(Entity::Node(BioCypherNode::new(
                state.node_id(),
                VERSION_NODE_LABEL,
                props,
            )));
        }
        for pair in self.states.windows(2) {
            out.push(Entity::Edge(BioCypherEdge::new(
                pair[0].node_id(),
                pair[1].node_id(),
                VERSION_EDGE_LABEL,
                Properties::new(),
            )));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_record_and_drift() {
        let mut ledger = VersionLedger::new();
        assert!(ledger.current_version().is_none());

        let first = ledger.record_version("biolink.ttl", "aaa");
        assert_eq!(first.state_id, 1);
        assert_eq!(first.drift, Drift::Initial);

        let second = ledger.record_version("biolink.ttl", "aaa");
        assert_eq!(second.state_id, 2);
        assert_eq!(second.drift, Drift::Unchanged);

        let third = ledger.record_version("biolink.ttl", "bbb");
        assert!(third.drift.is_changed());
        assert_eq!(ledger.current_version().map(|v| v.state_id), Some(3));
        assert_eq!(ledger.current_version().map(|v| v.prior_states), Some(2));
    }

    #[test]
    fn test_persist_and_continue() {
        let dir = TempDir::new("ledger").unwrap();
        let path = dir.path().join("ledger.json");
        let mut ledger = VersionLedger::load_or_new(&path).unwrap();
        ledger.record_version("head.ttl", "d1");
        ledger.save(&path).unwrap();

        let mut reloaded = VersionLedger::load(&path).unwrap();
        assert_eq!(reloaded, ledger);
        let outcome = reloaded.record_version("head.ttl", "d1");
        assert_eq!(outcome.state_id, 2);
        assert_eq!(outcome.drift, Drift::Unchanged);
    }

    #[test]
    fn test_meta_entities() {
        let mut ledger = VersionLedger::new();
        ledger.record_version("head.ttl", "d1");
        ledger.record_version("head.ttl", "d2");
        let entities = ledger.meta_entities();
        assert_eq!(entities.len(), 3);
        match &entities[2] {
            Entity::Edge(e) => {
                assert_eq!(e.source(), "biocypher:1");
                assert_eq!(e.target(), "biocypher:2");
                assert_eq!(e.label(), "PRECEDES");
            }
            other => panic!("expected edge, got {:?}", other),
        }
    }
}
