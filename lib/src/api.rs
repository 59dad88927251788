//! Defines the main BioCypher API struct: it loads and joins the ontologies,
//! resolves the schema configuration, records the ledger state, and drives the
//! batch writer for node and relationship records.

use crate::config::Config;
use crate::consts::{PREFERRED_ID_KEY, STRICT_PROPERTIES};
use crate::entity::{ColumnType, Entity, ScalarKind};
use crate::errors::{EntityKind, Error, Result};
use crate::factory::{EdgeRecord, EntityFactory, NodeRecord};
use crate::ledger::{Drift, RecordOutcome, VersionLedger};
use crate::ontology::OntologyTree;
use crate::options::ValidationMode;
use crate::schema::{LeafMapping, SchemaConfig, SchemaResolver};
use crate::util::coerce_property_key;
use crate::writer::{BatchWriter, RunStatus, WriteSummary};
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Initializes logging for the biocypher library.
///
/// If the `BIOCYPHER_LOG` environment variable is set, `RUST_LOG` is set to its
/// value, so `BIOCYPHER_LOG` takes precedence. The logger itself (for example
/// `env_logger::init()`) must be installed after calling this.
pub fn init_logging() {
    if let Ok(log_level) = std::env::var("BIOCYPHER_LOG") {
        std::env::set_var("RUST_LOG", log_level);
    }
}

type Declarations = BTreeMap<(EntityKind, String), Vec<(String, ColumnType)>>;

pub struct BioCypher {
    config: Config,
    tree: OntologyTree,
    resolver: SchemaResolver,
    ledger: VersionLedger,
    outcome: RecordOutcome,
    writer: Option<BatchWriter>,
    declarations: Declarations,
}

impl BioCypher {
    /// Loads the head ontology, joins the tails, reads the schema
    /// configuration and records a new ledger state.
    pub fn new(config: Config) -> Result<Self> {
        let settings = &config.biocypher;
        let head = settings
            .head_ontology
            .as_ref()
            .ok_or_else(|| Error::Config("no head_ontology configured".to_string()))?;
        let tree = OntologyTree::from_settings(head, &settings.tail_ontologies, settings.offline)?;
        let schema = match &settings.schema_config_path {
            Some(path) => SchemaConfig::from_file(path)?,
            None => {
                warn!("No schema_config_path configured; no labels will resolve");
                SchemaConfig::new()
            }
        };
        Self::from_parts(config, tree, schema)
    }

    /// Builds the pipeline from an already loaded tree and schema.
    pub fn from_parts(config: Config, tree: OntologyTree, schema: SchemaConfig) -> Result<Self> {
        config.writer_config().validate()?;
        let resolver = SchemaResolver::resolve(&schema, &tree)?;
        let mut ledger = match &config.biocypher.ledger_path {
            Some(path) => VersionLedger::load_or_new(path)?,
            None => VersionLedger::new(),
        };
        let digest = resolver.digest()?;
        let snapshot = serde_json::to_value(resolver.mappings().collect::<Vec<_>>())?;
        let outcome = ledger.record_version_with_schema(tree.source_name(), &digest, snapshot);
        Ok(Self {
            config,
            tree,
            resolver,
            ledger,
            outcome,
            writer: None,
            declarations: Declarations::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tree(&self) -> &OntologyTree {
        &self.tree
    }

    pub fn resolver(&self) -> &SchemaResolver {
        &self.resolver
    }

    pub fn mappings(&self) -> impl Iterator<Item = &LeafMapping> {
        self.resolver.mappings()
    }

    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    pub fn state_id(&self) -> u64 {
        self.outcome.state_id
    }

    /// Drift of this run's leaf mappings against the previous ledger state.
    pub fn drift(&self) -> &Drift {
        &self.outcome.drift
    }

    pub fn writer(&self) -> Option<&BatchWriter> {
        self.writer.as_ref()
    }

    pub fn factory(&self) -> EntityFactory<'_> {
        EntityFactory::new(
            &self.resolver,
            ValidationMode::from(self.config.biocypher.strict_mode),
            self.config.biocypher.property_naming,
        )
    }

    /// Column layouts of every leaf that declares properties, keyed by
    /// partition. They are applied when the partition sees its first entity.
    fn declarations(config: &Config, resolver: &SchemaResolver) -> Declarations {
        let naming = config.biocypher.property_naming;
        let mut out = Declarations::new();
        for mapping in resolver.mappings().filter(|m| !m.properties.is_empty()) {
            let mut columns: Vec<(String, ColumnType)> = Vec::new();
            if mapping.is_edge() {
                columns.push(("id".to_string(), ColumnType::scalar(ScalarKind::String)));
            }
            columns.extend(
                mapping
                    .properties
                    .iter()
                    .map(|(name, ty)| (coerce_property_key(name, naming), *ty)),
            );
            if mapping.preferred_id.is_some() && !mapping.is_edge() {
                columns.push((
                    coerce_property_key(PREFERRED_ID_KEY, naming),
                    ColumnType::scalar(ScalarKind::String),
                ));
            }
            if config.biocypher.strict_mode {
                for field in STRICT_PROPERTIES {
                    if !columns.iter().any(|(name, _)| name == field) {
                        columns.push((field.to_string(), ColumnType::scalar(ScalarKind::String)));
                    }
                }
            }
            let kind = if mapping.is_edge() {
                EntityKind::Edge
            } else {
                EntityKind::Node
            };
            out.insert((kind, mapping.display_label.clone()), columns);
        }
        out
    }

    fn ensure_writer<'a>(
        slot: &'a mut Option<BatchWriter>,
        pending: &mut Declarations,
        config: &Config,
        resolver: &SchemaResolver,
    ) -> Result<&'a mut BatchWriter> {
        if slot.is_none() {
            *pending = Self::declarations(config, resolver);
            *slot = Some(BatchWriter::new(config.writer_config())?);
        }
        slot.as_mut()
            .ok_or_else(|| Error::Config("writer is not available".to_string()))
    }

    fn declare_and_write(
        writer: &mut BatchWriter,
        pending: &mut Declarations,
        entities: Vec<Entity>,
    ) -> Result<usize> {
        for entity in &entities {
            if let Some(columns) = pending.remove(&(entity.kind(), entity.label().to_string())) {
                writer.declare(entity.kind(), entity.label(), columns)?;
            }
        }
        writer.write(entities)
    }

    /// Builds nodes from raw records and writes them. In strict mode the
    /// first invalid record aborts the run; otherwise it is logged and skipped.
    pub fn write_nodes<I>(&mut self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = NodeRecord>,
    {
        let strict = self.config.biocypher.strict_mode;
        let factory = EntityFactory::new(
            &self.resolver,
            ValidationMode::from(strict),
            self.config.biocypher.property_naming,
        );
        let writer = Self::ensure_writer(
            &mut self.writer,
            &mut self.declarations,
            &self.config,
            &self.resolver,
        )?;
        let mut written = 0;
        for NodeRecord { id, label, properties } in records {
            match factory.make_node(&id, &label, properties) {
                Ok(node) => {
                    written += Self::declare_and_write(
                        writer,
                        &mut self.declarations,
                        vec![Entity::Node(node)],
                    )?
                }
                Err(e) if !strict => warn!("Skipping node `{}` ({}): {}", id, label, e),
                Err(e) => {
                    writer.abort(&e.to_string());
                    return Err(e);
                }
            }
        }
        info!("Wrote {} nodes", written);
        Ok(written)
    }

    /// Builds relationships from raw records and writes them; promoted
    /// relationships write their node and both edges.
    pub fn write_edges<I>(&mut self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = EdgeRecord>,
    {
        let strict = self.config.biocypher.strict_mode;
        let factory = EntityFactory::new(
            &self.resolver,
            ValidationMode::from(strict),
            self.config.biocypher.property_naming,
        );
        let writer = Self::ensure_writer(
            &mut self.writer,
            &mut self.declarations,
            &self.config,
            &self.resolver,
        )?;
        let mut written = 0;
        for record in records {
            let EdgeRecord {
                source,
                target,
                label,
                properties,
                as_node,
            } = record;
            match factory.make_edge(&source, &target, &label, properties, as_node) {
                Ok(output) => {
                    written += Self::declare_and_write(
                        writer,
                        &mut self.declarations,
                        output.into_entities(),
                    )?
                }
                Err(e) if !strict => {
                    warn!("Skipping relationship {} -> {} ({}): {}", source, target, label, e)
                }
                Err(e) => {
                    writer.abort(&e.to_string());
                    return Err(e);
                }
            }
        }
        info!("Wrote {} relationship rows", written);
        Ok(written)
    }

    /// Writes already constructed entities.
    pub fn write_entities<I>(&mut self, entities: I) -> Result<usize>
    where
        I: IntoIterator<Item = Entity>,
    {
        let writer = Self::ensure_writer(
            &mut self.writer,
            &mut self.declarations,
            &self.config,
            &self.resolver,
        )?;
        Self::declare_and_write(writer, &mut self.declarations, entities.into_iter().collect())
    }

    /// Appends the ledger meta-entities, publishes every partition and
    /// persists the ledger.
    pub fn finish(&mut self) -> Result<WriteSummary> {
        let writer = Self::ensure_writer(
            &mut self.writer,
            &mut self.declarations,
            &self.config,
            &self.resolver,
        )?;
        if writer.status() == &RunStatus::Open {
            writer.write(self.ledger.meta_entities())?;
        }
        let summary = writer.finish()?;
        if let Some(path) = &self.config.biocypher.ledger_path {
            self.ledger.save(path)?;
        }
        Ok(summary)
    }

    pub fn import_call(&self) -> Result<String> {
        match &self.writer {
            Some(writer) => writer.import_call(),
            None => Err(Error::IncompleteRun {
                reason: "nothing has been written".to_string(),
            }),
        }
    }

    /// Finishes the run if needed and writes `neo4j-admin-import-call.sh`.
    pub fn write_import_call(&mut self) -> Result<PathBuf> {
        let open = self
            .writer
            .as_ref()
            .map_or(true, |w| w.status() == &RunStatus::Open);
        if open {
            self.finish()?;
        }
        match &self.writer {
            Some(writer) => writer.write_import_call(),
            None => Err(Error::IncompleteRun {
                reason: "nothing has been written".to_string(),
            }),
        }
    }
}
