//! Batch writer producing neo4j-admin import files.
//!
//! Entities are partitioned by kind and label. Each partition owns its column
//! schema, its de-duplication set and its output handle, so partitions never
//! share mutable state and can be written on separate threads. Rows go to
//! `<Label>.csv.partial` and the file is renamed to `<Label>.csv` only when the
//! partition is flushed successfully.

use crate::config::WriterConfig;
use crate::consts::*;
use crate::entity::{
    BioCypherEdge, BioCypherNode, ColumnType, Entity, Properties, PropertyValue, ScalarKind,
};
use crate::errors::{EntityKind, Error, Result};
use crate::util::to_pascal_case;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Lifecycle of a partition. There is no way back from `Flushed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    Unopened,
    SchemaFixed,
    Writing,
    Flushed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Open,
    Complete,
    Incomplete(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub nodes: usize,
    pub edges: usize,
    pub files: Vec<PathBuf>,
    pub duplicate_nodes: usize,
    pub duplicate_edges: usize,
    pub bad_relationships: usize,
}

struct Row {
    lead: String,
    cells: Vec<Option<String>>,
    tail: Vec<String>,
}

struct Partition {
    kind: EntityKind,
    label: String,
    file_name: String,
    state: PartitionState,
    columns: Vec<(String, ColumnType)>,
    // node ids, or relationship keys
    ids: HashSet<String>,
    duplicates: BTreeSet<String>,
    duplicate_count: usize,
    bad_relationships: usize,
    // only used when widening
    rows: Vec<Row>,
    out: Option<csv::Writer<File>>,
    written: usize,
    finished: Option<PathBuf>,
}

fn csv_writer(config: &WriterConfig, file: File) -> csv::Writer<File> {
    csv::WriterBuilder::new()
        .delimiter(config.delimiter as u8)
        .quote(config.quote as u8)
        .quote_style(csv::QuoteStyle::Necessary)
        .has_headers(false)
        .from_writer(file)
}

fn render_value(
    value: &PropertyValue,
    array_delimiter: char,
) -> std::result::Result<String, String> {
    fn join<T: ToString>(items: &[T], delim: char) -> std::result::Result<String, String> {
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            let s = item.to_string();
            if s.contains(delim) {
                return Err(format!(
                    "list element `{}` contains the array delimiter {:?}",
                    s, delim
                ));
            }
            parts.push(s);
        }
        Ok(parts.join(&delim.to_string()))
    }
    match value {
        PropertyValue::Str(s) => Ok(s.clone()),
        PropertyValue::Int(i) => Ok(i.to_string()),
        PropertyValue::Float(f) => Ok(f.to_string()),
        PropertyValue::Bool(b) => Ok(b.to_string()),
        PropertyValue::StrList(v) => join(v, array_delimiter),
        PropertyValue::IntList(v) => join(v, array_delimiter),
        PropertyValue::FloatList(v) => join(v, array_delimiter),
        PropertyValue::BoolList(v) => join(v, array_delimiter),
    }
}

impl Partition {
    fn new(kind: EntityKind, label: String, file_name: String) -> Self {
        Self {
            kind,
            label,
            file_name,
            state: PartitionState::Unopened,
            columns: Vec::new(),
            ids: HashSet::new(),
            duplicates: BTreeSet::new(),
            duplicate_count: 0,
            bad_relationships: 0,
            rows: Vec::new(),
            out: None,
            written: 0,
            finished: None,
        }
    }

    fn final_path(&self, config: &WriterConfig) -> PathBuf {
        config.output_directory.join(&self.file_name)
    }

    fn partial_path(&self, config: &WriterConfig) -> PathBuf {
        config
            .output_directory
            .join(format!("{}{}", self.file_name, PARTIAL_SUFFIX))
    }

    fn header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(self.columns.len() + 3);
        match self.kind {
            EntityKind::Node => header.push(ID_COLUMN.to_string()),
            EntityKind::Edge => header.push(START_ID_COLUMN.to_string()),
        }
        header.extend(self.columns.iter().map(|(name, ty)| format!("{}:{}", name, ty)));
        match self.kind {
            EntityKind::Node => header.push(LABEL_COLUMN.to_string()),
            EntityKind::Edge => {
                header.push(END_ID_COLUMN.to_string());
                header.push(TYPE_COLUMN.to_string());
            }
        }
        header
    }

    fn closed(&self) -> Result<()> {
        if self.state == PartitionState::Flushed {
            return Err(Error::WriterClosed {
                label: self.label.clone(),
            });
        }
        Ok(())
    }

    /// Fixes the column schema up front from declared property types.
    fn declare(&mut self, columns: Vec<(String, ColumnType)>) -> Result<()> {
        self.closed()?;
        if self.state != PartitionState::Unopened {
            return Err(Error::Config(format!(
                "schema of `{}` is already fixed",
                self.label
            )));
        }
        self.columns = columns;
        self.state = PartitionState::SchemaFixed;
        Ok(())
    }

    fn push_node(&mut self, node: &BioCypherNode, config: &WriterConfig) -> Result<bool> {
        self.closed()?;
        if !self.ids.insert(node.id().to_string()) {
            self.duplicate_count += 1;
            self.duplicates.insert(node.id().to_string());
            if config.duplicates.is_skip() {
                debug!("Skipping duplicate node {} in {}", node.id(), self.label);
                return Ok(false);
            }
            return Err(Error::DuplicateEntity {
                kind: EntityKind::Node,
                label: self.label.clone(),
                id: node.id().to_string(),
            });
        }
        let labels: Vec<&str> = node.labels().collect();
        if let Some(bad) = labels.iter().find(|l| l.contains(config.array_delimiter)) {
            return Err(Error::Serialization {
                kind: EntityKind::Node,
                label: self.label.clone(),
                id: node.id().to_string(),
                reason: format!("label `{}` contains the array delimiter", bad),
            });
        }
        let props: Vec<(&str, &PropertyValue)> = node.properties().iter().collect();
        let labels = labels.join(&config.array_delimiter.to_string());
        self.accept(node.id(), node.id().to_string(), &props, vec![labels], config)?;
        Ok(true)
    }

    fn push_edge(
        &mut self,
        edge: &BioCypherEdge,
        known_nodes: &HashSet<String>,
        config: &WriterConfig,
    ) -> Result<bool> {
        self.closed()?;
        let key = format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}",
            edge.source(),
            edge.target(),
            edge.label(),
            edge.id().unwrap_or_default()
        );
        if !self.ids.insert(key) {
            self.duplicate_count += 1;
            self.duplicates.insert(edge.display_id());
            debug!("Dropping duplicate relationship {} in {}", edge.display_id(), self.label);
            return Ok(false);
        }
        if !known_nodes.contains(edge.source()) || !known_nodes.contains(edge.target()) {
            self.bad_relationships += 1;
            if config.bad_relationships.is_skip() {
                debug!("Dropping relationship {} with unwritten endpoints", edge.display_id());
                return Ok(false);
            }
            debug!(
                "Relationship {} references endpoints not written in this run",
                edge.display_id()
            );
        }
        let id_value = edge
            .id()
            .filter(|_| !edge.properties().contains_key("id"))
            .map(|id| PropertyValue::Str(id.to_string()));
        let mut props: Vec<(&str, &PropertyValue)> =
            Vec::with_capacity(edge.properties().len() + 1);
        if let Some(v) = &id_value {
            props.push(("id", v));
        }
        props.extend(edge.properties().iter());
        self.accept(
            &edge.display_id(),
            edge.source().to_string(),
            &props,
            vec![edge.target().to_string(), edge.label().to_string()],
            config,
        )?;
        Ok(true)
    }

    fn accept(
        &mut self,
        id: &str,
        lead: String,
        props: &[(&str, &PropertyValue)],
        tail: Vec<String>,
        config: &WriterConfig,
    ) -> Result<()> {
        let serialization = |reason: String| Error::Serialization {
            kind: self.kind,
            label: self.label.clone(),
            id: id.to_string(),
            reason,
        };
        if let Some((key, _)) = props.iter().find(|(k, _)| k.is_empty() || k.starts_with(':')) {
            return Err(serialization(format!("`{}` is not a valid column name", key)));
        }
        if self.state == PartitionState::Unopened {
            self.columns = props
                .iter()
                .map(|(k, v)| (k.to_string(), v.column_type()))
                .collect();
            self.state = PartitionState::SchemaFixed;
            debug!("Fixed schema of {} {}: {:?}", self.kind, self.label, self.columns);
        }

        let mut cells: Vec<Option<String>> = vec![None; self.columns.len()];
        for (key, value) in props {
            let pos = match self.columns.iter().position(|(c, _)| c == key) {
                Some(pos) => pos,
                None if config.schema_mode.is_widen() => {
                    info!("Widening {} with column `{}` introduced by {}", self.label, key, id);
                    self.columns.push((key.to_string(), value.column_type()));
                    cells.push(None);
                    self.columns.len() - 1
                }
                None => {
                    return Err(Error::SchemaDrift {
                        kind: self.kind,
                        label: self.label.clone(),
                        id: id.to_string(),
                        key: key.to_string(),
                    })
                }
            };
            let column = self.columns[pos].1;
            if !column.accepts(value.column_type()) {
                return Err(serialization(format!(
                    "property `{}` holds {} but the column is {}",
                    key,
                    value.column_type(),
                    column
                )));
            }
            cells[pos] = Some(render_value(value, config.array_delimiter).map_err(&serialization)?);
        }

        let row = Row { lead, cells, tail };
        if config.schema_mode.is_widen() {
            self.rows.push(row);
        } else {
            if self.out.is_none() {
                self.open(config)?;
            }
            self.write_row(row)?;
        }
        self.state = PartitionState::Writing;
        self.written += 1;
        Ok(())
    }

    fn open(&mut self, config: &WriterConfig) -> Result<()> {
        std::fs::create_dir_all(&config.output_directory)?;
        let file = File::create(self.partial_path(config))?;
        let mut out = csv_writer(config, file);
        out.write_record(self.header())?;
        self.out = Some(out);
        Ok(())
    }

    fn write_row(&mut self, row: Row) -> Result<()> {
        let width = self.columns.len();
        let Some(out) = self.out.as_mut() else {
            return Err(Error::WriterClosed {
                label: self.label.clone(),
            });
        };
        let mut record = Vec::with_capacity(width + 3);
        record.push(row.lead);
        let missing = width.saturating_sub(row.cells.len());
        record.extend(row.cells.into_iter().map(|c| c.unwrap_or_default()));
        record.extend(std::iter::repeat(String::new()).take(missing));
        record.extend(row.tail);
        out.write_record(&record)?;
        Ok(())
    }

    /// Writes out buffered rows and syncs the `.partial` file without
    /// publishing it. Partitions that never received a row produce no file.
    fn seal(&mut self, config: &WriterConfig) -> Result<()> {
        if self.state == PartitionState::Flushed {
            return Ok(());
        }
        if self.written == 0 {
            self.state = PartitionState::Flushed;
            return Ok(());
        }
        if self.out.is_none() {
            self.open(config)?;
        }
        for row in std::mem::take(&mut self.rows) {
            self.write_row(row)?;
        }
        if let Some(out) = self.out.take() {
            let file = out.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Renames a sealed `.partial` file to its final name.
    fn publish(&mut self, config: &WriterConfig) -> Result<Option<PathBuf>> {
        if self.state == PartitionState::Flushed {
            return Ok(self.finished.clone());
        }
        let path = self.final_path(config);
        std::fs::rename(self.partial_path(config), &path)?;
        self.state = PartitionState::Flushed;
        self.finished = Some(path.clone());
        info!("Wrote {} {} rows to {}", self.written, self.label, path.display());
        Ok(Some(path))
    }

    /// Moves a published file back to its `.partial` name.
    fn unpublish(&mut self, config: &WriterConfig) {
        let Some(path) = self.finished.take() else {
            return;
        };
        if let Err(e) = std::fs::rename(&path, self.partial_path(config)) {
            error!("Could not withdraw {}: {}", path.display(), e);
        }
    }

    /// Best-effort close that leaves the `.partial` file in place.
    fn abort(&mut self, config: &WriterConfig) {
        if self.state == PartitionState::Flushed {
            return;
        }
        if self.out.is_none() && !self.rows.is_empty() {
            if let Err(e) = self.open(config) {
                warn!("Could not open {} while aborting: {}", self.label, e);
            }
        }
        if self.out.is_some() {
            for row in std::mem::take(&mut self.rows) {
                if let Err(e) = self.write_row(row) {
                    warn!("Could not write buffered row of {}: {}", self.label, e);
                    break;
                }
            }
        }
        if let Some(mut out) = self.out.take() {
            if let Err(e) = out.flush() {
                warn!("Could not flush {}: {}", self.label, e);
            }
        }
        self.state = PartitionState::Flushed;
    }
}

/// Writes partitioned node and relationship files for one import run.
///
/// The writer must be finished with [`BatchWriter::finish`] before the import
/// call can be produced. Any write error aborts the run: open partitions are
/// closed, their `.partial` files are left behind and the import call is
/// refused. Dropping an unfinished writer aborts it as well.
pub struct BatchWriter {
    config: WriterConfig,
    partitions: BTreeMap<(EntityKind, String), Partition>,
    known_nodes: HashSet<String>,
    status: RunStatus,
}

impl BatchWriter {
    pub fn new(config: WriterConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.output_directory)?;
        Ok(Self {
            config,
            partitions: BTreeMap::new(),
            known_nodes: HashSet::new(),
            status: RunStatus::Open,
        })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn partition_state(&self, kind: EntityKind, label: &str) -> Option<PartitionState> {
        self.partitions
            .get(&(kind, label.to_string()))
            .map(|p| p.state)
    }

    /// Column schema of a partition, in column order.
    pub fn columns(&self, kind: EntityKind, label: &str) -> Option<Vec<(String, ColumnType)>> {
        self.partitions
            .get(&(kind, label.to_string()))
            .map(|p| p.columns.clone())
    }

    fn check_open(&self, label: &str) -> Result<()> {
        match &self.status {
            RunStatus::Open => Ok(()),
            RunStatus::Complete => Err(Error::WriterClosed {
                label: label.to_string(),
            }),
            RunStatus::Incomplete(reason) => Err(Error::IncompleteRun {
                reason: reason.clone(),
            }),
        }
    }

    fn partition_entry<'a>(
        partitions: &'a mut BTreeMap<(EntityKind, String), Partition>,
        key: &(EntityKind, String),
    ) -> Result<&'a mut Partition> {
        if !partitions.contains_key(key) {
            let stem = to_pascal_case(&key.1);
            if stem.is_empty() {
                return Err(Error::Config(format!("`{}` cannot name a partition file", key.1)));
            }
            let file_name = format!("{}.csv", stem);
            if let Some(other) = partitions.values().find(|p| p.file_name == file_name) {
                return Err(Error::Config(format!(
                    "{} `{}` and {} `{}` would both be written to {}",
                    key.0, key.1, other.kind, other.label, file_name
                )));
            }
            debug!("Opening partition {} {} -> {}", key.0, key.1, file_name);
            partitions.insert(key.clone(), Partition::new(key.0, key.1.clone(), file_name));
        }
        partitions
            .get_mut(key)
            .ok_or_else(|| Error::Config(format!("partition `{}` is missing", key.1)))
    }

    /// Fixes a partition's columns before any row arrives, so its header
    /// follows the declared property order instead of the first row.
    pub fn declare(
        &mut self,
        kind: EntityKind,
        label: &str,
        columns: Vec<(String, ColumnType)>,
    ) -> Result<()> {
        self.check_open(label)?;
        let key = (kind, label.to_string());
        Self::partition_entry(&mut self.partitions, &key)?.declare(columns)
    }

    fn push(&mut self, entity: Entity) -> Result<bool> {
        self.check_open(entity.label())?;
        let key = (entity.kind(), entity.label().to_string());
        let partition = Self::partition_entry(&mut self.partitions, &key)?;
        match &entity {
            Entity::Node(node) => {
                let written = partition.push_node(node, &self.config)?;
                if written {
                    self.known_nodes.insert(node.id().to_string());
                }
                Ok(written)
            }
            Entity::Edge(edge) => partition.push_edge(edge, &self.known_nodes, &self.config),
        }
    }

    /// Writes a stream of entities in order and returns how many rows were
    /// accepted. Relationship endpoints are checked against the nodes written
    /// so far, so nodes should come before the relationships that use them.
    pub fn write<I>(&mut self, entities: I) -> Result<usize>
    where
        I: IntoIterator<Item = Entity>,
    {
        let mut written = 0;
        for entity in entities {
            match self.push(entity) {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => {
                    if self.status == RunStatus::Open {
                        self.abort(&e.to_string());
                    }
                    return Err(e);
                }
            }
        }
        Ok(written)
    }

    /// Groups entities by partition and writes each partition on its own
    /// scoped thread: all node partitions first, then relationships.
    pub fn write_parallel<I>(&mut self, entities: I) -> Result<usize>
    where
        I: IntoIterator<Item = Entity>,
    {
        self.check_open("*")?;
        let mut groups: BTreeMap<(EntityKind, String), Vec<Entity>> = BTreeMap::new();
        for entity in entities {
            groups
                .entry((entity.kind(), entity.label().to_string()))
                .or_default()
                .push(entity);
        }
        let result = self.parallel_phases(groups);
        if let Err(e) = &result {
            if self.status == RunStatus::Open {
                self.abort(&e.to_string());
            }
        }
        result
    }

    fn parallel_phases(
        &mut self,
        mut groups: BTreeMap<(EntityKind, String), Vec<Entity>>,
    ) -> Result<usize> {
        for key in groups.keys() {
            Self::partition_entry(&mut self.partitions, key)?;
        }
        let nodes = self.run_phase(EntityKind::Node, &mut groups)?;
        for p in self.partitions.values().filter(|p| p.kind == EntityKind::Node) {
            self.known_nodes.extend(p.ids.iter().cloned());
        }
        let edges = self.run_phase(EntityKind::Edge, &mut groups)?;
        Ok(nodes + edges)
    }

    fn run_phase(
        &mut self,
        kind: EntityKind,
        groups: &mut BTreeMap<(EntityKind, String), Vec<Entity>>,
    ) -> Result<usize> {
        let config = &self.config;
        let known = &self.known_nodes;
        let results: Vec<Result<usize>> = std::thread::scope(|s| {
            let handles: Vec<_> = self
                .partitions
                .iter_mut()
                .filter(|(key, _)| key.0 == kind)
                .filter_map(|(key, p)| groups.remove(key).map(|entities| (p, entities)))
                .map(|(p, entities)| {
                    s.spawn(move || -> Result<usize> {
                        let mut written = 0;
                        for entity in &entities {
                            let ok = match entity {
                                Entity::Node(node) => p.push_node(node, config)?,
                                Entity::Edge(edge) => p.push_edge(edge, known, config)?,
                            };
                            if ok {
                                written += 1;
                            }
                        }
                        Ok(written)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(Error::IncompleteRun {
                            reason: "a partition writer thread panicked".to_string(),
                        })
                    })
                })
                .collect()
        });
        let mut total = 0;
        for r in results {
            total += r?;
        }
        Ok(total)
    }

    /// Flushes every partition and publishes the files. A flush failure
    /// aborts the whole run.
    pub fn finish(&mut self) -> Result<WriteSummary> {
        match &self.status {
            RunStatus::Complete => return Ok(self.summary()),
            RunStatus::Incomplete(reason) => {
                return Err(Error::IncompleteRun {
                    reason: reason.clone(),
                })
            }
            RunStatus::Open => {}
        }
        // every file is complete on disk before the first one is renamed
        let config = &self.config;
        let mut failure = None;
        for p in self.partitions.values_mut() {
            if let Err(e) = p.seal(config) {
                failure = Some(e);
                break;
            }
        }
        if failure.is_none() {
            for p in self.partitions.values_mut() {
                if let Err(e) = p.publish(config) {
                    failure = Some(e);
                    break;
                }
            }
            if failure.is_some() {
                for p in self.partitions.values_mut() {
                    p.unpublish(config);
                }
            }
        }
        if let Some(e) = failure {
            self.abort(&e.to_string());
            return Err(e);
        }
        self.status = RunStatus::Complete;
        self.report_duplicates();
        let summary = self.summary();
        info!(
            "Finished writing {} nodes and {} relationships into {} files",
            summary.nodes,
            summary.edges,
            summary.files.len()
        );
        Ok(summary)
    }

    /// Closes all partitions without publishing them and marks the run incomplete.
    pub fn abort(&mut self, reason: &str) {
        error!("Aborting write run: {}", reason);
        let config = &self.config;
        for p in self.partitions.values_mut() {
            p.abort(config);
        }
        self.status = RunStatus::Incomplete(reason.to_string());
    }

    fn summary(&self) -> WriteSummary {
        let count = |kind: EntityKind| -> usize {
            self.partitions
                .values()
                .filter(|p| p.kind == kind)
                .map(|p| p.written)
                .sum()
        };
        WriteSummary {
            nodes: count(EntityKind::Node),
            edges: count(EntityKind::Edge),
            files: self.partitions.values().filter_map(|p| p.finished.clone()).collect(),
            duplicate_nodes: self.count_duplicate_nodes().values().sum(),
            duplicate_edges: self.count_duplicate_edges().values().sum(),
            bad_relationships: self.count_bad_relationships(),
        }
    }

    fn report_duplicates(&self) {
        for (kind, labels) in [
            (EntityKind::Node, self.duplicate_node_labels()),
            (EntityKind::Edge, self.duplicate_edge_types()),
        ] {
            if !labels.is_empty() {
                let labels: Vec<String> = labels.into_iter().collect();
                warn!("Duplicate {}s encountered for: {}", kind, labels.join(", "));
            }
        }
        let bad = self.count_bad_relationships();
        if bad > 0 {
            warn!("{} relationships reference nodes not written in this run", bad);
        }
    }

    fn duplicates_of(&self, kind: EntityKind) -> BTreeSet<String> {
        self.partitions
            .values()
            .filter(|p| p.kind == kind)
            .flat_map(|p| p.duplicates.iter().cloned())
            .collect()
    }

    fn duplicate_labels(&self, kind: EntityKind) -> BTreeSet<String> {
        self.partitions
            .values()
            .filter(|p| p.kind == kind && p.duplicate_count > 0)
            .map(|p| p.label.clone())
            .collect()
    }

    fn count_duplicates(&self, kind: EntityKind) -> BTreeMap<String, usize> {
        self.partitions
            .values()
            .filter(|p| p.kind == kind && p.duplicate_count > 0)
            .map(|p| (p.label.clone(), p.duplicate_count))
            .collect()
    }

    pub fn duplicate_nodes(&self) -> BTreeSet<String> {
        self.duplicates_of(EntityKind::Node)
    }

    pub fn duplicate_node_labels(&self) -> BTreeSet<String> {
        self.duplicate_labels(EntityKind::Node)
    }

    /// Number of repeated node ids per label.
    pub fn count_duplicate_nodes(&self) -> BTreeMap<String, usize> {
        self.count_duplicates(EntityKind::Node)
    }

    pub fn duplicate_edges(&self) -> BTreeSet<String> {
        self.duplicates_of(EntityKind::Edge)
    }

    pub fn duplicate_edge_types(&self) -> BTreeSet<String> {
        self.duplicate_labels(EntityKind::Edge)
    }

    pub fn count_duplicate_edges(&self) -> BTreeMap<String, usize> {
        self.count_duplicates(EntityKind::Edge)
    }

    pub fn count_bad_relationships(&self) -> usize {
        self.partitions.values().map(|p| p.bad_relationships).sum()
    }

    /// Published partition files, nodes first, each group in label order.
    pub fn partition_files(&self) -> Vec<(EntityKind, String, PathBuf)> {
        self.partitions
            .values()
            .filter_map(|p| p.finished.clone().map(|f| (p.kind, p.label.clone(), f)))
            .collect()
    }

    /// The neo4j-admin invocation for the published files. Refused unless the
    /// run finished cleanly.
    pub fn import_call(&self) -> Result<String> {
        match &self.status {
            RunStatus::Complete => {}
            RunStatus::Open => {
                return Err(Error::IncompleteRun {
                    reason: "the write phase has not finished".to_string(),
                })
            }
            RunStatus::Incomplete(reason) => {
                return Err(Error::IncompleteRun {
                    reason: reason.clone(),
                })
            }
        }
        let cfg = &self.config;
        let q = if cfg.quote == '"' { '\'' } else { '"' };
        let mut parts = vec![
            format!("{}neo4j-admin import", cfg.import_call_bin_prefix),
            format!("--database={}", cfg.database_name),
            format!("--delimiter=\"{}\"", shell_char(cfg.delimiter)),
            format!("--array-delimiter=\"{}\"", shell_char(cfg.array_delimiter)),
            format!("--quote={q}{}{q}", cfg.quote),
            format!("--skip-bad-relationships={}", cfg.bad_relationships.is_skip()),
            format!("--skip-duplicate-nodes={}", cfg.duplicates.is_skip()),
        ];
        if cfg.wipe {
            parts.push("--force=true".to_string());
        }
        for p in self.partitions.values() {
            let Some(path) = &p.finished else { continue };
            let path = match &cfg.import_call_file_prefix {
                Some(prefix) => format!("{}{}", prefix, p.file_name),
                None => path.display().to_string(),
            };
            let flag = match p.kind {
                EntityKind::Node => "nodes",
                EntityKind::Edge => "relationships",
            };
            parts.push(format!("--{}=\"{}\"", flag, path));
        }
        Ok(format!("{}\n", parts.join(" \\\n    ")))
    }

    pub fn write_import_call(&self) -> Result<PathBuf> {
        let call = self.import_call()?;
        let path = self.config.output_directory.join(IMPORT_CALL_FILE);
        std::fs::write(&path, call)?;
        info!("Wrote neo4j-admin import call to {}", path.display());
        Ok(path)
    }
}

impl Drop for BatchWriter {
    fn drop(&mut self) {
        if self.status == RunStatus::Open
            && self
                .partitions
                .values()
                .any(|p| p.state != PartitionState::Flushed)
        {
            self.abort("writer dropped before finish");
        }
    }
}

fn shell_char(c: char) -> String {
    match c {
        '\t' => "\\t".to_string(),
        '\\' => "\\\\".to_string(),
        '"' => "\\\"".to_string(),
        c => c.to_string(),
    }
}

enum Column {
    Id,
    Labels,
    Start,
    End,
    Type,
    Property(String, ColumnType),
}

fn parse_scalar(cell: &str, kind: ScalarKind) -> std::result::Result<PropertyValue, String> {
    let bad = |e: &dyn std::fmt::Display| format!("`{}` is not a {}: {}", cell, kind.as_str(), e);
    match kind {
        ScalarKind::String => Ok(PropertyValue::Str(cell.to_string())),
        ScalarKind::Long => cell.parse().map(PropertyValue::Int).map_err(|e| bad(&e)),
        ScalarKind::Double => cell.parse().map(PropertyValue::Float).map_err(|e| bad(&e)),
        ScalarKind::Boolean => cell.parse().map(PropertyValue::Bool).map_err(|e| bad(&e)),
    }
}

fn parse_cell(
    cell: &str,
    ty: ColumnType,
    array_delimiter: char,
) -> std::result::Result<PropertyValue, String> {
    if !ty.array {
        return parse_scalar(cell, ty.kind);
    }
    let items = cell
        .split(array_delimiter)
        .map(|item| parse_scalar(item, ty.kind))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut out = match ty.kind {
        ScalarKind::String => PropertyValue::StrList(Vec::new()),
        ScalarKind::Long => PropertyValue::IntList(Vec::new()),
        ScalarKind::Double => PropertyValue::FloatList(Vec::new()),
        ScalarKind::Boolean => PropertyValue::BoolList(Vec::new()),
    };
    for item in items {
        match (&mut out, item) {
            (PropertyValue::StrList(v), PropertyValue::Str(s)) => v.push(s),
            (PropertyValue::IntList(v), PropertyValue::Int(i)) => v.push(i),
            (PropertyValue::FloatList(v), PropertyValue::Float(f)) => v.push(f),
            (PropertyValue::BoolList(v), PropertyValue::Bool(b)) => v.push(b),
            _ => return Err(format!("mixed array `{}`", cell)),
        }
    }
    Ok(out)
}

/// Reads a partition file back into entities, typing properties from the
/// header. Empty cells are treated as absent properties, so a value for which
/// [`PropertyValue::renders_empty`] holds does not come back.
pub fn read_partition(path: &Path, config: &WriterConfig) -> Result<Vec<Entity>> {
    let file_label = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(config.delimiter as u8)
        .quote(config.quote as u8)
        .has_headers(true)
        .from_path(path)?;
    let mut columns = Vec::new();
    for h in reader.headers()?.iter() {
        let column = match h {
            ID_COLUMN => Column::Id,
            LABEL_COLUMN => Column::Labels,
            START_ID_COLUMN => Column::Start,
            END_ID_COLUMN => Column::End,
            TYPE_COLUMN => Column::Type,
            other => match other.rsplit_once(':') {
                Some((name, ty)) => {
                    let ty: ColumnType = ty.parse().map_err(|reason| Error::Serialization {
                        kind: EntityKind::Node,
                        label: file_label.clone(),
                        id: String::new(),
                        reason,
                    })?;
                    Column::Property(name.to_string(), ty)
                }
                None => Column::Property(other.to_string(), ColumnType::scalar(ScalarKind::String)),
            },
        };
        columns.push(column);
    }
    let is_node = columns.iter().any(|c| matches!(c, Column::Id));
    let kind = if is_node { EntityKind::Node } else { EntityKind::Edge };

    let mut entities = Vec::new();
    for record in reader.records() {
        let record = record?;
        let (mut id, mut start, mut end, mut rel_type) =
            (String::new(), String::new(), String::new(), String::new());
        let mut labels: Vec<String> = Vec::new();
        let mut props = Properties::new();
        for (column, cell) in columns.iter().zip(record.iter()) {
            match column {
                Column::Id => id = cell.to_string(),
                Column::Start => start = cell.to_string(),
                Column::End => end = cell.to_string(),
                Column::Type => rel_type = cell.to_string(),
                Column::Labels => {
                    labels = cell
                        .split(config.array_delimiter)
                        .filter(|l| !l.is_empty())
                        .map(String::from)
                        .collect()
                }
                Column::Property(name, ty) => {
                    if cell.is_empty() {
                        continue;
                    }
                    let value = parse_cell(cell, *ty, config.array_delimiter).map_err(|reason| {
                        Error::Serialization {
                            kind,
                            label: file_label.clone(),
                            id: if is_node { id.clone() } else { format!("{} -> ?", start) },
                            reason,
                        }
                    })?;
                    props.insert(name.clone(), value);
                }
            }
        }
        if is_node {
            let mut labels = labels.into_iter();
            let primary = labels.next().unwrap_or_else(|| file_label.clone());
            entities.push(Entity::Node(
                BioCypherNode::new(id, primary, props).with_additional_labels(labels),
            ));
        } else {
            let edge_id = match props.remove("id") {
                Some(PropertyValue::Str(s)) => Some(s),
                Some(other) => {
                    props.insert("id", other);
                    None
                }
                None => None,
            };
            entities.push(Entity::Edge(
                BioCypherEdge::new(start, end, rel_type, props).with_id(edge_id),
            ));
        }
    }
    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn config(dir: &Path) -> WriterConfig {
        WriterConfig::builder()
            .output_directory(dir.to_path_buf())
            .build()
            .unwrap()
    }

    fn protein(id: &str) -> Entity {
        Entity::Node(BioCypherNode::new(id, "Protein", Properties::new().with("name", id)))
    }

    #[test]
    fn test_partition_lifecycle() {
        let dir = TempDir::new("writer").unwrap();
        let mut writer = BatchWriter::new(config(dir.path())).unwrap();
        assert_eq!(writer.partition_state(EntityKind::Node, "Protein"), None);
        writer.write(vec![protein("p1")]).unwrap();
        assert_eq!(
            writer.partition_state(EntityKind::Node, "Protein"),
            Some(PartitionState::Writing)
        );
        assert!(dir.path().join("Protein.csv.partial").exists());
        writer.finish().unwrap();
        assert_eq!(
            writer.partition_state(EntityKind::Node, "Protein"),
            Some(PartitionState::Flushed)
        );
        assert!(dir.path().join("Protein.csv").exists());
        assert!(!dir.path().join("Protein.csv.partial").exists());

        let err = writer.write(vec![protein("p2")]).unwrap_err();
        assert!(matches!(err, Error::WriterClosed { ref label } if label == "Protein"));
    }

    #[test]
    fn test_header_and_rows() {
        let dir = TempDir::new("writer").unwrap();
        let mut writer = BatchWriter::new(config(dir.path())).unwrap();
        let node = BioCypherNode::new(
            "p1",
            "Protein",
            Properties::new()
                .with("name", "TP53; tumor protein")
                .with("length", 393i64)
                .with("taxa", vec!["9606", "10090"]),
        )
        .with_additional_labels(["BiologicalEntity", "Entity"]);
        writer.write(vec![Entity::Node(node)]).unwrap();
        writer.finish().unwrap();
        let content = std::fs::read_to_string(dir.path().join("Protein.csv")).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next(),
            Some(":ID;name:string;length:long;taxa:string[];:LABEL")
        );
        assert_eq!(
            lines.next(),
            Some("p1;'TP53; tumor protein';393;9606|10090;Protein|BiologicalEntity|Entity")
        );
    }

    #[test]
    fn test_array_delimiter_inside_list_rejected() {
        let dir = TempDir::new("writer").unwrap();
        let mut writer = BatchWriter::new(config(dir.path())).unwrap();
        let node = BioCypherNode::new("p1", "Protein", Properties::new().with("x", vec!["a|b"]));
        let err = writer.write(vec![Entity::Node(node)]).unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
        assert!(matches!(writer.status(), RunStatus::Incomplete(_)));
        assert!(matches!(writer.import_call(), Err(Error::IncompleteRun { .. })));
    }

    #[test]
    fn test_import_call_requires_finish() {
        let dir = TempDir::new("writer").unwrap();
        let mut writer = BatchWriter::new(config(dir.path())).unwrap();
        writer.write(vec![protein("p1")]).unwrap();
        assert!(matches!(writer.import_call(), Err(Error::IncompleteRun { .. })));
        writer.finish().unwrap();
        let call = writer.import_call().unwrap();
        assert!(call.starts_with("bin/neo4j-admin import"));
        assert!(call.contains("--delimiter=\";\""));
        assert!(call.contains("--quote=\"'\""));
    }

    #[test]
    fn test_drop_leaves_partial() {
        let dir = TempDir::new("writer").unwrap();
        {
            let mut writer = BatchWriter::new(config(dir.path())).unwrap();
            writer.write(vec![protein("p1")]).unwrap();
        }
        assert!(dir.path().join("Protein.csv.partial").exists());
        assert!(!dir.path().join("Protein.csv").exists());
    }

    #[test]
    fn test_shell_char() {
        assert_eq!(shell_char('\t'), "\\t");
        assert_eq!(shell_char(';'), ";");
    }
}
