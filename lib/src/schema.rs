//! Schema configuration and leaf resolution.
//!
//! A schema configuration names the leaf types a pipeline produces. Each leaf is
//! resolved against the ontology tree into a [`LeafMapping`] carrying its
//! ancestor chain and display label. Resolution is exact after normalization:
//! a leaf that does not name an ontology class must say where it hangs with
//! `is_a`, otherwise resolution fails.

use crate::entity::ColumnType;
use crate::errors::{Error, Result};
use crate::ontology::OntologyTree;
use crate::util::{normalize_label, to_pascal_case};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentedAs {
    #[default]
    Node,
    Edge,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    represented_as: RepresentedAs,
    #[serde(default)]
    input_label: Option<OneOrMany>,
    #[serde(default)]
    is_a: Option<String>,
    #[serde(default)]
    preferred_id: Option<String>,
    #[serde(default)]
    label_as_edge: Option<String>,
    #[serde(default)]
    properties: Option<serde_yaml::Mapping>,
}

/// One leaf of the schema configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub represented_as: RepresentedAs,
    pub input_labels: Vec<String>,
    pub is_a: Option<String>,
    pub preferred_id: Option<String>,
    pub label_as_edge: Option<String>,
    /// Declared properties in configuration order.
    pub properties: Vec<(String, ColumnType)>,
}

impl SchemaEntry {
    pub fn node() -> Self {
        Self::default()
    }

    pub fn edge() -> Self {
        Self {
            represented_as: RepresentedAs::Edge,
            ..Self::default()
        }
    }

    pub fn input_label(mut self, label: impl Into<String>) -> Self {
        self.input_labels.push(label.into());
        self
    }

    pub fn is_a(mut self, parent: impl Into<String>) -> Self {
        self.is_a = Some(parent.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.properties.push((name.into(), ty));
        self
    }

    fn from_raw(leaf: &str, raw: RawEntry) -> Result<Self> {
        let input_labels = match raw.input_label {
            Some(OneOrMany::One(l)) => vec![l],
            Some(OneOrMany::Many(ls)) => ls,
            None => vec![leaf.to_string()],
        };
        let mut properties = Vec::new();
        for (k, v) in raw.properties.unwrap_or_default() {
            let (Some(name), Some(ty)) = (k.as_str(), v.as_str()) else {
                return Err(Error::Config(format!(
                    "properties of `{}` must map names to type names",
                    leaf
                )));
            };
            let ty: ColumnType = ty
                .parse()
                .map_err(|e: String| Error::Config(format!("{}: {}", leaf, e)))?;
            properties.push((name.to_string(), ty));
        }
        Ok(SchemaEntry {
            represented_as: raw.represented_as,
            input_labels,
            is_a: raw.is_a,
            preferred_id: raw.preferred_id,
            label_as_edge: raw.label_as_edge,
            properties,
        })
    }
}

/// The parsed schema configuration, keyed by leaf name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaConfig {
    entries: BTreeMap<String, SchemaEntry>,
}

impl SchemaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Top-level keys whose values are not mappings (titles, comments) are ignored.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let doc: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(s)?;
        let mut entries = BTreeMap::new();
        for (leaf, value) in doc {
            if !value.is_mapping() {
                debug!("Ignoring schema key `{}`: not a mapping", leaf);
                continue;
            }
            let raw: RawEntry = serde_yaml::from_value(value)?;
            entries.insert(leaf.clone(), SchemaEntry::from_raw(&leaf, raw)?);
        }
        Ok(Self { entries })
    }

    pub fn insert(&mut self, leaf: impl Into<String>, mut entry: SchemaEntry) {
        let leaf = leaf.into();
        if entry.input_labels.is_empty() {
            entry.input_labels.push(leaf.clone());
        }
        self.entries.insert(leaf, entry);
    }

    pub fn with(mut self, leaf: impl Into<String>, entry: SchemaEntry) -> Self {
        self.insert(leaf, entry);
        self
    }

    pub fn get(&self, leaf: &str) -> Option<&SchemaEntry> {
        self.entries.get(leaf)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &SchemaEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A leaf resolved onto the ontology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafMapping {
    pub leaf: String,
    /// Class the leaf resolved to; for `is_a` extensions, the leaf itself.
    pub ontology_node: String,
    /// Root first, the leaf's own class last.
    pub ancestors: Vec<String>,
    pub display_label: String,
    pub input_labels: Vec<String>,
    pub represented_as: RepresentedAs,
    pub preferred_id: Option<String>,
    pub properties: Vec<(String, ColumnType)>,
}

impl LeafMapping {
    /// Display labels of the ancestors, nearest first, without the leaf itself.
    pub fn additional_labels(&self) -> Vec<String> {
        self.ancestors
            .iter()
            .rev()
            .skip(1)
            .map(|a| to_pascal_case(a))
            .collect()
    }

    pub fn is_edge(&self) -> bool {
        self.represented_as == RepresentedAs::Edge
    }

    pub fn declared_type(&self, property: &str) -> Option<ColumnType> {
        self.properties
            .iter()
            .find(|(name, _)| name == property)
            .map(|(_, ty)| *ty)
    }
}

/// All leaf mappings of a run, looked up by input label or leaf name.
#[derive(Debug, Clone, Default)]
pub struct SchemaResolver {
    mappings: BTreeMap<String, LeafMapping>,
    by_input: HashMap<String, String>,
}

impl SchemaResolver {
    /// Resolves every configured leaf; the first unresolvable one fails the whole set.
    pub fn resolve(schema: &SchemaConfig, tree: &OntologyTree) -> Result<Self> {
        let mut resolver = SchemaResolver::default();
        for (leaf, entry) in schema.entries() {
            let mapping = Self::resolve_leaf(tree, leaf, entry)?;
            for input in &mapping.input_labels {
                if let Some(other) = resolver.by_input.get(input) {
                    return Err(Error::Config(format!(
                        "input label `{}` is claimed by both `{}` and `{}`",
                        input, other, leaf
                    )));
                }
                resolver.by_input.insert(input.clone(), leaf.to_string());
            }
            debug!("Resolved `{}` to chain {:?}", leaf, mapping.ancestors);
            resolver.mappings.insert(leaf.to_string(), mapping);
        }
        info!("Resolved {} leaf labels against {}", resolver.len(), tree.source_name());
        Ok(resolver)
    }

    /// Resolves one leaf. Pure: the same inputs always give the same mapping.
    pub fn resolve_leaf(
        tree: &OntologyTree,
        leaf: &str,
        entry: &SchemaEntry,
    ) -> Result<LeafMapping> {
        let (ontology_node, ancestors) = match tree.lineage(leaf) {
            Some(lineage) => {
                let node = lineage[0].to_string();
                let chain: Vec<String> = lineage.iter().rev().map(|s| s.to_string()).collect();
                (node, chain)
            }
            None => {
                let Some(parent) = &entry.is_a else {
                    return Err(Error::UnresolvedLeaf {
                        label: leaf.to_string(),
                    });
                };
                let Some(lineage) = tree.lineage(parent) else {
                    return Err(Error::UnresolvedLeaf {
                        label: format!("{} (is_a `{}`)", leaf, parent),
                    });
                };
                let node = normalize_label(leaf);
                let mut chain: Vec<String> = lineage.iter().rev().map(|s| s.to_string()).collect();
                chain.push(node.clone());
                (node, chain)
            }
        };
        let display_label = match (&entry.label_as_edge, entry.represented_as) {
            (Some(l), RepresentedAs::Edge) => l.clone(),
            _ => to_pascal_case(&ontology_node),
        };
        Ok(LeafMapping {
            leaf: leaf.to_string(),
            ontology_node,
            ancestors,
            display_label,
            input_labels: entry.input_labels.clone(),
            represented_as: entry.represented_as,
            preferred_id: entry.preferred_id.clone(),
            properties: entry.properties.clone(),
        })
    }

    /// Looks up by input label first, then by leaf name (exact, then normalized).
    pub fn get(&self, label: &str) -> Option<&LeafMapping> {
        if let Some(leaf) = self.by_input.get(label) {
            return self.mappings.get(leaf);
        }
        if let Some(m) = self.mappings.get(label) {
            return Some(m);
        }
        let normalized = normalize_label(label);
        self.mappings
            .values()
            .find(|m| normalize_label(&m.leaf) == normalized)
    }

    pub fn mappings(&self) -> impl Iterator<Item = &LeafMapping> {
        self.mappings.values()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// blake3 over the canonical JSON of all mappings, sorted by leaf.
    pub fn digest(&self) -> Result<String> {
        let sorted: Vec<&LeafMapping> = self.mappings.values().collect();
        let bytes = serde_json::to_vec(&sorted)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}
