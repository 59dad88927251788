//! Builds typed nodes and relationships from raw records.
//!
//! Construction is pure: labels are resolved through the [`SchemaResolver`],
//! property keys follow the configured naming convention, and values are
//! converted to the types the schema declares. Nothing is written here.

use crate::consts::{PREFERRED_ID_KEY, SOURCE_EDGE_LABEL, STRICT_PROPERTIES, TARGET_EDGE_LABEL};
use crate::entity::{BioCypherEdge, BioCypherNode, EdgeOutput, Properties, PropertyValue, RelAsNode};
use crate::errors::{EntityKind, Error, Result};
use crate::options::{PropertyNaming, ValidationMode};
use crate::schema::{LeafMapping, SchemaResolver};
use crate::util::coerce_property_key;
use log::debug;
use std::collections::HashMap;

/// A raw node record: id, the label the source uses, and its properties.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: String,
    pub label: String,
    pub properties: Properties,
}

/// A raw relationship record. `as_node` requests promotion to a node.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    pub source: String,
    pub target: String,
    pub label: String,
    pub properties: Properties,
    pub as_node: bool,
}

pub struct EntityFactory<'a> {
    resolver: &'a SchemaResolver,
    validation: ValidationMode,
    naming: PropertyNaming,
}

impl<'a> EntityFactory<'a> {
    pub fn new(
        resolver: &'a SchemaResolver,
        validation: ValidationMode,
        naming: PropertyNaming,
    ) -> Self {
        Self {
            resolver,
            validation,
            naming,
        }
    }

    fn mapping(&self, label: &str) -> Result<&'a LeafMapping> {
        self.resolver.get(label).ok_or_else(|| Error::UnknownLabel {
            label: label.to_string(),
        })
    }

    /// Renames keys and converts values to their declared types. Values that
    /// would be written as an empty cell are dropped.
    fn prepare(&self, mapping: &LeafMapping, properties: Properties) -> Result<Properties> {
        let mut out = Properties::new();
        let mut sources: HashMap<String, String> = HashMap::new();
        for (raw, value) in properties {
            let key = coerce_property_key(&raw, self.naming);
            if let Some(first) = sources.insert(key.clone(), raw.clone()) {
                return Err(Error::UnsupportedProperty {
                    label: mapping.leaf.clone(),
                    key,
                    reason: format!("`{}` and `{}` map to the same property", first, raw),
                });
            }
            if value.renders_empty() {
                debug!("Dropping empty property {} of {}", key, mapping.leaf);
                continue;
            }
            let declared = mapping.declared_type(&raw).or_else(|| mapping.declared_type(&key));
            let value = match declared {
                Some(ty) => value.coerce(ty).map_err(|reason| Error::UnsupportedProperty {
                    label: mapping.leaf.clone(),
                    key: key.clone(),
                    reason,
                })?,
                None => value,
            };
            out.insert(key, value);
        }
        Ok(out)
    }

    /// Strict mode: provenance fields and every declared property must be present.
    fn check_required(
        &self,
        kind: EntityKind,
        mapping: &LeafMapping,
        id: &str,
        props: &Properties,
    ) -> Result<()> {
        if !self.validation.is_strict() {
            return Ok(());
        }
        let declared = mapping
            .properties
            .iter()
            .map(|(name, _)| coerce_property_key(name, self.naming));
        let required = STRICT_PROPERTIES.into_iter().map(String::from).chain(declared);
        for field in required {
            let present = props.get(&field).is_some_and(|v| !v.is_blank());
            if !present {
                return Err(Error::MissingRequiredField {
                    kind,
                    label: mapping.leaf.clone(),
                    id: id.to_string(),
                    field,
                });
            }
        }
        Ok(())
    }

    /// Builds a node for `leaf_label`. An empty id is never accepted.
    pub fn make_node(
        &self,
        raw_id: &str,
        leaf_label: &str,
        properties: Properties,
    ) -> Result<BioCypherNode> {
        let mapping = self.mapping(leaf_label)?;
        let id = raw_id.trim();
        if id.is_empty() {
            return Err(Error::MissingRequiredField {
                kind: EntityKind::Node,
                label: mapping.leaf.clone(),
                id: String::new(),
                field: "id".to_string(),
            });
        }
        let mut props = self.prepare(mapping, properties)?;
        self.check_required(EntityKind::Node, mapping, id, &props)?;
        if let Some(preferred) = &mapping.preferred_id {
            props.insert(coerce_property_key(PREFERRED_ID_KEY, self.naming), preferred.clone());
        }
        Ok(BioCypherNode::new(id, mapping.display_label.clone(), props)
            .with_additional_labels(mapping.additional_labels()))
    }

    /// Builds a relationship. With `as_node`, or when the leaf is configured
    /// to be represented as a node, the relationship is promoted to a node
    /// linked to its endpoints by two edges. An `id` property becomes the
    /// relationship id.
    pub fn make_edge(
        &self,
        source_id: &str,
        target_id: &str,
        leaf_label: &str,
        properties: Properties,
        as_node: bool,
    ) -> Result<EdgeOutput> {
        let mapping = self.mapping(leaf_label)?;
        let (source, target) = (source_id.trim(), target_id.trim());
        let display = format!("{} -> {}", source, target);
        for (field, value) in [("source_id", source), ("target_id", target)] {
            if value.is_empty() {
                return Err(Error::MissingRequiredField {
                    kind: EntityKind::Edge,
                    label: mapping.leaf.clone(),
                    id: display.clone(),
                    field: field.to_string(),
                });
            }
        }
        let mut props = self.prepare(mapping, properties)?;
        let id = match props.remove("id") {
            Some(PropertyValue::Str(s)) if !s.trim().is_empty() => Some(s),
            Some(PropertyValue::Str(_)) | None => None,
            Some(PropertyValue::Int(i)) => Some(i.to_string()),
            Some(other) => {
                return Err(Error::UnsupportedProperty {
                    label: mapping.leaf.clone(),
                    key: "id".to_string(),
                    reason: format!(
                        "relationship ids must be strings or integers, got {}",
                        other.column_type()
                    ),
                })
            }
        };
        self.check_required(
            EntityKind::Edge,
            mapping,
            id.as_deref().unwrap_or(&display),
            &props,
        )?;

        if as_node || !mapping.is_edge() {
            let node_id =
                id.unwrap_or_else(|| format!("{}_{}_{}", source, mapping.display_label, target));
            let node = BioCypherNode::new(node_id.clone(), mapping.display_label.clone(), props)
                .with_additional_labels(mapping.additional_labels());
            return Ok(EdgeOutput::Promoted(RelAsNode {
                node,
                source_edge: BioCypherEdge::new(
                    source,
                    node_id.clone(),
                    SOURCE_EDGE_LABEL,
                    Properties::new(),
                ),
                target_edge: BioCypherEdge::new(
                    node_id,
                    target,
                    TARGET_EDGE_LABEL,
                    Properties::new(),
                ),
            }));
        }
        Ok(EdgeOutput::Single(
            BioCypherEdge::new(source, target, mapping.display_label.clone(), props).with_id(id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ColumnType, ScalarKind};
    use crate::ontology::OntologyTree;
    use crate::schema::{SchemaConfig, SchemaEntry};

    fn resolver() -> SchemaResolver {
        let tree = OntologyTree::from_edges(
            vec![
                ("biological entity", "entity"),
                ("protein", "biological entity"),
                ("association", "entity"),
                ("protein protein interaction", "association"),
            ],
            Some("entity"),
        )
        .unwrap();
        let mut protein = SchemaEntry::node()
            .input_label("uniprot_protein")
            .property("length", ColumnType::scalar(ScalarKind::Long));
        protein.preferred_id = Some("uniprot".to_string());
        let schema = SchemaConfig::new()
            .with("protein", protein)
            .with(
                "protein protein interaction",
                SchemaEntry::edge().input_label("PPI"),
            );
        SchemaResolver::resolve(&schema, &tree).unwrap()
    }

    #[test]
    fn test_make_node() {
        let resolver = resolver();
        let factory =
            EntityFactory::new(&resolver, ValidationMode::Lenient, PropertyNaming::SnakeCase);
        let props = Properties::new().with("GeneSymbol", "TP53").with("length", "393");
        let node = factory.make_node("P04637", "uniprot_protein", props).unwrap();
        assert_eq!(node.label(), "Protein");
        assert_eq!(node.additional_labels(), &["BiologicalEntity", "Entity"]);
        assert_eq!(node.properties().get("gene_symbol"), Some(&PropertyValue::from("TP53")));
        assert_eq!(node.properties().get("length"), Some(&PropertyValue::Int(393)));
    }

    #[test]
    fn test_unknown_label() {
        let resolver = resolver();
        let factory =
            EntityFactory::new(&resolver, ValidationMode::Lenient, PropertyNaming::Preserve);
        let err = factory.make_node("x", "transcript", Properties::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownLabel { ref label } if label == "transcript"));
    }

    #[test]
    fn test_strict_mode_requires_provenance() {
        let resolver = resolver();
        let factory =
            EntityFactory::new(&resolver, ValidationMode::Strict, PropertyNaming::Preserve);
        let props = Properties::new()
            .with("source", "uniprot")
            .with("version", "2024_01")
            .with("length", 10i64);
        let err = factory.make_node("P1", "protein", props.clone()).unwrap_err();
        assert!(matches!(err, Error::MissingRequiredField { ref field, .. } if field == "licence"));

        let ok = factory.make_node("P1", "protein", props.with("licence", "CC BY 4.0"));
        assert!(ok.is_ok());
    }

    #[test]
    fn test_single_and_promoted_edges() {
        let resolver = resolver();
        let factory =
            EntityFactory::new(&resolver, ValidationMode::Lenient, PropertyNaming::Preserve);
        let single = factory
            .make_edge("P1", "P2", "PPI", Properties::new().with("id", "i1"), false)
            .unwrap();
        match single {
            EdgeOutput::Single(e) => {
                assert_eq!(e.id(), Some("i1"));
                assert_eq!(e.label(), "ProteinProteinInteraction");
                assert!(e.properties().is_empty());
            }
            other => panic!("expected a single edge, got {:?}", other),
        }

        let promoted = factory
            .make_edge("P1", "P2", "PPI", Properties::new().with("score", 0.9), true)
            .unwrap();
        let EdgeOutput::Promoted(rel) = promoted else {
            panic!("expected promotion");
        };
        assert_eq!(rel.node.id(), "P1_ProteinProteinInteraction_P2");
        assert_eq!(rel.source_edge.source(), "P1");
        assert_eq!(rel.source_edge.target(), rel.node.id());
        assert_eq!(rel.target_edge.source(), rel.node.id());
        assert_eq!(rel.target_edge.target(), "P2");
    }

    #[test]
    fn test_preferred_id_follows_naming() {
        let resolver = resolver();
        let factory =
            EntityFactory::new(&resolver, ValidationMode::Lenient, PropertyNaming::LowerCamelCase);
        let node = factory.make_node("P1", "protein", Properties::new()).unwrap();
        assert_eq!(node.properties().get("preferredId"), Some(&PropertyValue::from("uniprot")));
        assert!(!node.properties().contains_key("preferred_id"));
    }

    #[test]
    fn test_colliding_keys_rejected() {
        let resolver = resolver();
        let factory =
            EntityFactory::new(&resolver, ValidationMode::Lenient, PropertyNaming::SnakeCase);
        let props = Properties::new().with("geneSymbol", "TP53").with("gene_symbol", "BRCA1");
        match factory.make_node("P1", "protein", props).unwrap_err() {
            Error::UnsupportedProperty { key, reason, .. } => {
                assert_eq!(key, "gene_symbol");
                assert!(reason.contains("`geneSymbol`"));
                assert!(reason.contains("`gene_symbol`"));
            }
            other => panic!("expected a key collision, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_values_dropped() {
        let resolver = resolver();
        let factory =
            EntityFactory::new(&resolver, ValidationMode::Lenient, PropertyNaming::Preserve);
        let props = Properties::new()
            .with("name", "")
            .with("synonyms", Vec::<String>::new())
            .with("tags", vec![""])
            .with("comment", " ");
        let node = factory.make_node("P1", "protein", props).unwrap();
        let keys: Vec<&str> = node.properties().keys().collect();
        assert_eq!(keys, vec!["comment", "preferred_id"]);
    }

    #[test]
    fn test_edge_id_must_be_text_or_integer() {
        let resolver = resolver();
        let factory =
            EntityFactory::new(&resolver, ValidationMode::Lenient, PropertyNaming::Preserve);
        let EdgeOutput::Single(edge) = factory
            .make_edge("P1", "P2", "PPI", Properties::new().with("id", 7i64), false)
            .unwrap()
        else {
            panic!("expected a single edge");
        };
        assert_eq!(edge.id(), Some("7"));

        let bad_ids = [
            PropertyValue::Float(1.5),
            PropertyValue::Bool(true),
            PropertyValue::from(vec!["a"]),
        ];
        for id in bad_ids {
            let err = factory
                .make_edge("P1", "P2", "PPI", Properties::new().with("id", id), false)
                .unwrap_err();
            assert!(matches!(err, Error::UnsupportedProperty { ref key, .. } if key == "id"));
        }
    }

    #[test]
    fn test_edge_requires_endpoints() {
        let resolver = resolver();
        let factory =
            EntityFactory::new(&resolver, ValidationMode::Lenient, PropertyNaming::Preserve);
        let err = factory.make_edge("", "P2", "PPI", Properties::new(), false).unwrap_err();
        assert!(
            matches!(err, Error::MissingRequiredField { ref field, .. } if field == "source_id")
        );
    }
}
