//! Typed node and relationship values handed from the factory to the writer.

use crate::errors::{EntityKind, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The scalar types a property column can hold, named as neo4j-admin names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    String,
    Long,
    Double,
    Boolean,
}

impl ScalarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Long => "long",
            ScalarKind::Double => "double",
            ScalarKind::Boolean => "boolean",
        }
    }

    /// Accepts the declared type names used in schema configurations
    /// (`str`, `int`, `float`, `bool`, ...) as well as the header names.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "str" | "string" => Some(ScalarKind::String),
            "int" | "integer" | "long" => Some(ScalarKind::Long),
            "float" | "double" | "dbl" => Some(ScalarKind::Double),
            "bool" | "boolean" => Some(ScalarKind::Boolean),
            _ => None,
        }
    }
}

/// Type of one partition column: a scalar kind, optionally an array of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnType {
    pub kind: ScalarKind,
    pub array: bool,
}

impl ColumnType {
    pub fn scalar(kind: ScalarKind) -> Self {
        Self { kind, array: false }
    }

    pub fn array(kind: ScalarKind) -> Self {
        Self { kind, array: true }
    }

    /// Whether a value of type `other` can be written into this column
    /// and read back unchanged.
    pub fn accepts(&self, other: ColumnType) -> bool {
        self.array == other.array
            && (self.kind == other.kind
                || (self.kind == ScalarKind::Double && other.kind == ScalarKind::Long))
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.array {
            write!(f, "{}[]", self.kind.as_str())
        } else {
            write!(f, "{}", self.kind.as_str())
        }
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (base, array) = match s.strip_suffix("[]") {
            Some(base) => (base, true),
            None => (s, false),
        };
        ScalarKind::parse(base)
            .map(|kind| ColumnType { kind, array })
            .ok_or_else(|| format!("unsupported property type `{}`", s))
    }
}

/// A property value. Lists are homogeneous by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    StrList(Vec<String>),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    BoolList(Vec<bool>),
}

impl PropertyValue {
    pub fn column_type(&self) -> ColumnType {
        match self {
            PropertyValue::Str(_) => ColumnType::scalar(ScalarKind::String),
            PropertyValue::Int(_) => ColumnType::scalar(ScalarKind::Long),
            PropertyValue::Float(_) => ColumnType::scalar(ScalarKind::Double),
            PropertyValue::Bool(_) => ColumnType::scalar(ScalarKind::Boolean),
            PropertyValue::StrList(_) => ColumnType::array(ScalarKind::String),
            PropertyValue::IntList(_) => ColumnType::array(ScalarKind::Long),
            PropertyValue::FloatList(_) => ColumnType::array(ScalarKind::Double),
            PropertyValue::BoolList(_) => ColumnType::array(ScalarKind::Boolean),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// True for empty strings and empty lists.
    pub fn is_blank(&self) -> bool {
        match self {
            PropertyValue::Str(s) => s.trim().is_empty(),
            PropertyValue::StrList(v) => v.is_empty(),
            PropertyValue::IntList(v) => v.is_empty(),
            PropertyValue::FloatList(v) => v.is_empty(),
            PropertyValue::BoolList(v) => v.is_empty(),
            _ => false,
        }
    }

    /// True when the value is written as an empty cell: the empty string,
    /// an empty list or a list holding one empty string. Such values read
    /// back as absent.
    pub fn renders_empty(&self) -> bool {
        match self {
            PropertyValue::Str(s) => s.is_empty(),
            PropertyValue::StrList(v) => v.is_empty() || (v.len() == 1 && v[0].is_empty()),
            PropertyValue::IntList(v) => v.is_empty(),
            PropertyValue::FloatList(v) => v.is_empty(),
            PropertyValue::BoolList(v) => v.is_empty(),
            _ => false,
        }
    }

    /// Converts a JSON value. `null` yields `None` (the property is omitted);
    /// objects, nested lists and mixed lists are rejected.
    pub fn from_json(label: &str, key: &str, value: &Value) -> Result<Option<Self>> {
        let unsupported = |reason: &str| Error::UnsupportedProperty {
            label: label.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        };
        let v = match value {
            Value::Null => return Ok(None),
            Value::Bool(b) => PropertyValue::Bool(*b),
            Value::String(s) => PropertyValue::Str(s.clone()),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PropertyValue::Int(i),
                None => PropertyValue::Float(
                    n.as_f64().ok_or_else(|| unsupported("number out of range"))?,
                ),
            },
            Value::Object(_) => return Err(unsupported("nested objects are not allowed")),
            Value::Array(items) => {
                if items.iter().all(|i| i.is_string()) {
                    PropertyValue::StrList(
                        items.iter().filter_map(|i| i.as_str().map(String::from)).collect(),
                    )
                } else if items.iter().all(|i| i.is_boolean()) {
                    PropertyValue::BoolList(items.iter().filter_map(|i| i.as_bool()).collect())
                } else if items.iter().all(|i| i.is_i64()) {
                    PropertyValue::IntList(items.iter().filter_map(|i| i.as_i64()).collect())
                } else if items.iter().all(|i| i.is_number()) {
                    PropertyValue::FloatList(items.iter().filter_map(|i| i.as_f64()).collect())
                } else if items.iter().any(|i| i.is_array() || i.is_object()) {
                    return Err(unsupported("lists may only hold scalars"));
                } else {
                    return Err(unsupported("lists must hold a single scalar type"));
                }
            }
        };
        Ok(Some(v))
    }

    /// Converts to a declared column type. Scalars are wrapped when an array
    /// is declared; strings are parsed when a number or boolean is declared.
    pub fn coerce(self, target: ColumnType) -> std::result::Result<Self, String> {
        if self.column_type() == target {
            return Ok(self);
        }
        let found = self.column_type();
        let fail = || format!("cannot convert {} to {}", found, target);
        if target.array {
            let items: Vec<PropertyValue> = match self {
                PropertyValue::StrList(v) => v.into_iter().map(PropertyValue::Str).collect(),
                PropertyValue::IntList(v) => v.into_iter().map(PropertyValue::Int).collect(),
                PropertyValue::FloatList(v) => v.into_iter().map(PropertyValue::Float).collect(),
                PropertyValue::BoolList(v) => v.into_iter().map(PropertyValue::Bool).collect(),
                scalar => vec![scalar],
            };
            let scalar_target = ColumnType::scalar(target.kind);
            let items = items
                .into_iter()
                .map(|i| i.coerce(scalar_target))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            return Ok(match target.kind {
                ScalarKind::String => PropertyValue::StrList(
                    items
                        .into_iter()
                        .filter_map(|i| match i {
                            PropertyValue::Str(s) => Some(s),
                            _ => None,
                        })
                        .collect(),
                ),
                ScalarKind::Long => PropertyValue::IntList(
                    items
                        .into_iter()
                        .filter_map(|i| match i {
                            PropertyValue::Int(n) => Some(n),
                            _ => None,
                        })
                        .collect(),
                ),
                ScalarKind::Double => PropertyValue::FloatList(
                    items
                        .into_iter()
                        .filter_map(|i| match i {
                            PropertyValue::Float(n) => Some(n),
                            _ => None,
                        })
                        .collect(),
                ),
                ScalarKind::Boolean => PropertyValue::BoolList(
                    items
                        .into_iter()
                        .filter_map(|i| match i {
                            PropertyValue::Bool(b) => Some(b),
                            _ => None,
                        })
                        .collect(),
                ),
            });
        }
        match (self, target.kind) {
            (PropertyValue::Int(i), ScalarKind::Double) => Ok(PropertyValue::Float(i as f64)),
            (PropertyValue::Int(i), ScalarKind::String) => Ok(PropertyValue::Str(i.to_string())),
            (PropertyValue::Float(x), ScalarKind::String) => Ok(PropertyValue::Str(x.to_string())),
            (PropertyValue::Bool(b), ScalarKind::String) => Ok(PropertyValue::Str(b.to_string())),
            (PropertyValue::Str(s), ScalarKind::Long) => {
                s.trim().parse().map(PropertyValue::Int).map_err(|_| fail())
            }
            (PropertyValue::Str(s), ScalarKind::Double) => {
                s.trim().parse().map(PropertyValue::Float).map_err(|_| fail())
            }
            (PropertyValue::Str(s), ScalarKind::Boolean) => match s.trim().to_lowercase().as_str() {
                "true" => Ok(PropertyValue::Bool(true)),
                "false" => Ok(PropertyValue::Bool(false)),
                _ => Err(fail()),
            },
            _ => Err(fail()),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Str(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(v as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(v: Vec<String>) -> Self {
        PropertyValue::StrList(v)
    }
}

impl From<Vec<&str>> for PropertyValue {
    fn from(v: Vec<&str>) -> Self {
        PropertyValue::StrList(v.into_iter().map(String::from).collect())
    }
}

impl From<Vec<i64>> for PropertyValue {
    fn from(v: Vec<i64>) -> Self {
        PropertyValue::IntList(v)
    }
}

impl From<Vec<f64>> for PropertyValue {
    fn from(v: Vec<f64>) -> Self {
        PropertyValue::FloatList(v)
    }
}

impl From<Vec<bool>> for PropertyValue {
    fn from(v: Vec<bool>) -> Self {
        PropertyValue::BoolList(v)
    }
}

/// Property mapping that keeps keys in insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Properties {
    entries: Vec<(String, PropertyValue)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts a JSON object; `null` members are dropped.
    pub fn from_json(label: &str, map: &serde_json::Map<String, Value>) -> Result<Self> {
        let mut props = Properties::new();
        for (key, value) in map {
            if let Some(v) = PropertyValue::from_json(label, key, value)? {
                props.insert(key.clone(), v);
            }
        }
        Ok(props)
    }

    /// Inserts or replaces; a replaced key keeps its position.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<PropertyValue>> FromIterator<(K, V)> for Properties {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

impl IntoIterator for Properties {
    type Item = (String, PropertyValue);
    type IntoIter = std::vec::IntoIter<(String, PropertyValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BioCypherNode {
    id: String,
    label: String,
    additional_labels: Vec<String>,
    properties: Properties,
}

impl BioCypherNode {
    pub fn new(id: impl Into<String>, label: impl Into<String>, properties: Properties) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            additional_labels: Vec::new(),
            properties,
        }
    }

    /// Sets the additional labels, dropping repeats and the primary label.
    pub fn with_additional_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.additional_labels.clear();
        for l in labels {
            let l = l.into();
            if l != self.label && !self.additional_labels.contains(&l) {
                self.additional_labels.push(l);
            }
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn additional_labels(&self) -> &[String] {
        &self.additional_labels
    }

    /// Primary label followed by the additional labels.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.label.as_str())
            .chain(self.additional_labels.iter().map(|s| s.as_str()))
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BioCypherEdge {
    id: Option<String>,
    source: String,
    target: String,
    label: String,
    properties: Properties,
}

impl BioCypherEdge {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        label: impl Into<String>,
        properties: Properties,
    ) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            label: label.into(),
            properties,
        }
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// How the edge is named in messages: its id, or `source -> target`.
    pub fn display_id(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("{} -> {}", self.source, self.target),
        }
    }
}

/// A relationship promoted to a node, wired to its endpoints by two edges.
#[derive(Debug, Clone, PartialEq)]
pub struct RelAsNode {
    pub node: BioCypherNode,
    pub source_edge: BioCypherEdge,
    pub target_edge: BioCypherEdge,
}

/// What the factory produces for a relationship record.
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeOutput {
    Single(BioCypherEdge),
    Promoted(RelAsNode),
}

impl EdgeOutput {
    pub fn is_promoted(&self) -> bool {
        matches!(self, EdgeOutput::Promoted(_))
    }

    /// Flattens into writer input: the promoted node comes before its edges.
    pub fn into_entities(self) -> Vec<Entity> {
        match self {
            EdgeOutput::Single(edge) => vec![Entity::Edge(edge)],
            EdgeOutput::Promoted(rel) => vec![
                Entity::Node(rel.node),
                Entity::Edge(rel.source_edge),
                Entity::Edge(rel.target_edge),
            ],
        }
    }
}

/// One item of the stream consumed by the batch writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Node(BioCypherNode),
    Edge(BioCypherEdge),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Node(_) => EntityKind::Node,
            Entity::Edge(_) => EntityKind::Edge,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Entity::Node(n) => n.label(),
            Entity::Edge(e) => e.label(),
        }
    }

    pub fn properties(&self) -> &Properties {
        match self {
            Entity::Node(n) => n.properties(),
            Entity::Edge(e) => e.properties(),
        }
    }

    pub fn display_id(&self) -> String {
        match self {
            Entity::Node(n) => n.id().to_string(),
            Entity::Edge(e) => e.display_id(),
        }
    }
}

impl From<BioCypherNode> for Entity {
    fn from(n: BioCypherNode) -> Self {
        Entity::Node(n)
    }
}

impl From<BioCypherEdge> for Entity {
    fn from(e: BioCypherEdge) -> Self {
        Entity::Edge(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_values() {
        let v = PropertyValue::from_json("protein", "score", &json!(0.5)).unwrap();
        assert_eq!(v, Some(PropertyValue::Float(0.5)));
        let v = PropertyValue::from_json("protein", "length", &json!(42)).unwrap();
        assert_eq!(v, Some(PropertyValue::Int(42)));
        let v = PropertyValue::from_json("protein", "names", &json!(["a", "b"])).unwrap();
        assert_eq!(v, Some(PropertyValue::StrList(vec!["a".into(), "b".into()])));
        let v = PropertyValue::from_json("protein", "mixed numbers", &json!([1, 2.5])).unwrap();
        assert_eq!(v, Some(PropertyValue::FloatList(vec![1.0, 2.5])));
        assert_eq!(PropertyValue::from_json("protein", "x", &json!(null)).unwrap(), None);
    }

    #[test]
    fn test_unsupported_values_rejected() {
        let err = PropertyValue::from_json("protein", "meta", &json!({"a": 1})).unwrap_err();
        assert!(matches!(err, Error::UnsupportedProperty { ref key, .. } if key == "meta"));
        assert!(PropertyValue::from_json("protein", "m", &json!([1, "a"])).is_err());
        assert!(PropertyValue::from_json("protein", "n", &json!([[1]])).is_err());
    }

    #[test]
    fn test_coerce() {
        let declared: ColumnType = "int".parse().unwrap();
        assert_eq!(PropertyValue::from("12").coerce(declared), Ok(PropertyValue::Int(12)));
        assert!(PropertyValue::from("twelve").coerce(declared).is_err());
        let declared: ColumnType = "str[]".parse().unwrap();
        assert_eq!(
            PropertyValue::from("x").coerce(declared),
            Ok(PropertyValue::StrList(vec!["x".into()]))
        );
        let declared: ColumnType = "float".parse().unwrap();
        assert_eq!(PropertyValue::Int(3).coerce(declared), Ok(PropertyValue::Float(3.0)));
    }

    #[test]
    fn test_values_rendering_as_empty_cells() {
        assert!(PropertyValue::from("").renders_empty());
        assert!(PropertyValue::StrList(vec![]).renders_empty());
        assert!(PropertyValue::StrList(vec![String::new()]).renders_empty());
        assert!(PropertyValue::IntList(vec![]).renders_empty());
        assert!(!PropertyValue::from(" ").renders_empty());
        assert!(!PropertyValue::StrList(vec![String::new(), String::new()]).renders_empty());
        assert!(!PropertyValue::Int(0).renders_empty());
    }

    #[test]
    fn test_column_type_display() {
        assert_eq!(ColumnType::array(ScalarKind::Long).to_string(), "long[]");
        assert_eq!(
            "boolean".parse::<ColumnType>().unwrap(),
            ColumnType::scalar(ScalarKind::Boolean)
        );
        let long = ColumnType::scalar(ScalarKind::Long);
        let double = ColumnType::scalar(ScalarKind::Double);
        assert!(double.accepts(long));
        assert!(!long.accepts(ColumnType::scalar(ScalarKind::String)));
    }

    #[test]
    fn test_properties_keep_order() {
        let mut props: Properties = vec![("b", 1i64), ("a", 2i64)].into_iter().collect();
        props.insert("b", 3i64);
        assert_eq!(props.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(props.get("b"), Some(&PropertyValue::Int(3)));
    }

    #[test]
    fn test_promoted_flattening() {
        let node = BioCypherNode::new("r1", "Interaction", Properties::new());
        let rel = RelAsNode {
            node,
            source_edge: BioCypherEdge::new("p1", "r1", "IS_SOURCE_OF", Properties::new()),
            target_edge: BioCypherEdge::new("r1", "p2", "IS_TARGET_OF", Properties::new()),
        };
        let entities = EdgeOutput::Promoted(rel).into_entities();
        assert_eq!(entities.len(), 3);
        assert_eq!(entities[0].kind(), EntityKind::Node);
    }
}
