//! Defines the ontology hierarchy used to reconcile input labels: `OntologyTree`,
//! its `OntologyNode`s and the `OntologySource` they are loaded from.
//!
//! The tree is an is-a DAG stored in a petgraph arena (edges point from child to
//! parent). Ancestor closures are computed once at build time, so ancestor and
//! membership queries never re-walk the graph.
//!
//! Ordering rules, stable across runs:
//! - `ancestors(n)` excludes `n` and lists the closure sorted by depth
//!   descending (nearest first), ties broken lexicographically; the root is
//!   always last.
//! - `lineage(n)` is `n` followed by `ancestors(n)`.
//! - `descendants(n)` excludes `n` and yields breadth-first, children in
//!   lexicographic order.

use crate::config::{HeadOntology, TailOntology};
use crate::consts::{LABEL, SUBCLASS_OF};
use crate::errors::{Error, Result};
use crate::util::{iri_local_name, normalize_label, read_file, read_url};
use log::{debug, info, warn};
use oxigraph::model::graph::Graph as OxigraphGraph;
use oxigraph::model::{NamedOrBlankNodeRef, TermRef};
use petgraph::algo::toposort;
use petgraph::dot::{Config as DotConfig, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;

/// Where an ontology is read from.
#[derive(Serialize, Deserialize, Hash, Clone, Eq, PartialEq, Debug)]
pub enum OntologySource {
    #[serde(rename = "file")]
    File(PathBuf),
    #[serde(rename = "url")]
    Url(String),
}

impl std::fmt::Display for OntologySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OntologySource::File(p) => write!(f, "file://{}", p.display()),
            OntologySource::Url(u) => write!(f, "{}", u),
        }
    }
}

impl OntologySource {
    pub fn from_str(s: &str) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            OntologySource::Url(s.to_string())
        } else {
            OntologySource::File(PathBuf::from(s.trim_start_matches("file://")))
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, OntologySource::File(_))
    }

    pub fn is_url(&self) -> bool {
        matches!(self, OntologySource::Url(_))
    }

    /// Reads the RDF graph behind this source. URLs are refused when offline.
    pub fn graph(&self, offline: bool) -> Result<OxigraphGraph> {
        match self {
            OntologySource::File(p) => read_file(p),
            OntologySource::Url(u) => {
                if offline {
                    return Err(Error::OfflineRetrieval { url: u.clone() });
                }
                read_url(u)
            }
        }
    }
}

/// One ontology class.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OntologyNode {
    /// Canonical name in lower sentence case.
    pub name: String,
    pub iri: Option<String>,
    pub parents: BTreeSet<String>,
    pub children: BTreeSet<String>,
    /// Length of the longest is-a path from the root.
    pub depth: usize,
}

impl std::fmt::Display for OntologyNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone)]
pub struct OntologyTree {
    source_name: String,
    root: NodeIndex,
    graph: DiGraph<OntologyNode, ()>,
    index: HashMap<String, NodeIndex>,
    children: Vec<Vec<NodeIndex>>,
    ancestors: Vec<Vec<NodeIndex>>,
    ancestor_sets: Vec<HashSet<NodeIndex>>,
}

impl OntologyTree {
    /// Builds a tree from `(child, parent)` is-a pairs. Names are normalized.
    /// Without an explicit root, the single parentless class becomes the root.
    pub fn from_edges<I, S>(edges: I, root: Option<&str>) -> Result<Self>
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let edges: Vec<(String, String)> = edges
            .into_iter()
            .map(|(c, p)| (normalize_label(c.as_ref()), normalize_label(p.as_ref())))
            .collect();
        Self::build("<in-memory>".to_string(), edges, HashMap::new(), root)
    }

    /// Loads a tree from an RDF ontology, rooted at `root_node`.
    pub fn load(source: &OntologySource, root_node: Option<&str>, offline: bool) -> Result<Self> {
        info!("Loading ontology from {}", source);
        let graph = source.graph(offline)?;

        // label per class IRI; English or untagged labels win
        let mut labels: HashMap<String, (String, bool)> = HashMap::new();
        let mut subclass: Vec<(String, String)> = Vec::new();
        for triple in graph.iter() {
            let subject = match triple.subject {
                NamedOrBlankNodeRef::NamedNode(n) => n.as_str(),
                _ => continue,
            };
            if triple.predicate == SUBCLASS_OF {
                if let TermRef::NamedNode(parent) = triple.object {
                    subclass.push((subject.to_string(), parent.as_str().to_string()));
                }
            } else if triple.predicate == LABEL {
                if let TermRef::Literal(lit) = triple.object {
                    let preferred = matches!(lit.language(), None | Some("en"));
                    let replace = match labels.get(subject) {
                        None => true,
                        Some((_, was_preferred)) => preferred && !was_preferred,
                    };
                    if replace {
                        labels.insert(subject.to_string(), (lit.value().to_string(), preferred));
                    }
                }
            }
        }
        if subclass.is_empty() {
            return Err(Error::OntologyLoad {
                source_name: source.to_string(),
                reason: "no rdfs:subClassOf statements found".to_string(),
            });
        }

        let name_of = |iri: &str| -> String {
            match labels.get(iri) {
                Some((label, _)) => normalize_label(label),
                None => normalize_label(iri_local_name(iri)),
            }
        };
        let mut iris: HashMap<String, String> = HashMap::new();
        let mut edges = Vec::with_capacity(subclass.len());
        for (child, parent) in subclass {
            let c = name_of(&child);
            let p = name_of(&parent);
            if c == p {
                debug!("Ignoring reflexive subClassOf on {}", child);
                continue;
            }
            iris.entry(c.clone()).or_insert(child);
            iris.entry(p.clone()).or_insert(parent);
            edges.push((c, p));
        }
        Self::build(source.to_string(), edges, iris, root_node)
    }

    /// Loads the head ontology and splices every tail ontology onto it, in
    /// name order so the result does not depend on map iteration.
    pub fn from_settings(
        head: &HeadOntology,
        tails: &BTreeMap<String, TailOntology>,
        offline: bool,
    ) -> Result<Self> {
        let source = OntologySource::from_str(&head.url);
        let mut tree = Self::load(&source, head.root_node.as_deref(), offline)?;
        for (name, tail) in tails {
            let tail_source = OntologySource::from_str(&tail.url);
            let tail_tree = Self::load(&tail_source, Some(&tail.tail_join_node), offline)
                .map_err(|e| Error::OntologyJoin {
                    tail: name.clone(),
                    reason: e.to_string(),
                })?;
            tree.join(&tail_tree, &tail.head_join_node, &tail.tail_join_node)?;
            info!("Joined tail ontology {} at {}", name, tail.head_join_node);
        }
        Ok(tree)
    }

    fn build(
        source_name: String,
        edges: Vec<(String, String)>,
        iris: HashMap<String, String>,
        root: Option<&str>,
    ) -> Result<Self> {
        let load_err = |reason: String| Error::OntologyLoad {
            source_name: source_name.clone(),
            reason,
        };

        let mut parents_of: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut children_of: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (child, parent) in &edges {
            parents_of.entry(child).or_default().insert(parent);
            parents_of.entry(parent).or_default();
            children_of.entry(parent).or_default().insert(child);
        }

        let root_name = match root {
            Some(r) => {
                let r = normalize_label(r);
                if !parents_of.contains_key(r.as_str()) {
                    return Err(load_err(format!("root node `{}` not found", r)));
                }
                r
            }
            None => {
                let candidates: Vec<&str> = parents_of
                    .iter()
                    .filter(|(_, ps)| ps.is_empty())
                    .map(|(n, _)| *n)
                    .collect();
                match candidates.as_slice() {
                    [single] => single.to_string(),
                    [] => return Err(load_err("no discoverable root".to_string())),
                    many => {
                        return Err(load_err(format!(
                            "ambiguous root, candidates: {}",
                            many.join(", ")
                        )))
                    }
                }
            }
        };

        // keep the sub-DAG reachable from the root via child edges
        let mut kept: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        kept.insert(root_name.as_str());
        queue.push_back(root_name.as_str());
        while let Some(n) = queue.pop_front() {
            if let Some(children) = children_of.get(n) {
                for c in children {
                    if kept.insert(c) {
                        queue.push_back(c);
                    }
                }
            }
        }
        let dropped = parents_of.len() - kept.len();
        if dropped > 0 {
            debug!("{} classes are not below root `{}`", dropped, root_name);
        }

        let mut graph: DiGraph<OntologyNode, ()> = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();
        // BTreeSet iteration keeps node indices deterministic
        for name in &kept {
            let node = OntologyNode {
                name: name.to_string(),
                iri: iris.get(*name).cloned(),
                parents: BTreeSet::new(),
                children: BTreeSet::new(),
                depth: 0,
            };
            index.insert(name.to_string(), graph.add_node(node));
        }
        for name in &kept {
            if *name == root_name {
                continue;
            }
            for parent in &parents_of[name] {
                if let Some(&p) = index.get(*parent) {
                    graph.add_edge(index[*name], p, ());
                }
            }
        }
        let root_ix = index[&root_name];
        if !parents_of[root_name.as_str()].is_empty() {
            warn!("Root `{}` has parents; they are ignored", root_name);
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            load_err(format!(
                "is-a cycle through `{}`",
                graph[cycle.node_id()].name
            ))
        })?;

        let n = graph.node_count();
        let mut children: Vec<Vec<NodeIndex>> = vec![Vec::new(); n];
        let mut ancestor_sets: Vec<HashSet<NodeIndex>> = vec![HashSet::new(); n];
        let mut depths: Vec<usize> = vec![0; n];
        // toposort puts children before parents; walk it backwards so every
        // parent is finished before its children
        for &ix in order.iter().rev() {
            let parents: Vec<NodeIndex> = graph
                .neighbors_directed(ix, Direction::Outgoing)
                .collect();
            let mut set = HashSet::new();
            let mut depth = 0;
            for p in parents {
                set.insert(p);
                set.extend(ancestor_sets[p.index()].iter().copied());
                depth = depth.max(depths[p.index()] + 1);
                children[p.index()].push(ix);
            }
            ancestor_sets[ix.index()] = set;
            depths[ix.index()] = depth;
        }

        for list in children.iter_mut() {
            list.sort_by(|a, b| graph[*a].name.cmp(&graph[*b].name));
        }
        let ancestors: Vec<Vec<NodeIndex>> = ancestor_sets
            .iter()
            .map(|set| {
                let mut list: Vec<NodeIndex> = set.iter().copied().collect();
                list.sort_by(|a, b| {
                    depths[b.index()]
                        .cmp(&depths[a.index()])
                        .then_with(|| graph[*a].name.cmp(&graph[*b].name))
                });
                list
            })
            .collect();

        for ix in graph.node_indices().collect::<Vec<_>>() {
            let parent_names: BTreeSet<String> = graph
                .neighbors_directed(ix, Direction::Outgoing)
                .map(|p| graph[p].name.clone())
                .collect();
            let child_names: BTreeSet<String> = children[ix.index()]
                .iter()
                .map(|c| graph[*c].name.clone())
                .collect();
            let node = &mut graph[ix];
            node.parents = parent_names;
            node.children = child_names;
            node.depth = depths[ix.index()];
        }

        info!(
            "Built ontology tree from {} with {} classes rooted at `{}`",
            source_name, n, root_name
        );
        Ok(Self {
            source_name,
            root: root_ix,
            graph,
            index,
            children,
            ancestors,
            ancestor_sets,
        })
    }

    fn lookup(&self, name: &str) -> Option<NodeIndex> {
        self.index
            .get(name)
            .or_else(|| self.index.get(&normalize_label(name)))
            .copied()
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn root(&self) -> &str {
        &self.graph[self.root].name
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&OntologyNode> {
        self.lookup(name).map(|ix| &self.graph[ix])
    }

    /// All class names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.index.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Ancestors of `name`, nearest first, root last. `None` for unknown classes.
    pub fn ancestors(&self, name: &str) -> Option<Vec<&str>> {
        let ix = self.lookup(name)?;
        Some(
            self.ancestors[ix.index()]
                .iter()
                .map(|a| self.graph[*a].name.as_str())
                .collect(),
        )
    }

    /// `name` followed by its ancestors.
    pub fn lineage(&self, name: &str) -> Option<Vec<&str>> {
        let ix = self.lookup(name)?;
        let mut out = vec![self.graph[ix].name.as_str()];
        out.extend(
            self.ancestors[ix.index()]
                .iter()
                .map(|a| self.graph[*a].name.as_str()),
        );
        Some(out)
    }

    /// Lazily walks everything below `name`. Calling again restarts the walk.
    pub fn descendants(&self, name: &str) -> Option<Descendants<'_>> {
        let ix = self.lookup(name)?;
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        for c in &self.children[ix.index()] {
            if seen.insert(*c) {
                queue.push_back(*c);
            }
        }
        Some(Descendants {
            tree: self,
            queue,
            seen,
        })
    }

    /// True when `ancestor` is a strict ancestor of `node`.
    pub fn is_ancestor(&self, ancestor: &str, node: &str) -> bool {
        match (self.lookup(ancestor), self.lookup(node)) {
            (Some(a), Some(n)) => self.ancestor_sets[n.index()].contains(&a),
            _ => false,
        }
    }

    /// Classes without children.
    pub fn leaves(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .graph
            .node_indices()
            .filter(|ix| self.children[ix.index()].is_empty())
            .map(|ix| self.graph[ix].name.as_str())
            .collect();
        out.sort_unstable();
        out
    }

    /// Longest is-a path from the root.
    pub fn depth(&self) -> usize {
        self.graph
            .node_weights()
            .map(|n| n.depth)
            .max()
            .unwrap_or(0)
    }

    /// Largest number of direct children of any class.
    pub fn width(&self) -> usize {
        self.children.iter().map(|c| c.len()).max().unwrap_or(0)
    }

    fn edges(&self) -> Vec<(String, String)> {
        self.graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(c, p)| (self.graph[c].name.clone(), self.graph[p].name.clone()))
            .collect()
    }

    fn iris(&self) -> HashMap<String, String> {
        self.graph
            .node_weights()
            .filter_map(|n| n.iri.clone().map(|iri| (n.name.clone(), iri)))
            .collect()
    }

    /// Splices the part of `tail` below `tail_join_node` onto `head_join_node`.
    /// The tail join class is identified with the head join class. Both join
    /// classes are validated first; on any failure `self` is left untouched.
    pub fn join(
        &mut self,
        tail: &OntologyTree,
        head_join_node: &str,
        tail_join_node: &str,
    ) -> Result<()> {
        let join_err = |reason: String| Error::OntologyJoin {
            tail: tail.source_name.clone(),
            reason,
        };
        let head_ix = self
            .lookup(head_join_node)
            .ok_or_else(|| join_err(format!("head join node `{}` not found", head_join_node)))?;
        let tail_ix = tail
            .lookup(tail_join_node)
            .ok_or_else(|| join_err(format!("tail join node `{}` not found", tail_join_node)))?;
        let head_name = self.graph[head_ix].name.clone();
        let tail_name = tail.graph[tail_ix].name.clone();

        let below: HashSet<&str> = tail
            .descendants(&tail_name)
            .map(|d| d.collect())
            .unwrap_or_default();
        let mut edges = self.edges();
        let mut iris = tail.iris();
        iris.remove(&tail_name);
        for name in &below {
            if let Some(node) = tail.get(name) {
                for parent in &node.parents {
                    if *parent == tail_name {
                        edges.push((name.to_string(), head_name.clone()));
                    } else if below.contains(parent.as_str()) {
                        edges.push((name.to_string(), parent.clone()));
                    }
                }
            }
        }
        // head IRIs win on name collisions
        iris.extend(self.iris());

        let root = self.root().to_string();
        let joined = Self::build(self.source_name.clone(), edges, iris, Some(&root))
            .map_err(|e| join_err(e.to_string()))?;
        info!(
            "Spliced {} classes from {} below `{}`",
            below.len(),
            tail.source_name,
            head_name
        );
        *self = joined;
        Ok(())
    }

    /// Indented text figure of the hierarchy. Classes with several parents
    /// appear under each of them.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(self.root());
        out.push('\n');
        self.render_children(self.root, "", &mut out);
        out
    }

    fn render_children(&self, ix: NodeIndex, prefix: &str, out: &mut String) {
        let children = &self.children[ix.index()];
        for (i, c) in children.iter().enumerate() {
            let last = i + 1 == children.len();
            out.push_str(prefix);
            out.push_str(if last { "└── " } else { "├── " });
            out.push_str(&self.graph[*c].name);
            out.push('\n');
            let next = format!("{}{}", prefix, if last { "    " } else { "│   " });
            self.render_children(*c, &next, out);
        }
    }

    /// GraphViz representation; edges point from child to parent.
    pub fn to_dot(&self) -> String {
        let named = self.graph.map(|_, n| n.name.clone(), |_, _| "");
        format!("{}", Dot::with_config(&named, &[DotConfig::EdgeNoLabel]))
    }
}

/// Breadth-first walk below a class. Cloning yields an independent walk.
#[derive(Clone)]
pub struct Descendants<'a> {
    tree: &'a OntologyTree,
    queue: VecDeque<NodeIndex>,
    seen: HashSet<NodeIndex>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let ix = self.queue.pop_front()?;
        for c in &self.tree.children[ix.index()] {
            if self.seen.insert(*c) {
                self.queue.push_back(*c);
            }
        }
        Some(self.tree.graph[ix].name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_tree() -> OntologyTree {
        OntologyTree::from_edges(
            vec![
                ("B", "A"),
                ("C", "A"),
                ("D", "B"),
                ("E", "B"),
                ("F", "C"),
                ("G", "C"),
                ("H", "E"),
                ("I", "G"),
            ],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_tree_figure() {
        let tree = example_tree();
        assert_eq!(tree.root(), "a");
        assert_eq!(tree.width(), 2);
        assert_eq!(tree.depth(), 3);
        let figure = tree.render();
        assert!(figure.starts_with("a\n├── b\n"));
        assert!(figure.contains("│   └── e\n│       └── h\n"));
    }

    #[test]
    fn test_source_from_str() {
        let url = OntologySource::from_str("https://w3id.org/biolink/biolink-model.owl.ttl");
        let file = OntologySource::from_str("file:///tmp/onto.ttl");
        assert!(url.is_url());
        assert!(file.is_file());
        assert_eq!(file.to_string(), "file:///tmp/onto.ttl");
    }

    #[test]
    fn test_offline_url_refused() {
        let url = OntologySource::from_str("https://example.org/onto.ttl");
        assert!(matches!(url.graph(true), Err(Error::OfflineRetrieval { .. })));
    }

    #[test]
    fn test_cycle_rejected() {
        let result = OntologyTree::from_edges(
            vec![("b", "a"), ("c", "b"), ("d", "c"), ("b", "d")],
            Some("a"),
        );
        assert!(matches!(result, Err(Error::OntologyLoad { .. })));
    }

    #[test]
    fn test_ambiguous_root() {
        let result = OntologyTree::from_edges(vec![("b", "a"), ("d", "c")], None);
        assert!(matches!(result, Err(Error::OntologyLoad { .. })));
    }

    #[test]
    fn test_dot_lists_classes() {
        let dot = example_tree().to_dot();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("\"h\""));
    }
}
