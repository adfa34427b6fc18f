//! # Pathway Graph
//!
//! Directed multigraph of typed biological entities.
//!
//! ## Key Components
//!
//! - **Node**: an entity (gene, micro-RNA, compound) keyed by its `id`. Equality
//!   and hashing only consider the id.
//! - **Edge**: an ordered `(source, target)` pair carrying one or more
//!   [`EdgeDetail`]s, so several relation kinds between the same two entities
//!   live on a single edge.
//! - **Graph**: O(1) id lookup, case-insensitive alias lookup, forward and
//!   reverse adjacency, an ordered endpoint list and a cached structural digest.
//!
//! ## Traversal
//!
//! [`Graph::traverse`] is an explicit-stack depth-first search. The action
//! callback decides for every reached node whether to expand it
//! ([`TraversalAction::Continue`]), keep it without expanding
//! ([`TraversalAction::Prune`]) or end the walk ([`TraversalAction::Stop`]).
//!
//! ## Example
//!
//! ```rust
//! use metapath_core::engine::graph::*;
//!
//! let mut g = Graph::new();
//! g.add_node(Node::new("a", "A", NodeType::Gene));
//! g.add_node(Node::new("b", "B", NodeType::Gene));
//! g.add_edge(Edge::new("a", "b", EdgeDetail::new(EdgeType::Pprel, EdgeSubtype::Activation)))
//!     .unwrap();
//! assert_eq!(g.downstream("a", true, |_, _| TraversalAction::Continue).len(), 1);
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::engine::errors::EngineError;

/// Shared, cheaply clonable node identifier.
pub type NodeKey = Arc<str>;

/// Category of a biological entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeType {
    Gene,
    Mirna,
    Compound,
    Other,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Gene => "gene",
            NodeType::Mirna => "mirna",
            NodeType::Compound => "compound",
            NodeType::Other => "other",
        }
    }
}

impl FromStr for NodeType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "gene" | "protein" => NodeType::Gene,
            "mirna" | "microrna" | "mi_rna" => NodeType::Mirna,
            "compound" | "chemical" => NodeType::Compound,
            _ => NodeType::Other,
        })
    }
}

/// A typed entity of a pathway.
///
/// Nodes are immutable once built; two nodes are equal when their ids are.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeKey,
    name: String,
    aliases: SmallVec<[String; 2]>,
    node_type: NodeType,
}

impl Node {
    pub fn new(id: impl Into<NodeKey>, name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            aliases: SmallVec::new(),
            node_type,
        }
    }

    /// Returns the node with the given alternate identifiers attached.
    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> &NodeKey {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    /// Every string this node can be looked up by: id, name and aliases.
    fn lookup_terms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_ref())
            .chain(std::iter::once(self.name.as_str()))
            .chain(self.aliases.iter().map(String::as_str))
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Database-level class of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeType {
    /// Enzyme-enzyme relation.
    Ecrel,
    /// Protein-protein interaction.
    Pprel,
    /// Gene expression interaction.
    Gerel,
    /// Protein-compound interaction.
    Pcrel,
    MirnaTarget,
    TfTarget,
    Maplink,
    Other,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Ecrel => "ecrel",
            EdgeType::Pprel => "pprel",
            EdgeType::Gerel => "gerel",
            EdgeType::Pcrel => "pcrel",
            EdgeType::MirnaTarget => "mirna_target",
            EdgeType::TfTarget => "tf_target",
            EdgeType::Maplink => "maplink",
            EdgeType::Other => "other",
        }
    }
}

impl FromStr for EdgeType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "ecrel" => EdgeType::Ecrel,
            "pprel" => EdgeType::Pprel,
            "gerel" => EdgeType::Gerel,
            "pcrel" => EdgeType::Pcrel,
            "mirna_target" | "mirna" => EdgeType::MirnaTarget,
            "tf_target" | "tf" => EdgeType::TfTarget,
            "maplink" => EdgeType::Maplink,
            _ => EdgeType::Other,
        })
    }
}

/// Relation kind carried by an edge detail.
///
/// Each subtype has a signed default weight and a priority. When two pathways
/// disagree on the relation between the same pair of entities, merging with
/// priority keeps only the highest-priority kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeSubtype {
    Activation,
    Inhibition,
    Expression,
    Repression,
    MirnaInhibition,
    TfActivation,
    TfInhibition,
    Phosphorylation,
    Dephosphorylation,
    Ubiquitination,
    Glycosylation,
    Methylation,
    IndirectEffect,
    StateChange,
    BindingAssociation,
    Dissociation,
    Compound,
    MissingInteraction,
    Unknown,
}

impl EdgeSubtype {
    /// Signed contribution of this relation kind.
    pub fn weight(&self) -> f64 {
        match self {
            EdgeSubtype::Activation | EdgeSubtype::Expression | EdgeSubtype::TfActivation => 1.0,
            EdgeSubtype::Inhibition
            | EdgeSubtype::Repression
            | EdgeSubtype::MirnaInhibition
            | EdgeSubtype::TfInhibition => -1.0,
            _ => 0.0,
        }
    }

    pub fn priority(&self) -> u8 {
        match self {
            EdgeSubtype::Activation
            | EdgeSubtype::Inhibition
            | EdgeSubtype::Expression
            | EdgeSubtype::Repression
            | EdgeSubtype::MirnaInhibition
            | EdgeSubtype::TfActivation
            | EdgeSubtype::TfInhibition => 3,
            EdgeSubtype::Phosphorylation
            | EdgeSubtype::Dephosphorylation
            | EdgeSubtype::Ubiquitination
            | EdgeSubtype::Glycosylation
            | EdgeSubtype::Methylation => 2,
            EdgeSubtype::IndirectEffect
            | EdgeSubtype::StateChange
            | EdgeSubtype::BindingAssociation
            | EdgeSubtype::Dissociation
            | EdgeSubtype::Compound => 1,
            EdgeSubtype::MissingInteraction | EdgeSubtype::Unknown => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeSubtype::Activation => "activation",
            EdgeSubtype::Inhibition => "inhibition",
            EdgeSubtype::Expression => "expression",
            EdgeSubtype::Repression => "repression",
            EdgeSubtype::MirnaInhibition => "mirna_inhibition",
            EdgeSubtype::TfActivation => "tf_activation",
            EdgeSubtype::TfInhibition => "tf_inhibition",
            EdgeSubtype::Phosphorylation => "phosphorylation",
            EdgeSubtype::Dephosphorylation => "dephosphorylation",
            EdgeSubtype::Ubiquitination => "ubiquitination",
            EdgeSubtype::Glycosylation => "glycosylation",
            EdgeSubtype::Methylation => "methylation",
            EdgeSubtype::IndirectEffect => "indirect_effect",
            EdgeSubtype::StateChange => "state_change",
            EdgeSubtype::BindingAssociation => "binding_association",
            EdgeSubtype::Dissociation => "dissociation",
            EdgeSubtype::Compound => "compound",
            EdgeSubtype::MissingInteraction => "missing_interaction",
            EdgeSubtype::Unknown => "unknown",
        }
    }
}

impl FromStr for EdgeSubtype {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-', '/'], "_");
        Ok(match normalized.as_str() {
            "activation" => EdgeSubtype::Activation,
            "inhibition" => EdgeSubtype::Inhibition,
            "expression" => EdgeSubtype::Expression,
            "repression" => EdgeSubtype::Repression,
            "mirna_inhibition" => EdgeSubtype::MirnaInhibition,
            "tf_activation" => EdgeSubtype::TfActivation,
            "tf_inhibition" => EdgeSubtype::TfInhibition,
            "phosphorylation" => EdgeSubtype::Phosphorylation,
            "dephosphorylation" => EdgeSubtype::Dephosphorylation,
            "ubiquitination" => EdgeSubtype::Ubiquitination,
            "glycosylation" => EdgeSubtype::Glycosylation,
            "methylation" => EdgeSubtype::Methylation,
            "indirect_effect" => EdgeSubtype::IndirectEffect,
            "state_change" => EdgeSubtype::StateChange,
            "binding_association" | "binding" => EdgeSubtype::BindingAssociation,
            "dissociation" => EdgeSubtype::Dissociation,
            "compound" => EdgeSubtype::Compound,
            "missing_interaction" => EdgeSubtype::MissingInteraction,
            _ => EdgeSubtype::Unknown,
        })
    }
}

/// One relation kind between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeDetail {
    pub edge_type: EdgeType,
    pub subtype: EdgeSubtype,
}

impl EdgeDetail {
    pub fn new(edge_type: EdgeType, subtype: EdgeSubtype) -> Self {
        Self { edge_type, subtype }
    }
}

/// A directed multi-relation edge between two nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    source: NodeKey,
    target: NodeKey,
    details: SmallVec<[EdgeDetail; 2]>,
}

impl Edge {
    pub fn new(source: impl Into<NodeKey>, target: impl Into<NodeKey>, detail: EdgeDetail) -> Self {
        let mut details = SmallVec::new();
        details.push(detail);
        Self {
            source: source.into(),
            target: target.into(),
            details,
        }
    }

    pub fn with_details<I>(source: impl Into<NodeKey>, target: impl Into<NodeKey>, details: I) -> Self
    where
        I: IntoIterator<Item = EdgeDetail>,
    {
        Self {
            source: source.into(),
            target: target.into(),
            details: details.into_iter().collect(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn source_key(&self) -> &NodeKey {
        &self.source
    }

    pub fn target_key(&self) -> &NodeKey {
        &self.target
    }

    pub fn details(&self) -> &[EdgeDetail] {
        &self.details
    }

    /// Highest subtype priority among the details, 0 for a detail-less edge.
    pub fn max_priority(&self) -> u8 {
        self.details
            .iter()
            .map(|d| d.subtype.priority())
            .max()
            .unwrap_or(0)
    }

    /// Appends the details of `other` to this edge.
    ///
    /// With `allow_duplicates == false` details already present are skipped.
    /// With `use_priority == true` only details whose subtype priority equals
    /// the maximum observed priority survive.
    pub fn merge(&mut self, other: &Edge, use_priority: bool, allow_duplicates: bool) {
        for detail in &other.details {
            if allow_duplicates || !self.details.contains(detail) {
                self.details.push(*detail);
            }
        }
        if use_priority {
            let max = self.max_priority();
            self.details.retain(|d| d.subtype.priority() == max);
        }
    }

    /// Same edge with source and target swapped.
    pub fn reversed(&self) -> Edge {
        Edge {
            source: self.target.clone(),
            target: self.source.clone(),
            details: self.details.clone(),
        }
    }

    /// Returns a copy of this edge connecting different endpoints.
    pub fn relinked(&self, source: NodeKey, target: NodeKey) -> Edge {
        Edge {
            source,
            target,
            details: self.details.clone(),
        }
    }
}

/// Decision returned by traversal callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalAction {
    /// Keep the node and expand its neighbours.
    Continue,
    /// Keep the node but do not expand past it.
    Prune,
    /// Keep the node and end the traversal.
    Stop,
}

/// Direction followed by a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow outgoing edges.
    Downstream,
    /// Follow incoming edges.
    Upstream,
}

/// Directed multigraph over [`Node`]s.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: FxHashMap<NodeKey, Node>,
    /// Lowercased id/name/alias -> node ids
    aliases: FxHashMap<String, SmallVec<[NodeKey; 1]>>,
    outgoing: FxHashMap<NodeKey, FxHashMap<NodeKey, Edge>>,
    incoming: FxHashMap<NodeKey, FxHashSet<NodeKey>>,
    edge_count: usize,
    endpoints: Vec<NodeKey>,
    digest: OnceLock<String>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    fn invalidate(&mut self) {
        self.digest = OnceLock::new();
    }

    /// Adds a node. Returns `false` and keeps the existing node when the id is taken.
    pub fn add_node(&mut self, node: Node) -> bool {
        if self.nodes.contains_key(node.key()) {
            return false;
        }
        let key = node.key().clone();
        for term in node.lookup_terms() {
            let slot = self.aliases.entry(term.to_lowercase()).or_default();
            if !slot.contains(&key) {
                slot.push(key.clone());
            }
        }
        self.outgoing.entry(key.clone()).or_default();
        self.incoming.entry(key.clone()).or_default();
        self.nodes.insert(key, node);
        self.invalidate();
        true
    }

    /// Removes a node together with every incident edge.
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let (key, node) = self.nodes.remove_entry(id)?;
        if let Some(out) = self.outgoing.remove(&key) {
            for target in out.keys() {
                if let Some(preds) = self.incoming.get_mut(target) {
                    preds.remove(&key);
                }
            }
            self.edge_count -= out.len();
        }
        if let Some(preds) = self.incoming.remove(&key) {
            for source in preds {
                if let Some(out) = self.outgoing.get_mut(&source) {
                    if out.remove(&key).is_some() {
                        self.edge_count -= 1;
                    }
                }
            }
        }
        for term in node.lookup_terms() {
            let term = term.to_lowercase();
            if let Some(slot) = self.aliases.get_mut(&term) {
                slot.retain(|k| *k != key);
                if slot.is_empty() {
                    self.aliases.remove(&term);
                }
            }
        }
        self.endpoints.retain(|e| *e != key);
        self.invalidate();
        Some(node)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Resolves an id, name or alias (case-insensitive) to a node.
    ///
    /// Exact id matches win; otherwise the first node registered under the
    /// term is returned.
    pub fn find_by_alias(&self, term: &str) -> Option<&Node> {
        if let Some(node) = self.nodes.get(term) {
            return Some(node);
        }
        self.aliases
            .get(&term.to_lowercase())
            .and_then(|ids| ids.first())
            .and_then(|id| self.nodes.get(id))
    }

    /// Every node registered under the term.
    pub fn find_all_by_alias(&self, term: &str) -> Vec<&Node> {
        self.aliases
            .get(&term.to_lowercase())
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Node ids in lexicographic order, the canonical order used for matrices.
    pub fn sorted_node_ids(&self) -> Vec<NodeKey> {
        let mut ids: Vec<NodeKey> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Adds an edge, merging details into an existing edge between the same pair.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), EngineError> {
        self.merge_edge(edge, false, false)
    }

    /// Adds an edge; when the pair is already connected the details are merged
    /// with [`Edge::merge`] semantics.
    pub fn merge_edge(
        &mut self,
        edge: Edge,
        use_priority: bool,
        allow_duplicates: bool,
    ) -> Result<(), EngineError> {
        let source = self.resolve_key(edge.source())?;
        let target = self.resolve_key(edge.target())?;
        let out = self.outgoing.entry(source.clone()).or_default();
        match out.get_mut(&target) {
            Some(existing) => existing.merge(&edge, use_priority, allow_duplicates),
            None => {
                let mut edge = edge.relinked(source.clone(), target.clone());
                if use_priority {
                    let max = edge.max_priority();
                    edge.details.retain(|d| d.subtype.priority() == max);
                }
                out.insert(target.clone(), edge);
                self.incoming.entry(target).or_default().insert(source);
                self.edge_count += 1;
            }
        }
        self.invalidate();
        Ok(())
    }

    fn resolve_key(&self, id: &str) -> Result<NodeKey, EngineError> {
        self.nodes
            .get_key_value(id)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| EngineError::Graph(format!("edge endpoint '{}' is not a node", id)))
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&Edge> {
        self.outgoing.get(source).and_then(|out| out.get(target))
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.outgoing.values().flat_map(|out| out.values())
    }

    /// Edges sorted by `(source, target)`.
    pub fn sorted_edges(&self) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.edges().collect();
        edges.sort_by(|a, b| (a.source(), a.target()).cmp(&(b.source(), b.target())));
        edges
    }

    pub fn outgoing_edges(&self, id: &str) -> impl Iterator<Item = &Edge> {
        self.outgoing.get(id).into_iter().flat_map(|out| out.values())
    }

    pub fn ingoing_edges(&self, id: &str) -> impl Iterator<Item = &Edge> + '_ {
        let key: Option<NodeKey> = self.nodes.get_key_value(id).map(|(k, _)| k.clone());
        self.incoming
            .get(id)
            .into_iter()
            .flat_map(|preds| preds.iter())
            .filter_map(move |source| {
                let key = key.as_ref()?;
                self.outgoing.get(source).and_then(|out| out.get(key))
            })
    }

    pub fn out_degree(&self, id: &str) -> usize {
        self.outgoing.get(id).map_or(0, |out| out.len())
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.incoming.get(id).map_or(0, |preds| preds.len())
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<NodeKey> {
        let mut next: Vec<NodeKey> = match direction {
            Direction::Downstream => self
                .outgoing
                .get(id)
                .map(|out| out.keys().cloned().collect())
                .unwrap_or_default(),
            Direction::Upstream => self
                .incoming
                .get(id)
                .map(|preds| preds.iter().cloned().collect())
                .unwrap_or_default(),
        };
        // Reverse order so the smallest id is popped first.
        next.sort_unstable_by(|a, b| b.cmp(a));
        next
    }

    /// Marks a node as a legitimate terminal sink of the pathway.
    pub fn add_endpoint(&mut self, id: &str) -> Result<(), EngineError> {
        let key = self.resolve_key(id)?;
        if !self.endpoints.contains(&key) {
            self.endpoints.push(key);
            self.invalidate();
        }
        Ok(())
    }

    pub fn endpoints(&self) -> &[NodeKey] {
        &self.endpoints
    }

    /// Explicit-stack depth-first traversal starting next to `start`.
    ///
    /// The start node itself is only reported when a cycle leads back to it in
    /// unmarked mode. With `mark == true` every node is handed to `action` at
    /// most once; without marking, nodes already in the result are skipped when
    /// popped. `action` receives the node and its depth (1 for direct
    /// neighbours).
    pub fn traverse<F>(
        &self,
        start: &str,
        direction: Direction,
        mark: bool,
        mut action: F,
    ) -> Vec<NodeKey>
    where
        F: FnMut(&Node, usize) -> TraversalAction,
    {
        let Some(start) = self.nodes.get_key_value(start).map(|(k, _)| k.clone()) else {
            return Vec::new();
        };
        let mut results: Vec<NodeKey> = Vec::new();
        let mut in_results: FxHashSet<NodeKey> = FxHashSet::default();
        let mut visited: FxHashSet<NodeKey> = FxHashSet::default();
        let mut stack: Vec<(NodeKey, usize)> = Vec::new();

        if mark {
            visited.insert(start.clone());
        }
        for next in self.neighbors(&start, direction) {
            if !mark || visited.insert(next.clone()) {
                stack.push((next, 1));
            }
        }

        while let Some((current, depth)) = stack.pop() {
            if !mark && in_results.contains(&current) {
                continue;
            }
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            let decision = action(node, depth);
            in_results.insert(current.clone());
            results.push(current.clone());
            match decision {
                TraversalAction::Stop => break,
                TraversalAction::Prune => continue,
                TraversalAction::Continue => {
                    for next in self.neighbors(&current, direction) {
                        let fresh = if mark {
                            visited.insert(next.clone())
                        } else {
                            !in_results.contains(&next)
                        };
                        if fresh {
                            stack.push((next, depth + 1));
                        }
                    }
                }
            }
        }
        results
    }

    pub fn downstream<F>(&self, start: &str, mark: bool, action: F) -> Vec<NodeKey>
    where
        F: FnMut(&Node, usize) -> TraversalAction,
    {
        self.traverse(start, Direction::Downstream, mark, action)
    }

    pub fn upstream<F>(&self, start: &str, mark: bool, action: F) -> Vec<NodeKey>
    where
        F: FnMut(&Node, usize) -> TraversalAction,
    {
        self.traverse(start, Direction::Upstream, mark, action)
    }

    /// Breadth-first hop distance from the closest of `sources` following
    /// outgoing edges. Unreachable nodes are absent from the map.
    pub fn distances_from<'a, I>(&self, sources: I) -> FxHashMap<NodeKey, usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut distances: FxHashMap<NodeKey, usize> = FxHashMap::default();
        let mut queue: VecDeque<NodeKey> = VecDeque::new();
        for source in sources {
            if let Some((key, _)) = self.nodes.get_key_value(source) {
                if distances.insert(key.clone(), 0).is_none() {
                    queue.push_back(key.clone());
                }
            }
        }
        while let Some(current) = queue.pop_front() {
            let next_distance = distances[&current] + 1;
            if let Some(out) = self.outgoing.get(&current) {
                for target in out.keys() {
                    if !distances.contains_key(target) {
                        distances.insert(target.clone(), next_distance);
                        queue.push_back(target.clone());
                    }
                }
            }
        }
        distances
    }

    /// New graph with every edge direction flipped. Endpoints are kept.
    pub fn reversed(&self) -> Graph {
        let mut out = Graph::new();
        for id in self.sorted_node_ids() {
            out.add_node(self.nodes[&id].clone());
        }
        for edge in self.sorted_edges() {
            // Both endpoints exist in `out`, so resolution cannot fail.
            let added = out.add_edge(edge.reversed());
            debug_assert!(added.is_ok(), "reversed edge lost: {:?}", added);
        }
        out.endpoints = self.endpoints.clone();
        out
    }

    /// Hex blake3 digest of the graph structure (nodes, edges, endpoints).
    ///
    /// Computed lazily and cached until the next mutation.
    pub fn digest(&self) -> &str {
        self.digest.get_or_init(|| {
            let mut hasher = blake3::Hasher::new();
            for id in self.sorted_node_ids() {
                let node = &self.nodes[&id];
                hasher.update(id.as_bytes());
                hasher.update(&[0]);
                hasher.update(node.name.as_bytes());
                hasher.update(&[0]);
                hasher.update(node.node_type.as_str().as_bytes());
                hasher.update(&[1]);
            }
            for edge in self.sorted_edges() {
                hasher.update(edge.source().as_bytes());
                hasher.update(&[0]);
                hasher.update(edge.target().as_bytes());
                for detail in edge.details() {
                    hasher.update(&[0]);
                    hasher.update(detail.edge_type.as_str().as_bytes());
                    hasher.update(detail.subtype.as_str().as_bytes());
                }
                hasher.update(&[2]);
            }
            let mut endpoints: Vec<&NodeKey> = self.endpoints.iter().collect();
            endpoints.sort();
            for endpoint in endpoints {
                hasher.update(endpoint.as_bytes());
                hasher.update(&[3]);
            }
            hasher.finalize().to_hex().to_string()
        })
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Graph({} nodes, {} edges, {} endpoints)",
            self.node_count(),
            self.edge_count(),
            self.endpoints.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn act() -> EdgeDetail {
        EdgeDetail::new(EdgeType::Pprel, EdgeSubtype::Activation)
    }

    fn inh() -> EdgeDetail {
        EdgeDetail::new(EdgeType::Pprel, EdgeSubtype::Inhibition)
    }

    fn chain(ids: &[&str]) -> Graph {
        let mut g = Graph::new();
        for id in ids {
            g.add_node(Node::new(*id, id.to_uppercase(), NodeType::Gene));
        }
        for pair in ids.windows(2) {
            g.add_edge(Edge::new(pair[0], pair[1], act())).unwrap();
        }
        g
    }

    #[test]
    fn nodes_compare_by_id_only() {
        let a = Node::new("x", "first", NodeType::Gene);
        let b = Node::new("x", "second", NodeType::Compound);
        assert_eq!(a, b);
    }

    #[test]
    fn alias_lookup_is_case_insensitive() {
        let mut g = Graph::new();
        g.add_node(Node::new("7157", "TP53", NodeType::Gene).with_aliases(["p53", "LFS1"]));
        assert_eq!(g.find_by_alias("tp53").map(Node::id), Some("7157"));
        assert_eq!(g.find_by_alias("P53").map(Node::id), Some("7157"));
        assert_eq!(g.find_by_alias("7157").map(Node::id), Some("7157"));
        assert!(g.find_by_alias("mdm2").is_none());
    }

    #[test]
    fn duplicate_edge_merges_details() {
        let mut g = chain(&["a", "b"]);
        g.add_edge(Edge::new(
            "a",
            "b",
            EdgeDetail::new(EdgeType::Pprel, EdgeSubtype::Phosphorylation),
        ))
        .unwrap();
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.edge("a", "b").unwrap().details().len(), 2);
    }

    #[test]
    fn edge_to_unknown_node_is_rejected() {
        let mut g = chain(&["a"]);
        let err = g.add_edge(Edge::new("a", "zzz", act())).unwrap_err();
        assert!(matches!(err, EngineError::Graph(_)));
    }

    #[test]
    fn priority_merge_drops_lower_priority_details() {
        let mut edge = Edge::new(
            "a",
            "b",
            EdgeDetail::new(EdgeType::Pprel, EdgeSubtype::BindingAssociation),
        );
        let other = Edge::with_details(
            "a",
            "b",
            [
                EdgeDetail::new(EdgeType::Pprel, EdgeSubtype::Inhibition),
                EdgeDetail::new(EdgeType::Pprel, EdgeSubtype::Phosphorylation),
            ],
        );
        edge.merge(&other, true, false);
        assert_eq!(
            edge.details(),
            &[EdgeDetail::new(EdgeType::Pprel, EdgeSubtype::Inhibition)]
        );
    }

    #[test]
    fn merge_without_duplicates_skips_known_details() {
        let mut edge = Edge::new("a", "b", act());
        edge.merge(&Edge::new("a", "b", act()), false, false);
        assert_eq!(edge.details().len(), 1);
        edge.merge(&Edge::new("a", "b", act()), false, true);
        assert_eq!(edge.details().len(), 2);
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let mut g = chain(&["a", "b", "c"]);
        g.add_endpoint("c").unwrap();
        g.remove_node("b").unwrap();
        assert_eq!(g.edge_count(), 0);
        assert_eq!(g.out_degree("a"), 0);
        assert_eq!(g.in_degree("c"), 0);
        assert!(g.find_by_alias("B").is_none());
        assert_eq!(g.endpoints().len(), 1);
    }

    #[test]
    fn traversal_follows_direction_and_actions() {
        let g = chain(&["a", "b", "c", "d"]);
        let down = g.downstream("a", true, |_, _| TraversalAction::Continue);
        assert_eq!(down.len(), 3);
        let up = g.upstream("d", true, |_, _| TraversalAction::Continue);
        assert_eq!(up.len(), 3);

        let pruned = g.downstream("a", true, |n, _| {
            if n.id() == "b" {
                TraversalAction::Prune
            } else {
                TraversalAction::Continue
            }
        });
        assert_eq!(pruned.iter().map(|k| k.as_ref()).collect::<Vec<_>>(), ["b"]);

        let stopped = g.downstream("a", false, |n, _| {
            if n.id() == "c" {
                TraversalAction::Stop
            } else {
                TraversalAction::Continue
            }
        });
        assert_eq!(stopped.len(), 2);
    }

    #[test]
    fn unmarked_traversal_terminates_on_cycles() {
        let mut g = chain(&["a", "b", "c"]);
        g.add_edge(Edge::new("c", "a", act())).unwrap();
        let mut calls = 0;
        let out = g.downstream("a", false, |_, _| {
            calls += 1;
            TraversalAction::Continue
        });
        assert_eq!(out.len(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn digest_changes_on_mutation() {
        let mut g = chain(&["a", "b"]);
        let before = g.digest().to_string();
        assert_eq!(before, chain(&["a", "b"]).digest());
        g.add_node(Node::new("c", "C", NodeType::Gene));
        assert_ne!(before, g.digest());
    }

    #[test]
    fn bfs_distances_from_many_sources() {
        let mut g = chain(&["a", "b", "c"]);
        g.add_node(Node::new("z", "Z", NodeType::Gene));
        let d = g.distances_from(["a", "b"]);
        assert_eq!(d["a"], 0);
        assert_eq!(d["b"], 0);
        assert_eq!(d["c"], 1);
        assert!(!d.contains_key("z"));
    }

    #[test]
    fn reversed_graph_flips_edges() {
        let g = chain(&["a", "b"]);
        let r = g.reversed();
        assert!(r.edge("b", "a").is_some());
        assert!(r.edge("a", "b").is_none());
    }

    #[test]
    fn reversing_a_cycle_keeps_every_edge_and_endpoint() {
        let mut g = chain(&["a", "b", "c"]);
        g.add_edge(Edge::new("b", "a", inh())).unwrap();
        g.add_endpoint("c").unwrap();
        let r = g.reversed();
        assert_eq!(r.edge_count(), g.edge_count());
        assert_eq!(r.edge("a", "b").unwrap().details(), &[inh()]);
        assert_eq!(r.edge("b", "a").unwrap().details(), &[act()]);
        assert!(r.edge("c", "b").is_some());
        assert_eq!(r.endpoints(), g.endpoints());
    }
}
