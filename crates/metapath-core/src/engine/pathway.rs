//! Pathways and pathway repositories.
//!
//! A [`Repository`] owns every pathway of an organism together with a
//! category index. Besides lookup it derives two companion repositories:
//!
//! - **decoys**: same topology, node identities replaced by random other
//!   identities from the node universe (null model for pathway structure);
//! - **inverted**: every edge reversed, used to walk from targets back to
//!   candidate sources.

use std::collections::{BTreeMap, BTreeSet};

use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::FxHashMap;

use crate::engine::errors::EngineError;
use crate::engine::graph::{Graph, Node, NodeKey};

/// A named pathway graph.
#[derive(Debug, Clone)]
pub struct Pathway {
    id: String,
    name: String,
    graph: Graph,
    categories: BTreeSet<String>,
    hidden: bool,
}

impl Pathway {
    pub fn new(id: impl Into<String>, name: impl Into<String>, graph: Graph) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            graph,
            categories: BTreeSet::new(),
            hidden: false,
        }
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories.extend(categories.into_iter().map(Into::into));
        self
    }

    /// Hidden pathways are excluded from per-pathway reporting.
    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn categories(&self) -> &BTreeSet<String> {
        &self.categories
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Copy of this pathway built over a different graph.
    fn with_graph(&self, graph: Graph) -> Pathway {
        Pathway {
            id: self.id.clone(),
            name: self.name.clone(),
            graph,
            categories: self.categories.clone(),
            hidden: self.hidden,
        }
    }
}

/// Collection of pathways keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Repository {
    pathways: BTreeMap<String, Pathway>,
    categories: BTreeMap<String, BTreeSet<String>>,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pathway. Pathway ids are unique within a repository.
    pub fn add(&mut self, pathway: Pathway) -> Result<(), EngineError> {
        if self.pathways.contains_key(pathway.id()) {
            return Err(EngineError::Graph(format!(
                "duplicate pathway id '{}'",
                pathway.id()
            )));
        }
        for category in pathway.categories() {
            self.categories
                .entry(category.clone())
                .or_default()
                .insert(pathway.id().to_string());
        }
        self.pathways.insert(pathway.id().to_string(), pathway);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Pathway> {
        self.pathways.get(id)
    }

    /// Pathways in id order.
    pub fn pathways(&self) -> impl Iterator<Item = &Pathway> {
        self.pathways.values()
    }

    pub fn len(&self) -> usize {
        self.pathways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pathways.is_empty()
    }

    pub fn category(&self, category: &str) -> Option<&BTreeSet<String>> {
        self.categories.get(category)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    /// Every distinct node of every pathway, first occurrence wins, sorted by id.
    pub fn node_universe(&self) -> Vec<Node> {
        let mut universe: BTreeMap<NodeKey, Node> = BTreeMap::new();
        for pathway in self.pathways.values() {
            for node in pathway.graph().nodes() {
                universe
                    .entry(node.key().clone())
                    .or_insert_with(|| node.clone());
            }
        }
        universe.into_values().collect()
    }

    /// Hex blake3 digest over pathway ids, names, categories and graph digests.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for pathway in self.pathways.values() {
            hasher.update(pathway.id().as_bytes());
            hasher.update(&[0]);
            hasher.update(pathway.name().as_bytes());
            hasher.update(&[0]);
            for category in pathway.categories() {
                hasher.update(category.as_bytes());
                hasher.update(&[1]);
            }
            hasher.update(&[pathway.is_hidden() as u8]);
            hasher.update(pathway.graph().digest().as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Builds a decoy repository.
    ///
    /// Every pathway keeps its id, categories and edge structure (including
    /// details), but each node is replaced by a distinct, uniformly drawn node
    /// of the universe that differs from the node it replaces.
    pub fn decoys<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Repository, EngineError> {
        let universe = self.node_universe();
        let mut out = Repository::new();
        for pathway in self.pathways.values() {
            let mapping = decoy_mapping(pathway.graph(), &universe, rng)?;
            let graph = relabel(pathway.graph(), &mapping)?;
            out.add(pathway.with_graph(graph))?;
        }
        Ok(out)
    }

    /// Repository with every edge direction flipped.
    pub fn inverted(&self) -> Repository {
        let mut out = Repository::new();
        for pathway in self.pathways.values() {
            out.pathways.insert(
                pathway.id().to_string(),
                pathway.with_graph(pathway.graph().reversed()),
            );
        }
        out.categories = self.categories.clone();
        out
    }
}

/// Draws an injective old-id -> universe-node map where no node maps to itself.
fn decoy_mapping<R: Rng + ?Sized>(
    graph: &Graph,
    universe: &[Node],
    rng: &mut R,
) -> Result<FxHashMap<NodeKey, Node>, EngineError> {
    let ids = graph.sorted_node_ids();
    if !ids.is_empty() && universe.len() < 2 {
        return Err(EngineError::Graph(
            "cannot build a decoy from a single-node universe".into(),
        ));
    }

    let mut pool: Vec<&Node> = universe.iter().collect();
    pool.shuffle(rng);

    let mut assigned: Vec<(NodeKey, usize)> = Vec::with_capacity(ids.len());
    let mut used = vec![false; pool.len()];
    let mut cursor = 0usize;
    for id in &ids {
        let pick = (cursor..pool.len())
            .chain(0..cursor)
            .find(|&i| !used[i] && pool[i].key() != id);
        match pick {
            Some(i) => {
                used[i] = true;
                cursor = i + 1;
                assigned.push((id.clone(), i));
            }
            None => {
                // Only the node itself is left: swap with an earlier assignment
                // whose original id differs from our leftover candidate.
                let own = (0..pool.len())
                    .find(|&i| !used[i])
                    .ok_or_else(|| EngineError::Internal("decoy pool exhausted".into()))?;
                let swap = assigned
                    .iter()
                    .position(|(orig, slot)| pool[own].key() != orig && pool[*slot].key() != id)
                    .ok_or_else(|| EngineError::Internal("no decoy derangement".into()))?;
                let taken = assigned[swap].1;
                assigned[swap].1 = own;
                used[own] = true;
                assigned.push((id.clone(), taken));
            }
        }
    }

    Ok(assigned
        .into_iter()
        .map(|(id, slot)| (id, pool[slot].clone()))
        .collect())
}

fn relabel(graph: &Graph, mapping: &FxHashMap<NodeKey, Node>) -> Result<Graph, EngineError> {
    let mut out = Graph::new();
    for id in graph.sorted_node_ids() {
        out.add_node(mapping[&id].clone());
    }
    for edge in graph.sorted_edges() {
        let source = mapping[edge.source_key()].key().clone();
        let target = mapping[edge.target_key()].key().clone();
        out.merge_edge(edge.relinked(source, target), false, true)?;
    }
    for endpoint in graph.endpoints() {
        out.add_endpoint(mapping[endpoint].id())?;
    }
    Ok(out)
}
