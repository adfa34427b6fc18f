//! Metapathway construction.
//!
//! Merging every selected pathway into one graph lets the propagation matrix be
//! inverted once. Each contributing pathway is kept as a [`VirtualPathway`]: the
//! exact node and edge subsets of the unified graph that came from it, so global
//! results can be projected back per pathway.

use std::collections::BTreeSet;

use crate::engine::errors::EngineError;
use crate::engine::graph::{Graph, NodeKey};
use crate::engine::pathway::{Pathway, Repository};

/// Id of the synthetic merged pathway.
pub const METAPATHWAY_ID: &str = "metapathway";

/// Inclusion/exclusion rules applied before merging.
///
/// When any include list is non-empty a pathway must match at least one
/// include rule. Exclusions always win.
#[derive(Debug, Clone, Default)]
pub struct PathwayFilter {
    include_pathways: BTreeSet<String>,
    exclude_pathways: BTreeSet<String>,
    include_categories: BTreeSet<String>,
    exclude_categories: BTreeSet<String>,
}

impl PathwayFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn include_pathways<I: IntoIterator<Item = S>, S: Into<String>>(mut self, ids: I) -> Self {
        self.include_pathways.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn exclude_pathways<I: IntoIterator<Item = S>, S: Into<String>>(mut self, ids: I) -> Self {
        self.exclude_pathways.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn include_categories<I: IntoIterator<Item = S>, S: Into<String>>(
        mut self,
        categories: I,
    ) -> Self {
        self.include_categories
            .extend(categories.into_iter().map(Into::into));
        self
    }

    pub fn exclude_categories<I: IntoIterator<Item = S>, S: Into<String>>(
        mut self,
        categories: I,
    ) -> Self {
        self.exclude_categories
            .extend(categories.into_iter().map(Into::into));
        self
    }

    pub fn accepts(&self, pathway: &Pathway) -> bool {
        if self.exclude_pathways.contains(pathway.id())
            || pathway
                .categories()
                .iter()
                .any(|c| self.exclude_categories.contains(c))
        {
            return false;
        }
        if self.include_pathways.is_empty() && self.include_categories.is_empty() {
            return true;
        }
        self.include_pathways.contains(pathway.id())
            || pathway
                .categories()
                .iter()
                .any(|c| self.include_categories.contains(c))
    }
}

/// Edge merge policy used while unifying pathways.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Keep only the highest-priority relation kinds on conflicting edges.
    pub use_priority: bool,
    /// Keep repeated identical details.
    pub allow_duplicates: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            use_priority: true,
            allow_duplicates: false,
        }
    }
}

/// Projection of one original pathway onto the metapathway.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualPathway {
    pub id: String,
    pub name: String,
    pub categories: BTreeSet<String>,
    pub hidden: bool,
    pub nodes: BTreeSet<NodeKey>,
    pub edges: BTreeSet<(NodeKey, NodeKey)>,
}

impl VirtualPathway {
    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains(id)
    }
}

/// The merged graph plus its per-pathway projections.
#[derive(Debug, Clone)]
pub struct Metapathway {
    pathway: Pathway,
    virtual_pathways: Vec<VirtualPathway>,
}

impl Metapathway {
    /// Merges every pathway accepted by `filter`, in pathway-id order.
    ///
    /// Nodes are deduplicated by id; edges between the same pair are merged
    /// with `options`. Fails when no pathway passes the filter.
    pub fn build(
        repository: &Repository,
        filter: &PathwayFilter,
        options: MergeOptions,
    ) -> Result<Self, EngineError> {
        let mut graph = Graph::new();
        let mut virtual_pathways = Vec::new();

        for pathway in repository.pathways().filter(|p| filter.accepts(p)) {
            let source = pathway.graph();
            let mut nodes = BTreeSet::new();
            let mut edges = BTreeSet::new();
            for id in source.sorted_node_ids() {
                if let Some(node) = source.node(&id) {
                    graph.add_node(node.clone());
                }
                nodes.insert(id);
            }
            for edge in source.sorted_edges() {
                graph.merge_edge(edge.clone(), options.use_priority, options.allow_duplicates)?;
                edges.insert((edge.source_key().clone(), edge.target_key().clone()));
            }
            for endpoint in source.endpoints() {
                graph.add_endpoint(endpoint)?;
            }
            virtual_pathways.push(VirtualPathway {
                id: pathway.id().to_string(),
                name: pathway.name().to_string(),
                categories: pathway.categories().clone(),
                hidden: pathway.is_hidden(),
                nodes,
                edges,
            });
        }

        if virtual_pathways.is_empty() {
            return Err(EngineError::Config(
                "metapathway: no pathway passes the inclusion/exclusion filter".into(),
            ));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            pathways = virtual_pathways.len(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "metapathway built"
        );

        Ok(Self {
            pathway: Pathway::new(METAPATHWAY_ID, "Metapathway", graph).hidden(true),
            virtual_pathways,
        })
    }

    pub fn graph(&self) -> &Graph {
        self.pathway.graph()
    }

    pub fn pathway(&self) -> &Pathway {
        &self.pathway
    }

    pub fn virtual_pathways(&self) -> &[VirtualPathway] {
        &self.virtual_pathways
    }

    pub fn virtual_pathway(&self, id: &str) -> Option<&VirtualPathway> {
        self.virtual_pathways.iter().find(|v| v.id == id)
    }

    /// Virtual pathways that appear in per-pathway reports.
    pub fn reported_pathways(&self) -> impl Iterator<Item = &VirtualPathway> {
        self.virtual_pathways.iter().filter(|v| !v.hidden)
    }

    /// Content digest: graph structure plus virtual pathway membership.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.graph().digest().as_bytes());
        for vp in &self.virtual_pathways {
            hasher.update(vp.id.as_bytes());
            hasher.update(&[0]);
            for node in &vp.nodes {
                hasher.update(node.as_bytes());
                hasher.update(&[1]);
            }
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Same metapathway with every edge (and virtual edge) reversed.
    pub fn inverted(&self) -> Metapathway {
        let graph = self.graph().reversed();
        let virtual_pathways = self
            .virtual_pathways
            .iter()
            .map(|vp| VirtualPathway {
                edges: vp.edges.iter().map(|(s, t)| (t.clone(), s.clone())).collect(),
                ..vp.clone()
            })
            .collect();
        Metapathway {
            pathway: Pathway::new(METAPATHWAY_ID, "Metapathway", graph).hidden(true),
            virtual_pathways,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::graph::{Edge, EdgeDetail, EdgeSubtype, EdgeType, Node, NodeType};

    fn pathway(id: &str, category: &str, edges: &[(&str, &str, EdgeSubtype)]) -> Pathway {
        let mut g = Graph::new();
        for (s, t, _) in edges {
            g.add_node(Node::new(*s, *s, NodeType::Gene));
            g.add_node(Node::new(*t, *t, NodeType::Gene));
        }
        for (s, t, sub) in edges {
            g.add_edge(Edge::new(*s, *t, EdgeDetail::new(EdgeType::Pprel, *sub)))
                .unwrap();
        }
        Pathway::new(id, id, g).with_categories([category])
    }

    fn repo() -> Repository {
        let mut r = Repository::new();
        r.add(pathway(
            "p1",
            "signaling",
            &[("a", "b", EdgeSubtype::Activation), ("b", "c", EdgeSubtype::Activation)],
        ))
        .unwrap();
        r.add(pathway(
            "p2",
            "metabolism",
            &[
                ("a", "b", EdgeSubtype::BindingAssociation),
                ("c", "d", EdgeSubtype::Inhibition),
            ],
        ))
        .unwrap();
        r
    }

    #[test]
    fn merge_deduplicates_nodes_and_applies_priority() {
        let meta = Metapathway::build(&repo(), &PathwayFilter::all(), MergeOptions::default())
            .unwrap();
        assert_eq!(meta.graph().node_count(), 4);
        assert_eq!(meta.graph().edge_count(), 3);
        let ab = meta.graph().edge("a", "b").unwrap();
        assert_eq!(ab.details().len(), 1);
        assert_eq!(ab.details()[0].subtype, EdgeSubtype::Activation);
    }

    #[test]
    fn virtual_pathways_record_their_own_edges() {
        let meta = Metapathway::build(&repo(), &PathwayFilter::all(), MergeOptions::default())
            .unwrap();
        let p2 = meta.virtual_pathway("p2").unwrap();
        assert_eq!(p2.nodes.len(), 4);
        assert_eq!(p2.edges.len(), 2);
        assert!(p2.edges.contains(&(NodeKey::from("c"), NodeKey::from("d"))));
    }

    #[test]
    fn filters_select_by_id_and_category() {
        let r = repo();
        let only_signaling = PathwayFilter::all().include_categories(["signaling"]);
        let meta = Metapathway::build(&r, &only_signaling, MergeOptions::default()).unwrap();
        assert_eq!(meta.virtual_pathways().len(), 1);
        assert_eq!(meta.graph().node_count(), 3);

        let excluded = PathwayFilter::all().exclude_pathways(["p1", "p2"]);
        assert!(matches!(
            Metapathway::build(&r, &excluded, MergeOptions::default()),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn building_twice_is_idempotent() {
        let r = repo();
        let a = Metapathway::build(&r, &PathwayFilter::all(), MergeOptions::default()).unwrap();
        let b = Metapathway::build(&r, &PathwayFilter::all(), MergeOptions::default()).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.graph().endpoints(), b.graph().endpoints());
    }

    #[test]
    fn metapathway_is_hidden_from_reports() {
        let meta = Metapathway::build(&repo(), &PathwayFilter::all(), MergeOptions::default())
            .unwrap();
        assert!(meta.pathway().is_hidden());
        assert_eq!(meta.reported_pathways().count(), 2);
    }
}
