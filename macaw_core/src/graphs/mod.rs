//! Reaction graphs used to group flagged reactions into pathways and rank them
//!
//! Both graphs start from the directed bipartite metabolite/reaction graph of a model, where
//! a reactant points at its reaction and a reaction points at its products (reversible
//! reactions get edges in both directions).
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::audit::EquationStyle;
use crate::metabolic_model::model::Model;
use crate::utils::sigfig_round;
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// Nothing was left to connect once the excluded nodes were removed
    #[error("No reactions were connected into pathways, try a higher degree cutoff")]
    NoPathways,
    #[error("Failed to start the betweenness thread pool: {0}")]
    ThreadPool(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum BipartiteNode {
    Reaction(usize),
    Metabolite(usize),
}

/// Directed bipartite graph, with lookups from model indices to nodes
struct BipartiteGraph {
    graph: DiGraph<BipartiteNode, ()>,
    reaction_nodes: Vec<Option<NodeIndex>>,
    metabolite_nodes: Vec<Option<NodeIndex>>,
}

impl BipartiteGraph {
    /// Build the graph, leaving out every reaction or metabolite whose id is in `exclude`
    fn new(model: &Model, exclude: &HashSet<String>) -> Self {
        let mut graph = DiGraph::new();
        let metabolite_nodes: Vec<Option<NodeIndex>> = model
            .metabolites
            .keys()
            .enumerate()
            .map(|(index, id)| (!exclude.contains(id)).then(|| graph.add_node(BipartiteNode::Metabolite(index))))
            .collect();
        let mut reaction_nodes = Vec::with_capacity(model.reactions.len());
        for (index, rxn) in model.reactions.values().enumerate() {
            if exclude.contains(&rxn.id) {
                reaction_nodes.push(None);
                continue;
            }
            let rxn_node = graph.add_node(BipartiteNode::Reaction(index));
            reaction_nodes.push(Some(rxn_node));
            for (met, coef) in &rxn.metabolites {
                let Some(met_node) = model
                    .metabolites
                    .get_index_of(met)
                    .and_then(|met_index| metabolite_nodes[met_index])
                else {
                    continue;
                };
                if *coef < 0. || rxn.is_reversible() {
                    graph.update_edge(met_node, rxn_node, ());
                }
                if *coef > 0. || rxn.is_reversible() {
                    graph.update_edge(rxn_node, met_node, ());
                }
            }
        }
        BipartiteGraph {
            graph,
            reaction_nodes,
            metabolite_nodes,
        }
    }

    /// Reactions reachable in two steps: `rxn` makes a metabolite the other reaction uses
    fn downstream_reactions(&self, rxn: NodeIndex) -> impl Iterator<Item = usize> + '_ {
        self.graph
            .neighbors_directed(rxn, Direction::Outgoing)
            .flat_map(move |met| self.graph.neighbors_directed(met, Direction::Outgoing))
            .filter(move |other| *other != rxn)
            .filter_map(|other| match self.graph[other] {
                BipartiteNode::Reaction(index) => Some(index),
                BipartiteNode::Metabolite(_) => None,
            })
    }

    /// Number of edges (in either direction) touching a metabolite
    fn metabolite_degree(&self, met: usize) -> usize {
        self.metabolite_nodes[met].map_or(0, |node| {
            self.graph.neighbors_directed(node, Direction::Incoming).count()
                + self.graph.neighbors_directed(node, Direction::Outgoing).count()
        })
    }
}

/// One edge of a pathway, each end labelled `id: equation`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PathwayEdge {
    pub reaction_1: String,
    pub reaction_2: String,
}

/// Reactions grouped into pathways
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pathways {
    /// Pathway number of every reaction of the model, 0 for reactions outside any pathway
    pub membership: IndexMap<String, usize>,
    pub edges: Vec<PathwayEdge>,
}

impl Pathways {
    /// Every reaction in pathway 0
    pub fn unassigned(model: &Model) -> Self {
        Pathways {
            membership: model.reactions.keys().map(|id| (id.clone(), 0)).collect(),
            edges: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.membership.values().copied().max().unwrap_or(0)
    }
}

/// Group reactions into pathways
///
/// Two reactions are connected when one produces a metabolite the other consumes (reversible
/// reactions do both), ignoring every reaction and metabolite whose id is in `exclude`.
/// Connected components of the resulting reaction graph are numbered from 1, in the order
/// their first reaction appears in the model.
///
/// # Errors
/// [`GraphError::NoPathways`] when no two reactions end up connected.
pub fn make_pathway_graph(
    model: &Model,
    exclude: &HashSet<String>,
    style: EquationStyle,
) -> Result<Pathways, GraphError> {
    let bipartite = BipartiteGraph::new(model, exclude);
    let mut projected: UnGraph<usize, ()> = UnGraph::with_capacity(model.reactions.len(), 0);
    for index in 0..model.reactions.len() {
        projected.add_node(index);
    }
    for (index, node) in bipartite.reaction_nodes.iter().enumerate() {
        let Some(node) = node else { continue };
        for other in bipartite.downstream_reactions(*node) {
            projected.update_edge(NodeIndex::new(index), NodeIndex::new(other), ());
        }
    }
    if projected.edge_count() == 0 {
        return Err(GraphError::NoPathways);
    }

    let label = |index: usize| {
        model
            .reactions
            .get_index(index)
            .map(|(id, rxn)| format!("{id}: {}", style.equation(model, rxn)))
            .unwrap_or_default()
    };
    let mut components = UnionFind::new(model.reactions.len());
    let mut edges = Vec::with_capacity(projected.edge_count());
    for edge in projected.edge_references() {
        let (first, second) = (edge.source().index(), edge.target().index());
        components.union(first, second);
        edges.push(PathwayEdge {
            reaction_1: label(first),
            reaction_2: label(second),
        });
    }

    let mut numbers: HashMap<usize, usize> = HashMap::new();
    let mut membership = IndexMap::with_capacity(model.reactions.len());
    for (index, id) in model.reactions.keys().enumerate() {
        let connected = projected.neighbors(NodeIndex::new(index)).next().is_some();
        let pathway = if connected {
            let next = numbers.len() + 1;
            *numbers.entry(components.find(index)).or_insert(next)
        } else {
            0
        };
        membership.insert(id.clone(), pathway);
    }
    info!(pathways = numbers.len(), edges = edges.len(), "grouped reactions into pathways");
    Ok(Pathways { membership, edges })
}

/// Undirected reaction graph weighted by how rare the shared metabolites are
///
/// Two reactions sharing metabolites are `1 / Σ 1/degree(m)` apart, so reactions sharing
/// only hub metabolites (water, ATP) are far from each other.
fn weighted_reaction_graph(model: &Model) -> UnGraph<usize, f64> {
    let bipartite = BipartiteGraph::new(model, &HashSet::new());
    let mut closeness: IndexMap<(usize, usize), f64> = IndexMap::new();
    for (met, reactions) in model.metabolite_reactions() {
        let Some(met_index) = model.metabolites.get_index_of(&met) else {
            continue;
        };
        let degree = bipartite.metabolite_degree(met_index);
        if degree == 0 {
            continue;
        }
        let indices: Vec<usize> = reactions
            .iter()
            .filter_map(|id| model.reactions.get_index_of(id))
            .collect();
        for (i, first) in indices.iter().enumerate() {
            for second in &indices[i + 1..] {
                let key = ((*first).min(*second), (*first).max(*second));
                *closeness.entry(key).or_insert(0.) += 1. / degree as f64;
            }
        }
    }
    let mut graph = UnGraph::with_capacity(model.reactions.len(), closeness.len());
    for index in 0..model.reactions.len() {
        graph.add_node(index);
    }
    for ((first, second), total) in closeness {
        graph.add_edge(NodeIndex::new(first), NodeIndex::new(second), 1. / total);
    }
    graph
}

/// Heap entry for Dijkstra, smallest distance first
#[derive(Clone, Copy, PartialEq)]
struct Visit {
    distance: f64,
    node: usize,
}

impl Eq for Visit {}

impl Ord for Visit {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Visit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Add the dependencies of every node on shortest paths starting at `source` (Brandes)
fn accumulate_from(graph: &UnGraph<usize, f64>, source: usize, totals: &mut [f64]) {
    let n = graph.node_count();
    let mut distance = vec![f64::INFINITY; n];
    let mut paths = vec![0f64; n];
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut settled = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut heap = BinaryHeap::new();

    distance[source] = 0.;
    paths[source] = 1.;
    heap.push(Visit {
        distance: 0.,
        node: source,
    });
    while let Some(Visit { distance: dist, node }) = heap.pop() {
        if settled[node] {
            continue;
        }
        settled[node] = true;
        order.push(node);
        for edge in graph.edges(NodeIndex::new(node)) {
            let next = edge.target().index();
            let candidate = dist + *edge.weight();
            if candidate < distance[next] {
                distance[next] = candidate;
                paths[next] = paths[node];
                predecessors[next].clear();
                predecessors[next].push(node);
                heap.push(Visit {
                    distance: candidate,
                    node: next,
                });
            } else if candidate == distance[next] && !settled[next] {
                paths[next] += paths[node];
                predecessors[next].push(node);
            }
        }
    }

    let mut dependency = vec![0f64; n];
    for node in order.into_iter().rev() {
        for pred in &predecessors[node] {
            dependency[*pred] += paths[*pred] / paths[node] * (1. + dependency[node]);
        }
        if node != source {
            totals[node] += dependency[node];
        }
    }
}

/// Weighted betweenness centrality of every reaction
///
/// Shortest paths are counted between every ordered pair of reactions, then scaled by
/// `1 / ((n - 1)(n - 2))` and rounded to 3 significant figures. Sources are split into
/// chunks which are processed on `threads` worker threads.
pub fn reaction_betweenness(model: &Model, threads: usize) -> Result<IndexMap<String, f64>, GraphError> {
    let graph = weighted_reaction_graph(model);
    let n = graph.node_count();
    let threads = threads.max(1);
    let chunk_size = (n / (threads * 4)).max(1);
    debug!(reactions = n, edges = graph.edge_count(), chunk_size, "computing betweenness");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|err| GraphError::ThreadPool(err.to_string()))?;
    let sources: Vec<usize> = (0..n).collect();
    let totals = pool.install(|| {
        sources
            .par_chunks(chunk_size)
            .map(|chunk| {
                let mut partial = vec![0f64; n];
                for source in chunk {
                    accumulate_from(&graph, *source, &mut partial);
                }
                partial
            })
            .reduce(
                || vec![0f64; n],
                |mut sum, partial| {
                    sum.iter_mut().zip(partial).for_each(|(total, value)| *total += value);
                    sum
                },
            )
    });

    let scale = if n > 2 { 1. / ((n - 1) * (n - 2)) as f64 } else { 1. };
    Ok(model
        .reactions
        .keys()
        .zip(totals)
        .map(|(id, total)| (id.clone(), sigfig_round(total * scale, 3)))
        .collect())
}

/// Largest reaction betweenness within each pathway
pub fn pathway_betweenness(
    pathways: &IndexMap<String, usize>,
    betweenness: &IndexMap<String, f64>,
) -> IndexMap<usize, f64> {
    let mut maxima: IndexMap<usize, f64> = IndexMap::new();
    for (rxn, pathway) in pathways {
        let value = betweenness.get(rxn).copied().unwrap_or(0.);
        maxima
            .entry(*pathway)
            .and_modify(|max| *max = max.max(value))
            .or_insert(value);
    }
    maxima
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metabolic_model::reaction::Reaction;

    /// ∅ -> A -> B -> C -> ∅
    fn linear_model() -> Model {
        let mut model = Model::new_empty();
        model.add_reaction(Reaction::new("EX_A", &[("A", 1.)], 0., 1000.));
        model.add_reaction(Reaction::new("R1", &[("A", -1.), ("B", 1.)], 0., 1000.));
        model.add_reaction(Reaction::new("R2", &[("B", -1.), ("C", 1.)], 0., 1000.));
        model.add_reaction(Reaction::new("EX_C", &[("C", -1.)], 0., 1000.));
        model
    }

    #[test]
    fn linear_pathway_is_one_component() {
        let model = linear_model();
        let pathways = make_pathway_graph(&model, &HashSet::new(), EquationStyle::default()).unwrap();
        assert!(pathways.membership.values().all(|p| *p == 1));
        assert_eq!(pathways.edges.len(), 3);
        assert!(pathways.edges[0].reaction_1.starts_with("EX_A: "));
        assert_eq!(pathways.count(), 1);
    }

    #[test]
    fn excluded_nodes_split_pathways() {
        let model = linear_model();
        let exclude = HashSet::from(["B".to_string()]);
        let pathways = make_pathway_graph(&model, &exclude, EquationStyle::default()).unwrap();
        assert_eq!(pathways.membership["EX_A"], 1);
        assert_eq!(pathways.membership["R1"], 1);
        assert_eq!(pathways.membership["R2"], 2);
        assert_eq!(pathways.membership["EX_C"], 2);

        let exclude: HashSet<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            make_pathway_graph(&model, &exclude, EquationStyle::default()),
            Err(GraphError::NoPathways)
        );
    }

    #[test]
    fn consumers_of_the_same_metabolite_are_not_connected() {
        let mut model = Model::new_empty();
        model.add_reaction(Reaction::new("R1", &[("A", -1.), ("B", 1.)], 0., 1000.));
        model.add_reaction(Reaction::new("R2", &[("A", -1.), ("C", 1.)], 0., 1000.));
        model.add_reaction(Reaction::new("R3", &[("D", -1.), ("E", 1.)], 0., 1000.));
        model.add_reaction(Reaction::new("R4", &[("E", -1.), ("D", 1.)], -1000., 1000.));
        let pathways = make_pathway_graph(&model, &HashSet::new(), EquationStyle::default()).unwrap();
        assert_eq!(pathways.membership["R1"], 0);
        assert_eq!(pathways.membership["R2"], 0);
        assert_eq!(pathways.membership["R3"], 1);
        assert_eq!(pathways.membership["R4"], 1);
    }

    #[test]
    fn betweenness_of_a_chain() {
        let model = linear_model();
        let betweenness = reaction_betweenness(&model, 2).unwrap();
        assert_eq!(betweenness["EX_A"], 0.);
        assert_eq!(betweenness["EX_C"], 0.);
        // 4 of the 12 ordered pairs pass through each middle reaction
        assert!((betweenness["R1"] - 0.667).abs() < 1e-12);
        assert!((betweenness["R2"] - 0.667).abs() < 1e-12);

        let pathways = IndexMap::from([
            ("EX_A".to_string(), 1),
            ("R1".to_string(), 1),
            ("R2".to_string(), 2),
            ("EX_C".to_string(), 0),
        ]);
        let maxima = pathway_betweenness(&pathways, &betweenness);
        assert!((maxima[&1] - 0.667).abs() < 1e-12);
        assert_eq!(maxima[&0], 0.);
    }

    #[test]
    fn rare_metabolites_make_short_edges() {
        let mut model = linear_model();
        // Hub metabolite shared by every reaction
        for id in ["EX_A", "R1", "R2", "EX_C"] {
            model.get_reaction_mut(id).unwrap().metabolites.insert("h2o".to_string(), -1.);
        }
        model.add_metabolite(crate::metabolic_model::metabolite::Metabolite::new("h2o"));
        let graph = weighted_reaction_graph(&model);
        let weight = |a: usize, b: usize| {
            graph
                .find_edge(NodeIndex::new(a), NodeIndex::new(b))
                .map(|edge| graph[edge])
                .unwrap()
        };
        // A (degree 2) plus h2o (degree 4)
        assert!((weight(0, 1) - 1. / 0.75).abs() < 1e-12);
        // Only h2o
        assert!((weight(0, 3) - 4.).abs() < 1e-12);
    }
}
