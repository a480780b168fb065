//! State transition graph analysis.
//!
//! Models the states of one graph as a `petgraph` digraph with an edge for
//! every possible transition (`Next`, Choice targets, `Default`, Catch
//! targets) so that load-time validation can reject states that can never
//! run.

use std::collections::HashMap;

use flowstate_types::definition::WorkflowDefinition;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

/// Build the transition digraph. Edges to unknown states are skipped;
/// dangling references are reported separately by validation.
pub fn transition_graph(def: &WorkflowDefinition) -> (DiGraph<&str, ()>, HashMap<&str, NodeIndex>) {
    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: HashMap<&str, NodeIndex> = def
        .states
        .keys()
        .map(|name| (name.as_str(), graph.add_node(name.as_str())))
        .collect();

    for (name, state) in &def.states {
        let from = nodes[name.as_str()];
        for target in state.successors() {
            if let Some(&to) = nodes.get(target) {
                graph.update_edge(from, to, ());
            }
        }
    }

    (graph, nodes)
}

/// States not reachable from `StartAt`, in name order.
pub fn unreachable_states(def: &WorkflowDefinition) -> Vec<&str> {
    let (graph, nodes) = transition_graph(def);
    let Some(&start) = nodes.get(def.start_at.as_str()) else {
        return def.states.keys().map(String::as_str).collect();
    };

    let mut reached = vec![false; graph.node_count()];
    let mut dfs = Dfs::new(&graph, start);
    while let Some(node) = dfs.next(&graph) {
        reached[node.index()] = true;
    }

    def.states
        .keys()
        .map(String::as_str)
        .filter(|name| !reached[nodes[name].index()])
        .collect()
}
