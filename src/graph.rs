// Purpose: Provide the directed graph shared by import tracking and the dependency DAG.
// Inputs/Outputs: Stores nodes by insertion index and edges as index pairs.
// Invariants: Indices returned by add are stable; serialization preserves structure exactly.
// Gotchas: cycles() reports strongly connected components, so a lone self edge counts too.

use serde::{Deserialize, Serialize};

/// A small directed graph. Nodes are addressed by the index handed out by
/// [`Dag::add`]; edges point from dependent to dependency.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Dag<T> {
    nodes: Vec<T>,
    edges: Vec<(usize, usize)>,
}

impl<T> Dag<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn add(&mut self, node: T) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn connect(&mut self, from: usize, to: usize) {
        if !self.edges.contains(&(from, to)) {
            self.edges.push((from, to));
        }
    }

    pub fn node(&self, ix: usize) -> &T {
        &self.nodes[ix]
    }

    pub fn node_mut(&mut self, ix: usize) -> &mut T {
        &mut self.nodes[ix]
    }

    pub fn nodes(&self) -> &[T] {
        &self.nodes
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn adjacency(&self) -> Vec<Vec<usize>> {
        let mut adj = vec![Vec::new(); self.nodes.len()];
        for &(from, to) in &self.edges {
            adj[from].push(to);
        }
        adj
    }

    /// Enumerates cycles as strongly connected components with more than
    /// one member, plus single nodes that point at themselves. Members are
    /// listed in traversal order.
    pub fn cycles(&self) -> Vec<Vec<usize>> {
        let adj = self.adjacency();
        let n = self.nodes.len();
        let mut state = TarjanState {
            index: vec![None; n],
            low: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next: 0,
            sccs: Vec::new(),
        };
        for v in 0..n {
            if state.index[v].is_none() {
                strongconnect(v, &adj, &mut state);
            }
        }

        state
            .sccs
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.edges.contains(&(scc[0], scc[0])))
            .collect()
    }
}

struct TarjanState {
    index: Vec<Option<usize>>,
    low: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next: usize,
    sccs: Vec<Vec<usize>>,
}

fn strongconnect(v: usize, adj: &[Vec<usize>], state: &mut TarjanState) {
    state.index[v] = Some(state.next);
    state.low[v] = state.next;
    state.next += 1;
    state.stack.push(v);
    state.on_stack[v] = true;

    for &w in &adj[v] {
        match state.index[w] {
            None => {
                strongconnect(w, adj, state);
                state.low[v] = state.low[v].min(state.low[w]);
            }
            Some(w_index) if state.on_stack[w] => {
                state.low[v] = state.low[v].min(w_index);
            }
            Some(_) => {}
        }
    }

    if state.low[v] == state.index[v].unwrap_or(0) {
        let mut scc = Vec::new();
        while let Some(w) = state.stack.pop() {
            state.on_stack[w] = false;
            scc.push(w);
            if w == v {
                break;
            }
        }
        scc.reverse();
        state.sccs.push(scc);
    }
}

#[cfg(test)]
mod tests {
    use super::Dag;

    #[test]
    fn acyclic_graph_has_no_cycles() {
        let mut dag = Dag::new();
        let a = dag.add("a");
        let b = dag.add("b");
        let c = dag.add("c");
        dag.connect(a, b);
        dag.connect(b, c);
        dag.connect(a, c);
        assert!(dag.cycles().is_empty());
    }

    #[test]
    fn two_node_cycle_is_reported() {
        let mut dag = Dag::new();
        let a = dag.add("a");
        let b = dag.add("b");
        dag.connect(a, b);
        dag.connect(b, a);
        let cycles = dag.cycles();
        assert_eq!(cycles.len(), 1);
        let mut members: Vec<&str> = cycles[0].iter().map(|&ix| *dag.node(ix)).collect();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);
    }

    #[test]
    fn self_edge_counts_as_cycle() {
        let mut dag = Dag::new();
        let a = dag.add("a");
        dag.connect(a, a);
        assert_eq!(dag.cycles(), vec![vec![a]]);
    }

    #[test]
    fn disjoint_cycles_are_reported_separately() {
        let mut dag = Dag::new();
        let a = dag.add("a");
        let b = dag.add("b");
        let c = dag.add("c");
        let d = dag.add("d");
        dag.connect(a, b);
        dag.connect(b, a);
        dag.connect(c, d);
        dag.connect(d, c);
        assert_eq!(dag.cycles().len(), 2);
    }

    #[test]
    fn duplicate_edges_are_ignored() {
        let mut dag = Dag::new();
        let a = dag.add("a");
        let b = dag.add("b");
        dag.connect(a, b);
        dag.connect(a, b);
        assert_eq!(dag.edges().len(), 1);
    }

    #[test]
    fn serde_round_trip_preserves_structure() {
        let mut dag = Dag::new();
        let a = dag.add("a".to_string());
        let b = dag.add("b".to_string());
        dag.connect(a, b);
        let json = serde_json::to_string(&dag).expect("serialize");
        let back: Dag<String> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(dag, back);
    }
}
