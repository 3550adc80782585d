use std::collections::HashSet;

use color_eyre::{eyre::ensure, Result};
use serde::{Deserialize, Serialize};

use crate::error::WildsimError::TableIntegrityError;

pub type NodeId = i64;

/// Marker for "no node", used for parent pointers and unset individual links.
pub const NULL: NodeId = -1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Generations before present
    pub time: f64,
    pub population: usize,
    /// Row in the individual table, or -1
    pub individual: i64,
    pub is_sample: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub left: f64,
    pub right: f64,
    pub parent: NodeId,
    pub child: NodeId,
}

/// A diploid individual and its two genome copies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndividualRecord {
    pub population: usize,
    /// Birth time in generations before present; 0 means alive now
    pub time: f64,
    pub nodes: [NodeId; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub position: f64,
    /// The node immediately below the mutation
    pub node: NodeId,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationRecord {
    pub name: String,
}

/// The five tables that make up a tree sequence, in the interchange form
/// written by the forward simulator and appended to by recapitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCollection {
    pub sequence_length: f64,
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
    pub individuals: Vec<IndividualRecord>,
    pub populations: Vec<PopulationRecord>,
    pub mutations: Vec<MutationRecord>,
}

impl TableCollection {
    pub fn new(sequence_length: f64) -> Self {
        Self {
            sequence_length,
            nodes: vec![],
            edges: vec![],
            individuals: vec![],
            populations: vec![],
            mutations: vec![],
        }
    }

    pub fn add_node(
        &mut self,
        time: f64,
        population: usize,
        individual: i64,
        is_sample: bool,
    ) -> NodeId {
        self.nodes.push(NodeRecord {
            time,
            population,
            individual,
            is_sample,
        });
        (self.nodes.len() - 1) as NodeId
    }

    pub fn add_edge(&mut self, left: f64, right: f64, parent: NodeId, child: NodeId) {
        self.edges.push(EdgeRecord {
            left,
            right,
            parent,
            child,
        });
    }

    pub fn add_individual(&mut self, population: usize, time: f64, nodes: [NodeId; 2]) -> i64 {
        self.individuals.push(IndividualRecord {
            population,
            time,
            nodes,
        });
        (self.individuals.len() - 1) as i64
    }

    pub fn add_population(&mut self, name: &str) -> usize {
        self.populations.push(PopulationRecord {
            name: name.to_string(),
        });
        self.populations.len() - 1
    }

    pub fn add_mutation(&mut self, position: f64, node: NodeId, time: f64) {
        self.mutations.push(MutationRecord {
            position,
            node,
            time,
        });
    }

    /// Canonical ordering: edges by parent time, parent, child, left;
    /// mutations by position.
    pub fn sort(&mut self) {
        let nodes = std::mem::take(&mut self.nodes);
        self.edges.sort_by(|a, b| {
            let ta = nodes[a.parent as usize].time;
            let tb = nodes[b.parent as usize].time;
            ta.total_cmp(&tb)
                .then(a.parent.cmp(&b.parent))
                .then(a.child.cmp(&b.child))
                .then(a.left.total_cmp(&b.left))
        });
        self.nodes = nodes;
        self.mutations
            .sort_by(|a, b| a.position.total_cmp(&b.position));
    }

    pub fn check_integrity(&self) -> Result<()> {
        ensure!(
            self.sequence_length > 0.0,
            TableIntegrityError("sequence length must be positive".into())
        );
        let n = self.nodes.len() as NodeId;
        for edge in &self.edges {
            ensure!(
                edge.parent >= 0 && edge.parent < n && edge.child >= 0 && edge.child < n,
                TableIntegrityError(format!("edge references a node out of range: {edge:?}"))
            );
            ensure!(
                edge.parent != edge.child,
                TableIntegrityError(format!("edge with parent == child: {edge:?}"))
            );
            ensure!(
                edge.left >= 0.0 && edge.left < edge.right && edge.right <= self.sequence_length,
                TableIntegrityError(format!("edge interval out of bounds: {edge:?}"))
            );
            // Equal times occur only in instantaneous-bottleneck chains
            ensure!(
                self.nodes[edge.parent as usize].time >= self.nodes[edge.child as usize].time,
                TableIntegrityError(format!("edge parent is younger than its child: {edge:?}"))
            );
        }
        for node in &self.nodes {
            ensure!(
                node.population < self.populations.len(),
                TableIntegrityError(format!("node population out of range: {node:?}"))
            );
            if node.individual != NULL {
                ensure!(
                    (node.individual as usize) < self.individuals.len(),
                    TableIntegrityError(format!("node individual out of range: {node:?}"))
                );
            }
        }
        for mutation in &self.mutations {
            ensure!(
                mutation.node >= 0 && mutation.node < n,
                TableIntegrityError(format!("mutation node out of range: {mutation:?}"))
            );
            ensure!(
                mutation.position >= 0.0 && mutation.position < self.sequence_length,
                TableIntegrityError(format!("mutation position out of bounds: {mutation:?}"))
            );
        }
        Ok(())
    }
}

/// An immutable, indexed view over sorted tables.
///
/// Construction sorts and validates the tables and builds the edge
/// insertion/removal indices used for local-tree iteration.
#[derive(Debug, Clone)]
pub struct TreeSequence {
    tables: TableCollection,
    insertion: Vec<usize>,
    removal: Vec<usize>,
    samples: Vec<NodeId>,
}

impl TreeSequence {
    pub fn new(mut tables: TableCollection) -> Result<Self> {
        tables.sort();
        tables.check_integrity()?;

        let mut insertion: Vec<usize> = (0..tables.edges.len()).collect();
        insertion.sort_by(|&a, &b| {
            let ea = &tables.edges[a];
            let eb = &tables.edges[b];
            ea.left
                .total_cmp(&eb.left)
                .then(tables.nodes[ea.parent as usize].time.total_cmp(&tables.nodes[eb.parent as usize].time))
                .then(ea.parent.cmp(&eb.parent))
                .then(ea.child.cmp(&eb.child))
        });
        let mut removal: Vec<usize> = (0..tables.edges.len()).collect();
        removal.sort_by(|&a, &b| {
            let ea = &tables.edges[a];
            let eb = &tables.edges[b];
            ea.right
                .total_cmp(&eb.right)
                .then(tables.nodes[eb.parent as usize].time.total_cmp(&tables.nodes[ea.parent as usize].time))
                .then(eb.parent.cmp(&ea.parent))
                .then(eb.child.cmp(&ea.child))
        });

        let samples = tables
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_sample)
            .map(|(id, _)| id as NodeId)
            .collect();

        Ok(Self {
            tables,
            insertion,
            removal,
            samples,
        })
    }

    pub fn tables(&self) -> &TableCollection {
        &self.tables
    }

    pub fn into_tables(self) -> TableCollection {
        self.tables
    }

    pub fn sequence_length(&self) -> f64 {
        self.tables.sequence_length
    }

    pub fn samples(&self) -> &[NodeId] {
        &self.samples
    }

    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.tables.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.tables.edges.len()
    }

    pub fn num_mutations(&self) -> usize {
        self.tables.mutations.len()
    }

    pub fn num_populations(&self) -> usize {
        self.tables.populations.len()
    }

    pub fn num_trees(&self) -> usize {
        self.trees().count()
    }

    pub fn node_time(&self, node: NodeId) -> f64 {
        self.tables.nodes[node as usize].time
    }

    pub fn node_population(&self, node: NodeId) -> usize {
        self.tables.nodes[node as usize].population
    }

    /// Indices of individuals whose birth time equals `time`.
    pub fn individuals_alive_at(&self, time: f64) -> Vec<usize> {
        self.tables
            .individuals
            .iter()
            .enumerate()
            .filter(|(_, ind)| ind.time == time)
            .map(|(i, _)| i)
            .collect()
    }

    /// Sample nodes grouped by population, in node-id order within each group.
    pub fn samples_by_population(&self) -> Vec<Vec<NodeId>> {
        let mut grouped = vec![Vec::new(); self.tables.populations.len()];
        for &s in &self.samples {
            grouped[self.tables.nodes[s as usize].population].push(s);
        }
        grouped
    }

    pub fn trees(&self) -> Trees<'_> {
        Trees {
            ts: self,
            parent: vec![NULL; self.tables.nodes.len()],
            next_insertion: 0,
            next_removal: 0,
            left: 0.0,
            started: false,
        }
    }

    /// Remove nodes and edges not ancestral to the chosen samples, remapping
    /// retained mutations and sampled individuals. With `None`, simplifies
    /// with respect to all currently flagged sample nodes.
    ///
    /// Node ids are not preserved: the chosen samples become nodes
    /// `0..samples.len()` of the output, in the order supplied.
    pub fn simplify(&self, samples: Option<&[NodeId]>) -> Result<TreeSequence> {
        let chosen: Vec<NodeId> = match samples {
            Some(list) => list.to_vec(),
            None => self.samples.clone(),
        };
        let tables = &self.tables;
        let seqlen = tables.sequence_length;
        let num_nodes = tables.nodes.len();

        let mut out = TableCollection::new(seqlen);
        out.populations = tables.populations.clone();

        let mut node_map: Vec<NodeId> = vec![NULL; num_nodes];
        let mut ancestry: Vec<Vec<AncestrySeg>> = vec![Vec::new(); num_nodes];

        for &s in &chosen {
            ensure!(
                s >= 0 && (s as usize) < num_nodes,
                TableIntegrityError(format!("sample node {s} out of range"))
            );
            ensure!(
                node_map[s as usize] == NULL,
                TableIntegrityError(format!("duplicate sample node {s}"))
            );
            let rec = tables.nodes[s as usize];
            let new_id = out.add_node(rec.time, rec.population, NULL, true);
            node_map[s as usize] = new_id;
            ancestry[s as usize].push(AncestrySeg {
                left: 0.0,
                right: seqlen,
                node: new_id,
            });
        }

        // Edges are sorted by parent time, so every child's ancestry is
        // final before its parent's edge group is reached.
        let edges = &tables.edges;
        let mut i = 0;
        while i < edges.len() {
            let parent = edges[i].parent;
            let mut j = i;
            while j < edges.len() && edges[j].parent == parent {
                j += 1;
            }
            simplify_one_parent(parent, &edges[i..j], tables, &mut out, &mut node_map, &mut ancestry);
            i = j;
        }

        for m in &tables.mutations {
            let hit = ancestry[m.node as usize]
                .iter()
                .find(|seg| seg.left <= m.position && m.position < seg.right);
            if let Some(seg) = hit {
                out.add_mutation(m.position, seg.node, m.time);
            }
        }

        for ind in &tables.individuals {
            let [a, b] = ind.nodes;
            if a == NULL || b == NULL {
                continue;
            }
            let (ma, mb) = (node_map[a as usize], node_map[b as usize]);
            if ma != NULL
                && mb != NULL
                && out.nodes[ma as usize].is_sample
                && out.nodes[mb as usize].is_sample
            {
                let idx = out.add_individual(ind.population, ind.time, [ma, mb]);
                out.nodes[ma as usize].individual = idx;
                out.nodes[mb as usize].individual = idx;
            }
        }

        TreeSequence::new(out)
    }
}

#[derive(Debug, Clone, Copy)]
struct AncestrySeg {
    left: f64,
    right: f64,
    node: NodeId,
}

fn simplify_one_parent(
    parent: NodeId,
    edges: &[EdgeRecord],
    tables: &TableCollection,
    out: &mut TableCollection,
    node_map: &mut [NodeId],
    ancestry: &mut [Vec<AncestrySeg>],
) {
    // A non-NULL map entry at this point means the parent is itself a sample.
    let parent_is_sample = node_map[parent as usize] != NULL;

    let mut segs: Vec<AncestrySeg> = vec![];
    for edge in edges {
        for seg in &ancestry[edge.child as usize] {
            let left = seg.left.max(edge.left);
            let right = seg.right.min(edge.right);
            if left < right {
                segs.push(AncestrySeg {
                    left,
                    right,
                    node: seg.node,
                });
            }
        }
    }
    if segs.is_empty() {
        return;
    }

    let mut breakpoints: Vec<f64> = Vec::with_capacity(2 * segs.len());
    for seg in &segs {
        breakpoints.push(seg.left);
        breakpoints.push(seg.right);
    }
    breakpoints.sort_by(f64::total_cmp);
    breakpoints.dedup();

    let mut new_ancestry: Vec<AncestrySeg> = vec![];
    let mut new_edges: Vec<EdgeRecord> = vec![];

    for window in breakpoints.windows(2) {
        let (wl, wr) = (window[0], window[1]);
        let covering: Vec<NodeId> = segs
            .iter()
            .filter(|seg| seg.left <= wl && seg.right >= wr)
            .map(|seg| seg.node)
            .collect();
        if covering.is_empty() {
            continue;
        }
        if covering.len() == 1 && !parent_is_sample {
            // Unary span: material passes through without a recorded node
            push_merged(&mut new_ancestry, wl, wr, covering[0]);
            continue;
        }
        let mapped = match node_map[parent as usize] {
            NULL => {
                let rec = tables.nodes[parent as usize];
                let id = out.add_node(rec.time, rec.population, NULL, false);
                node_map[parent as usize] = id;
                id
            }
            id => id,
        };
        for child in covering {
            new_edges.push(EdgeRecord {
                left: wl,
                right: wr,
                parent: mapped,
                child,
            });
        }
        if !parent_is_sample {
            push_merged(&mut new_ancestry, wl, wr, mapped);
        }
    }

    // Squash abutting edge spans for the same child
    new_edges.sort_by(|a, b| a.child.cmp(&b.child).then(a.left.total_cmp(&b.left)));
    for edge in new_edges {
        match out.edges.last_mut() {
            Some(last)
                if last.parent == edge.parent
                    && last.child == edge.child
                    && last.right == edge.left =>
            {
                last.right = edge.right;
            }
            _ => out.edges.push(edge),
        }
    }

    if !parent_is_sample {
        ancestry[parent as usize] = new_ancestry;
    }
}

fn push_merged(ancestry: &mut Vec<AncestrySeg>, left: f64, right: f64, node: NodeId) {
    match ancestry.last_mut() {
        Some(last) if last.node == node && last.right == left => last.right = right,
        _ => ancestry.push(AncestrySeg { left, right, node }),
    }
}

/// Iterator over the local trees of a [`TreeSequence`].
pub struct Trees<'a> {
    ts: &'a TreeSequence,
    parent: Vec<NodeId>,
    next_insertion: usize,
    next_removal: usize,
    left: f64,
    started: bool,
}

impl<'a> Iterator for Trees<'a> {
    type Item = Tree<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let tables = &self.ts.tables;
        let num_edges = tables.edges.len();
        if self.started && self.left >= tables.sequence_length {
            return None;
        }
        self.started = true;

        while self.next_removal < num_edges
            && tables.edges[self.ts.removal[self.next_removal]].right == self.left
        {
            let edge = &tables.edges[self.ts.removal[self.next_removal]];
            self.parent[edge.child as usize] = NULL;
            self.next_removal += 1;
        }
        while self.next_insertion < num_edges
            && tables.edges[self.ts.insertion[self.next_insertion]].left == self.left
        {
            let edge = &tables.edges[self.ts.insertion[self.next_insertion]];
            self.parent[edge.child as usize] = edge.parent;
            self.next_insertion += 1;
        }

        let mut right = tables.sequence_length;
        if self.next_insertion < num_edges {
            right = right.min(tables.edges[self.ts.insertion[self.next_insertion]].left);
        }
        if self.next_removal < num_edges {
            right = right.min(tables.edges[self.ts.removal[self.next_removal]].right);
        }

        let tree = Tree {
            ts: self.ts,
            interval: (self.left, right),
            parent: self.parent.clone(),
        };
        self.left = right;
        Some(tree)
    }
}

/// One local tree: a parent array over a genomic interval.
pub struct Tree<'a> {
    ts: &'a TreeSequence,
    pub interval: (f64, f64),
    parent: Vec<NodeId>,
}

impl Tree<'_> {
    pub fn parent(&self, node: NodeId) -> NodeId {
        self.parent[node as usize]
    }

    fn ascend(&self, node: NodeId) -> NodeId {
        let mut u = node;
        while self.parent[u as usize] != NULL {
            u = self.parent[u as usize];
        }
        u
    }

    /// Distinct terminal ancestors of the sample nodes, oldest material only.
    pub fn roots(&self) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut roots = vec![];
        for &s in self.ts.samples() {
            let root = self.ascend(s);
            if seen.insert(root) {
                roots.push(root);
            }
        }
        roots
    }

    pub fn num_roots(&self) -> usize {
        self.roots().len()
    }

    /// Sample nodes that inherit from `node` in this tree.
    pub fn samples_below(&self, node: NodeId) -> Vec<NodeId> {
        let mut below = vec![];
        for &s in self.ts.samples() {
            let mut u = s;
            loop {
                if u == node {
                    below.push(s);
                    break;
                }
                u = self.parent[u as usize];
                if u == NULL {
                    break;
                }
            }
        }
        below
    }

    /// Mutations whose position falls inside this tree's interval.
    pub fn mutations(&self) -> impl Iterator<Item = &MutationRecord> {
        let (left, right) = self.interval;
        self.ts
            .tables
            .mutations
            .iter()
            .filter(move |m| m.position >= left && m.position < right)
    }
}
