use color_eyre::eyre::eyre;
use color_eyre::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Exp, Poisson};

use crate::args::{PopulationSizes, SeqFeatures, NUM_POPULATIONS};
use crate::error::WildsimError::NonCoalescingDemography;
use crate::sim::demography::{render_history, DemographicEvent};
use crate::structs::{NodeId, TableCollection, TreeSequence, NULL};

/// A piece of ancestral material and the node that currently carries it.
#[derive(Debug, Clone, Copy)]
struct Seg {
    left: f64,
    right: f64,
    node: NodeId,
}

/// One extant ancestor: a sorted chain of ancestral segments in a population.
#[derive(Debug, Clone)]
struct Lineage {
    segs: Vec<Seg>,
    population: usize,
}

impl Lineage {
    fn leftmost(&self) -> f64 {
        self.segs[0].left
    }

    fn rightmost(&self) -> f64 {
        self.segs[self.segs.len() - 1].right
    }

    /// Length over which a recombination breakpoint would split material.
    fn span(&self) -> f64 {
        self.rightmost() - self.leftmost()
    }
}

/// Extend the genealogy of a decapitated tree sequence backward in time
/// until every local tree reaches a single root, under the given ancestral
/// demography. Returns a new tree sequence; the input is not modified.
///
/// The random seed is the sole source of stochasticity.
pub fn recapitate(
    decap: &TreeSequence,
    events: &[DemographicEvent],
    sizes: &PopulationSizes,
    seq: &SeqFeatures,
    seed: u64,
) -> Result<TreeSequence> {
    let mut tables = decap.tables().clone();
    let mut rng = StdRng::seed_from_u64(seed);

    let mut lineages = root_lineages(decap);
    prune_coalesced(&mut lineages);
    if lineages.is_empty() {
        return TreeSequence::new(tables);
    }

    // The coalescent starts at the oldest root of the forward stage
    let mut now = lineages
        .iter()
        .flat_map(|l| l.segs.iter())
        .map(|s| tables.nodes[s.node as usize].time)
        .fold(0.0_f64, f64::max);

    let mut pop_size = [
        f64::from(sizes.domestic),
        f64::from(sizes.wild),
        f64::from(sizes.captive),
    ];
    let mut migration = [[0.0_f64; NUM_POPULATIONS]; NUM_POPULATIONS];

    // The engine requires non-decreasing event times; re-sorting is cheap
    // and keeps arbitrary callers safe.
    let mut events: Vec<DemographicEvent> = events.to_vec();
    events.sort_by(|a, b| a.time().total_cmp(&b.time()));
    let mut next_event = 0;

    let recombination_rate = seq.recombination_rate;

    while !lineages.is_empty() {
        let per_pop: [usize; NUM_POPULATIONS] = count_per_population(&lineages);

        // Stalemate: lineages split across populations with no migration and
        // no demography left to connect them can never finish coalescing,
        // even though recombination keeps the total rate positive.
        let occupied = per_pop.iter().filter(|&&k| k > 0).count();
        let any_migration = migration.iter().flatten().any(|&m| m > 0.0);
        if occupied > 1 && !any_migration && next_event >= events.len() {
            return Err(eyre!(NonCoalescingDemography));
        }

        let mut coal_rate = [0.0_f64; NUM_POPULATIONS];
        for p in 0..NUM_POPULATIONS {
            let k = per_pop[p] as f64;
            if per_pop[p] >= 2 && pop_size[p] > 0.0 {
                coal_rate[p] = k * (k - 1.0) / 2.0 / (2.0 * pop_size[p]);
            }
        }
        let coal_total: f64 = coal_rate.iter().sum();

        let recomb_total: f64 = recombination_rate
            * lineages.iter().map(Lineage::span).sum::<f64>();

        let mig_total: f64 = lineages
            .iter()
            .map(|l| migration[l.population].iter().sum::<f64>())
            .sum();

        let total = coal_total + recomb_total + mig_total;

        if total <= 0.0 {
            // Nothing can happen until the demography changes
            match events.get(next_event) {
                Some(event) => {
                    now = event.time().max(now);
                    apply_event(
                        event,
                        now,
                        &mut lineages,
                        &mut pop_size,
                        &mut migration,
                        &mut tables,
                        &mut rng,
                    );
                    next_event += 1;
                    continue;
                }
                None => return Err(eyre!(NonCoalescingDemography)),
            }
        }

        let wait = rng.sample(Exp::new(total).expect("positive total rate"));
        if next_event < events.len() && events[next_event].time() <= now + wait {
            let event = events[next_event];
            now = event.time().max(now);
            apply_event(
                &event,
                now,
                &mut lineages,
                &mut pop_size,
                &mut migration,
                &mut tables,
                &mut rng,
            );
            next_event += 1;
            continue;
        }
        now += wait;

        let mut pick = rng.gen_range(0.0..total);
        if pick < coal_total {
            // coalescence in the population the draw landed in
            let mut population = NUM_POPULATIONS - 1;
            for (p, rate) in coal_rate.iter().enumerate() {
                if pick < *rate {
                    population = p;
                    break;
                }
                pick -= rate;
            }
            coalesce_random_pair(&mut lineages, population, now, &mut tables, &mut rng);
            prune_coalesced(&mut lineages);
        } else if pick < coal_total + recomb_total {
            recombine(&mut lineages, recombination_rate, pick - coal_total, &mut rng);
        } else {
            migrate(&mut lineages, &migration, pick - coal_total - recomb_total);
        }
    }

    TreeSequence::new(tables)
}

/// Overlay neutral mutations on every branch at the given per-base rate.
/// Returns a new tree sequence; mutation counts are Poisson in branch
/// length times span, positions uniform over the edge interval.
pub fn overlay_mutations(ts: &TreeSequence, rate: f64, seed: u64) -> Result<TreeSequence> {
    let mut tables = ts.tables().clone();
    let mut rng = StdRng::seed_from_u64(seed);

    for edge in &ts.tables().edges {
        let child_time = tables.nodes[edge.child as usize].time;
        let parent_time = tables.nodes[edge.parent as usize].time;
        let branch = parent_time - child_time;
        let mean = rate * branch * (edge.right - edge.left);
        if mean <= 0.0 {
            continue;
        }
        let count = rng.sample(Poisson::new(mean).expect("positive mean")) as u64;
        for _ in 0..count {
            let position = rng.gen_range(edge.left..edge.right);
            let time = rng.gen_range(child_time..parent_time);
            tables.add_mutation(position, edge.child, time);
        }
    }

    TreeSequence::new(tables)
}

/// The full backward stage: recapitate, overlay mutations, simplify.
/// Each step yields a new immutable value. With `debug_demography`, a
/// human-readable trace of the demographic history is printed first.
pub fn complete_tree_sequence(
    decap: &TreeSequence,
    events: &[DemographicEvent],
    sizes: &PopulationSizes,
    seq: &SeqFeatures,
    seed: u64,
    debug_demography: bool,
) -> Result<TreeSequence> {
    if debug_demography {
        println!("{}", render_history(sizes, events));
    }
    let recapitated = recapitate(decap, events, sizes, seq, seed)?;
    let mutated = overlay_mutations(&recapitated, seq.mutation_rate, seed)?;
    mutated.simplify(None)
}

/// One lineage per root node of the decapitated tree sequence, carrying
/// the intervals over which that node is a root.
fn root_lineages(ts: &TreeSequence) -> Vec<Lineage> {
    let mut by_node: Vec<(NodeId, Vec<Seg>)> = vec![];
    for tree in ts.trees() {
        let (left, right) = tree.interval;
        for root in tree.roots() {
            match by_node.iter_mut().find(|(node, _)| *node == root) {
                Some((_, segs)) => {
                    let last = segs.last_mut().expect("non-empty root segments");
                    if last.right == left {
                        last.right = right;
                    } else {
                        segs.push(Seg {
                            left,
                            right,
                            node: root,
                        });
                    }
                }
                None => by_node.push((
                    root,
                    vec![Seg {
                        left,
                        right,
                        node: root,
                    }],
                )),
            }
        }
    }
    by_node
        .into_iter()
        .map(|(node, segs)| Lineage {
            population: ts.node_population(node),
            segs,
        })
        .collect()
}

fn count_per_population(lineages: &[Lineage]) -> [usize; NUM_POPULATIONS] {
    let mut counts = [0usize; NUM_POPULATIONS];
    for lineage in lineages {
        counts[lineage.population] += 1;
    }
    counts
}

/// Drop every interval carried by exactly one lineage: that material has
/// found its most recent common ancestor and needs no further history.
fn prune_coalesced(lineages: &mut Vec<Lineage>) {
    let mut boundaries: Vec<(f64, i32)> = vec![];
    for lineage in lineages.iter() {
        for seg in &lineage.segs {
            boundaries.push((seg.left, 1));
            boundaries.push((seg.right, -1));
        }
    }
    boundaries.sort_by(|a, b| a.0.total_cmp(&b.0).then(b.1.cmp(&a.1)));

    // intervals where at least two lineages still carry material
    let mut active: Vec<(f64, f64)> = vec![];
    let mut depth = 0;
    let mut start = 0.0;
    for (pos, delta) in boundaries {
        if depth >= 2 && pos > start {
            match active.last_mut() {
                Some(last) if last.1 == start => last.1 = pos,
                _ => active.push((start, pos)),
            }
        }
        depth += delta;
        start = pos;
    }

    for lineage in lineages.iter_mut() {
        let mut kept = vec![];
        for seg in &lineage.segs {
            for &(left, right) in &active {
                let l = seg.left.max(left);
                let r = seg.right.min(right);
                if l < r {
                    kept.push(Seg {
                        left: l,
                        right: r,
                        node: seg.node,
                    });
                }
            }
        }
        // re-merge pieces split at active-interval boundaries
        let mut merged: Vec<Seg> = vec![];
        for seg in kept {
            match merged.last_mut() {
                Some(last) if last.node == seg.node && last.right == seg.left => {
                    last.right = seg.right;
                }
                _ => merged.push(seg),
            }
        }
        lineage.segs = merged;
    }
    lineages.retain(|l| !l.segs.is_empty());
}

fn coalesce_random_pair(
    lineages: &mut Vec<Lineage>,
    population: usize,
    time: f64,
    tables: &mut TableCollection,
    rng: &mut StdRng,
) {
    let members: Vec<usize> = lineages
        .iter()
        .enumerate()
        .filter(|(_, l)| l.population == population)
        .map(|(i, _)| i)
        .collect();
    if members.len() < 2 {
        return;
    }
    let a = members[rng.gen_range(0..members.len())];
    let b = loop {
        let b = members[rng.gen_range(0..members.len())];
        if b != a {
            break b;
        }
    };
    let (first, second) = (a.min(b), a.max(b));
    let rhs = lineages.remove(second);
    let lhs = lineages.remove(first);
    let merged = merge_lineages(lhs, rhs, population, time, tables);
    lineages.push(merged);
}

/// Merge two lineages into their common ancestor. Where their material
/// overlaps, a new node is recorded with an edge to each carrier; where
/// only one side carries material it passes through unchanged.
fn merge_lineages(
    lhs: Lineage,
    rhs: Lineage,
    population: usize,
    time: f64,
    tables: &mut TableCollection,
) -> Lineage {
    let mut breakpoints: Vec<f64> = lhs
        .segs
        .iter()
        .chain(rhs.segs.iter())
        .flat_map(|s| [s.left, s.right])
        .collect();
    breakpoints.sort_by(f64::total_cmp);
    breakpoints.dedup();

    let mut ancestor: Option<NodeId> = None;
    let mut merged: Vec<Seg> = vec![];
    let mut pending_edges: Vec<(f64, f64, NodeId)> = vec![];

    for window in breakpoints.windows(2) {
        let (left, right) = (window[0], window[1]);
        let covers = |segs: &[Seg]| {
            segs.iter()
                .find(|s| s.left <= left && s.right >= right)
                .map(|s| s.node)
        };
        let on_lhs = covers(&lhs.segs);
        let on_rhs = covers(&rhs.segs);
        let node = match (on_lhs, on_rhs) {
            (Some(x), Some(y)) => {
                let ancestor = *ancestor
                    .get_or_insert_with(|| tables.add_node(time, population, NULL, false));
                pending_edges.push((left, right, x));
                pending_edges.push((left, right, y));
                ancestor
            }
            (Some(x), None) | (None, Some(x)) => x,
            (None, None) => continue,
        };
        match merged.last_mut() {
            Some(last) if last.node == node && last.right == left => last.right = right,
            _ => merged.push(Seg { left, right, node }),
        }
    }

    if let Some(parent) = ancestor {
        pending_edges.sort_by(|a, b| a.2.cmp(&b.2).then(a.0.total_cmp(&b.0)));
        for (left, right, child) in pending_edges {
            match tables.edges.last_mut() {
                Some(last)
                    if last.parent == parent && last.child == child && last.right == left =>
                {
                    last.right = right;
                }
                _ => tables.add_edge(left, right, parent, child),
            }
        }
    }

    Lineage {
        segs: merged,
        population,
    }
}

fn recombine(lineages: &mut Vec<Lineage>, rate: f64, mut pick: f64, rng: &mut StdRng) {
    let mut chosen = lineages.len() - 1;
    for (i, lineage) in lineages.iter().enumerate() {
        let weight = rate * lineage.span();
        if pick < weight {
            chosen = i;
            break;
        }
        pick -= weight;
    }
    let lineage = &lineages[chosen];
    let breakpoint = rng.gen_range(lineage.leftmost()..lineage.rightmost());

    let mut head = vec![];
    let mut tail = vec![];
    for seg in &lineage.segs {
        if seg.right <= breakpoint {
            head.push(*seg);
        } else if seg.left >= breakpoint {
            tail.push(*seg);
        } else {
            head.push(Seg {
                left: seg.left,
                right: breakpoint,
                node: seg.node,
            });
            tail.push(Seg {
                left: breakpoint,
                right: seg.right,
                node: seg.node,
            });
        }
    }
    // a breakpoint at the extreme edge of the span separates nothing
    if head.is_empty() || tail.is_empty() {
        return;
    }
    let population = lineage.population;
    lineages[chosen] = Lineage {
        segs: head,
        population,
    };
    lineages.push(Lineage {
        segs: tail,
        population,
    });
}

fn migrate(lineages: &mut [Lineage], migration: &[[f64; NUM_POPULATIONS]; NUM_POPULATIONS], mut pick: f64) {
    for lineage in lineages.iter_mut() {
        for (dest, rate) in migration[lineage.population].iter().enumerate() {
            if *rate <= 0.0 {
                continue;
            }
            if pick < *rate {
                lineage.population = dest;
                return;
            }
            pick -= rate;
        }
    }
}

fn apply_event(
    event: &DemographicEvent,
    now: f64,
    lineages: &mut Vec<Lineage>,
    pop_size: &mut [f64; NUM_POPULATIONS],
    migration: &mut [[f64; NUM_POPULATIONS]; NUM_POPULATIONS],
    tables: &mut TableCollection,
    rng: &mut StdRng,
) {
    match *event {
        DemographicEvent::PopulationSizeChange {
            population, size, ..
        } => {
            pop_size[population.index()] = size;
        }
        DemographicEvent::MigrationRateChange {
            source, dest, rate, ..
        } => {
            migration[source.index()][dest.index()] = rate;
        }
        DemographicEvent::MassMigration {
            source,
            dest,
            proportion,
            ..
        } => {
            for lineage in lineages.iter_mut() {
                if lineage.population != source.index() {
                    continue;
                }
                if proportion >= 1.0 || rng.gen::<f64>() < proportion {
                    lineage.population = dest.index();
                }
            }
        }
        DemographicEvent::InstantaneousBottleneck {
            population,
            strength,
            ..
        } => {
            // `strength` generations of pair coalescence compressed into a
            // single instant; all nodes are recorded at the event time.
            let pop = population.index();
            let mut elapsed = 0.0;
            loop {
                let k = lineages.iter().filter(|l| l.population == pop).count() as f64;
                if k < 2.0 || pop_size[pop] <= 0.0 {
                    break;
                }
                let rate = k * (k - 1.0) / 2.0 / (2.0 * pop_size[pop]);
                elapsed += rng.sample(Exp::new(rate).expect("positive rate"));
                if elapsed > strength {
                    break;
                }
                coalesce_random_pair(lineages, pop, now, tables, rng);
                prune_coalesced(lineages);
            }
        }
    }
}
