use color_eyre::eyre::eyre;
use color_eyre::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use statrs::statistics::{Data, OrderStatistics};

use crate::args::NUM_POPULATIONS;
use crate::error::WildsimError::SampleSizeError;
use crate::structs::{NodeId, TreeSequence};
use crate::utils::precision_f64;

/// Draw `sample_sizes` individuals (ordered domestic, wild, captive) from
/// those alive at the present time, without replacement, and return both
/// genome copies per individual grouped by population: first every
/// individual's first node, then every second node.
///
/// The draw is seeded for reproducibility. Note that node ids are not
/// stable across simplification; re-derive samples from the simplified
/// tree sequence rather than reusing these ids.
pub fn sample_nodes(
    ts: &TreeSequence,
    sample_sizes: &[usize; NUM_POPULATIONS],
    seed: u64,
) -> Result<Vec<Vec<NodeId>>> {
    let alive = ts.individuals_alive_at(0.0);
    let individuals = &ts.tables().individuals;

    let mut grouped = Vec::with_capacity(NUM_POPULATIONS);
    for (pop, &wanted) in sample_sizes.iter().enumerate() {
        let members: Vec<usize> = alive
            .iter()
            .copied()
            .filter(|&i| individuals[i].population == pop)
            .collect();
        if wanted > members.len() {
            return Err(eyre!(SampleSizeError((pop, wanted, members.len()))));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let chosen = rand::seq::index::sample(&mut rng, members.len(), wanted);
        let mut nodes = Vec::with_capacity(2 * wanted);
        for idx in chosen.iter() {
            nodes.push(individuals[members[idx]].nodes[0]);
        }
        for idx in chosen.iter() {
            nodes.push(individuals[members[idx]].nodes[1]);
        }
        grouped.push(nodes);
    }
    Ok(grouped)
}

/// Print descriptive statistics of a tree sequence.
pub fn tree_summary(ts: &TreeSequence) {
    println!("{}", render_summary(ts));
}

fn render_summary(ts: &TreeSequence) -> String {
    let mut num_trees = 0usize;
    let mut coalesced = 0usize;
    let mut root_times = vec![];
    for tree in ts.trees() {
        num_trees += 1;
        let roots = tree.roots();
        if roots.len() == 1 {
            coalesced += 1;
        }
        for root in roots {
            root_times.push(ts.node_time(root));
        }
    }

    let max = root_times.iter().copied().fold(f64::NAN, f64::max);
    let min = root_times.iter().copied().fold(f64::NAN, f64::min);
    let median = precision_f64(Data::new(root_times).median(), 6);
    let fraction = precision_f64(coalesced as f64 / num_trees as f64, 6);

    format!(
        "Number of trees: {num_trees}\n\
         Fraction of trees coalesced: {fraction}\n\
         Root times: max={max}, min={min}, median={median}\n\
         Number of alive individuals: {}\n\
         Number of samples: {}\n\
         Number of populations: {}\n\
         Number of mutations: {}\n\
         Sequence length: {}",
        ts.individuals_alive_at(0.0).len(),
        ts.num_samples(),
        ts.num_populations(),
        ts.num_mutations(),
        ts.sequence_length(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{TableCollection, NULL};

    /// Diploid individuals: 3 domestic, 4 wild, 2 captive, all alive now.
    fn fixture() -> TreeSequence {
        let mut tables = TableCollection::new(100.0);
        tables.add_population("domestic");
        tables.add_population("wild");
        tables.add_population("captive");
        for (pop, count) in [(0usize, 3usize), (1, 4), (2, 2)] {
            for _ in 0..count {
                let a = tables.add_node(0.0, pop, NULL, true);
                let b = tables.add_node(0.0, pop, NULL, true);
                let ind = tables.add_individual(pop, 0.0, [a, b]);
                tables.nodes[a as usize].individual = ind;
                tables.nodes[b as usize].individual = ind;
            }
        }
        // one shared ancestor keeps every tree rooted
        let nodes: Vec<NodeId> = (0..tables.nodes.len() as NodeId).collect();
        let root = tables.add_node(30.0, 0, NULL, false);
        for node in nodes {
            tables.add_edge(0.0, 100.0, root, node);
        }
        TreeSequence::new(tables).unwrap()
    }

    #[test]
    fn test_sample_counts_and_uniqueness() {
        let ts = fixture();
        let samples = sample_nodes(&ts, &[2, 3, 1], 42).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].len(), 4);
        assert_eq!(samples[1].len(), 6);
        assert_eq!(samples[2].len(), 2);
        for group in &samples {
            let mut unique = group.clone();
            unique.sort_unstable();
            unique.dedup();
            assert_eq!(unique.len(), group.len(), "duplicate node in sample");
        }
    }

    #[test]
    fn test_sampling_is_seeded() {
        let ts = fixture();
        let first = sample_nodes(&ts, &[2, 3, 1], 7).unwrap();
        let second = sample_nodes(&ts, &[2, 3, 1], 7).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_oversampling_fails() {
        let ts = fixture();
        let result = sample_nodes(&ts, &[2, 5, 1], 7);
        assert!(result.is_err());
        let msg = format!("{:?}", result.unwrap_err());
        assert!(msg.contains("population 1"));
    }

    #[test]
    fn test_summary_contents() {
        let ts = fixture();
        let text = render_summary(&ts);
        assert!(text.contains("Number of trees: 1"));
        assert!(text.contains("Fraction of trees coalesced: 1"));
        assert!(text.contains("Number of alive individuals: 9"));
        assert!(text.contains("Number of samples: 18"));
        assert!(text.contains("Number of populations: 3"));
        assert!(text.contains("Sequence length: 100"));
        assert!(text.contains("median=30"));
    }
}
