use std::collections::HashMap;

use color_eyre::eyre::ensure;
use color_eyre::Result;
use indexmap::IndexMap;
use itertools::Itertools;
use statrs::statistics::{Data, OrderStatistics, Statistics};

use crate::args::{Population, NUM_POPULATIONS};
use crate::structs::{NodeId, TreeSequence};

/// One named family's worth of summary statistics, in insertion order.
pub type StatMap = IndexMap<String, f64>;

/// Cap on site pairs aggregated per linkage-disequilibrium distance bin.
const MAX_PAIRS_PER_BIN: usize = 500;

/// Per-site derived-allele bookkeeping over the chosen samples.
struct Site {
    position: f64,
    derived_per_pop: Vec<usize>,
    carriers: Vec<bool>,
}

fn site_spectrum(ts: &TreeSequence, samples: &[Vec<NodeId>]) -> Vec<Site> {
    let mut flat_index: HashMap<NodeId, (usize, usize)> = HashMap::new();
    let mut offset = 0;
    for (pop, group) in samples.iter().enumerate() {
        for (i, &node) in group.iter().enumerate() {
            flat_index.insert(node, (pop, offset + i));
        }
        offset += group.len();
    }
    let total: usize = samples.iter().map(Vec::len).sum();

    let mut sites = vec![];
    for tree in ts.trees() {
        for mutation in tree.mutations() {
            let mut derived_per_pop = vec![0usize; samples.len()];
            let mut carriers = vec![false; total];
            for node in tree.samples_below(mutation.node) {
                if let Some(&(pop, idx)) = flat_index.get(&node) {
                    derived_per_pop[pop] += 1;
                    carriers[idx] = true;
                }
            }
            sites.push(Site {
                position: mutation.position,
                derived_per_pop,
                carriers,
            });
        }
    }
    sites
}

/// Diversity, divergence and Fst per population pair, global segregating
/// sites and median root time.
pub fn tree_stats(ts: &TreeSequence, samples: &[Vec<NodeId>]) -> Result<StatMap> {
    ensure!(
        samples.len() == NUM_POPULATIONS,
        "tree_stats needs one sample group per population"
    );
    for (pop, group) in samples.iter().enumerate() {
        ensure!(
            group.len() >= 2,
            "tree_stats needs at least two sampled genomes in population {pop}"
        );
    }
    let sites = site_spectrum(ts, samples);
    let seqlen = ts.sequence_length();
    let sizes: Vec<f64> = samples.iter().map(|g| g.len() as f64).collect();

    let mut stats = StatMap::new();

    let mut diversity = vec![0.0_f64; samples.len()];
    for site in &sites {
        for (pop, &n) in sizes.iter().enumerate() {
            let d = site.derived_per_pop[pop] as f64;
            diversity[pop] += 2.0 * d * (n - d) / (n * (n - 1.0));
        }
    }
    for population in Population::all() {
        stats.insert(
            format!("diversity_{population}"),
            diversity[population.index()] / seqlen,
        );
    }

    for (a, b) in Population::all().iter().tuple_combinations() {
        let (i, j) = (a.index(), b.index());
        let mut dxy = 0.0_f64;
        for site in &sites {
            let di = site.derived_per_pop[i] as f64;
            let dj = site.derived_per_pop[j] as f64;
            dxy += (di * (sizes[j] - dj) + (sizes[i] - di) * dj) / (sizes[i] * sizes[j]);
        }
        dxy /= seqlen;
        let within = (diversity[i] / seqlen + diversity[j] / seqlen) / 2.0;
        let fst = 1.0 - within / dxy;
        stats.insert(format!("divergence_{a}_{b}"), dxy);
        stats.insert(format!("fst_{a}_{b}"), fst);
    }

    let total: f64 = sizes.iter().sum();
    let segregating = sites
        .iter()
        .filter(|site| {
            let d: usize = site.derived_per_pop.iter().sum();
            d > 0 && (d as f64) < total
        })
        .count();
    stats.insert("segregating_sites".to_string(), segregating as f64);

    let mut root_times = vec![];
    for tree in ts.trees() {
        for root in tree.roots() {
            root_times.push(ts.node_time(root));
        }
    }
    stats.insert(
        "median_root_time".to_string(),
        Data::new(root_times).median(),
    );

    Ok(stats)
}

/// Folded allele-frequency-spectrum summaries per population.
pub fn afs_stats(ts: &TreeSequence, samples: &[Vec<NodeId>]) -> Result<StatMap> {
    ensure!(
        samples.len() == NUM_POPULATIONS,
        "afs_stats needs one sample group per population"
    );
    let sites = site_spectrum(ts, samples);
    let mut stats = StatMap::new();

    for population in Population::all() {
        let pop = population.index();
        let n = samples[pop].len();
        ensure!(
            n >= 2,
            "afs_stats needs at least two sampled genomes in population {pop}"
        );
        let minor_counts: Vec<usize> = sites
            .iter()
            .map(|site| site.derived_per_pop[pop].min(n - site.derived_per_pop[pop]))
            .filter(|&c| c > 0)
            .collect();

        let singletons = minor_counts.iter().filter(|&&c| c == 1).count();
        let maf: Vec<f64> = minor_counts.iter().map(|&c| c as f64 / n as f64).collect();

        stats.insert(
            format!("afs_singleton_prop_{population}"),
            singletons as f64 / minor_counts.len() as f64,
        );
        stats.insert(format!("afs_mean_maf_{population}"), (&maf).mean());
    }
    Ok(stats)
}

/// Mean pairwise r-squared within distance bins. `breakpoints` gives the
/// bin edges and `labels` names the `breakpoints.len() - 1` bins. At most
/// [`MAX_PAIRS_PER_BIN`] site pairs are aggregated per bin.
pub fn r2_stats(
    ts: &TreeSequence,
    samples: &[Vec<NodeId>],
    breakpoints: &[f64],
    labels: &[&str],
) -> Result<StatMap> {
    ensure!(
        breakpoints.len() == labels.len() + 1,
        "r2_stats needs one more breakpoint than labels"
    );
    let sites = site_spectrum(ts, samples);
    let total: usize = samples.iter().map(Vec::len).sum();
    let max_dist = breakpoints[breakpoints.len() - 1];

    let mut sums = vec![0.0_f64; labels.len()];
    let mut counts = vec![0usize; labels.len()];

    for (i, left) in sites.iter().enumerate() {
        for right in &sites[i + 1..] {
            let dist = right.position - left.position;
            if dist >= max_dist {
                break;
            }
            let bin = match breakpoints[..breakpoints.len() - 1]
                .iter()
                .rposition(|&b| dist >= b)
            {
                Some(bin) => bin,
                None => continue,
            };
            if counts[bin] >= MAX_PAIRS_PER_BIN {
                continue;
            }
            if let Some(r2) = pair_r2(left, right, total) {
                sums[bin] += r2;
                counts[bin] += 1;
            }
        }
    }

    let mut stats = StatMap::new();
    for (bin, label) in labels.iter().enumerate() {
        stats.insert(format!("r2_{label}"), sums[bin] / counts[bin] as f64);
    }
    Ok(stats)
}

fn pair_r2(a: &Site, b: &Site, total: usize) -> Option<f64> {
    let n = total as f64;
    let pa = a.carriers.iter().filter(|&&c| c).count() as f64 / n;
    let pb = b.carriers.iter().filter(|&&c| c).count() as f64 / n;
    let pab = a
        .carriers
        .iter()
        .zip(&b.carriers)
        .filter(|(&x, &y)| x && y)
        .count() as f64
        / n;
    let denom = pa * (1.0 - pa) * pb * (1.0 - pb);
    if denom <= 0.0 {
        return None;
    }
    let d = pab - pa * pb;
    Some(d * d / denom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{TableCollection, NULL};

    /// Two genomes per population; one mutation private to domestic on
    /// every genome copy there, one shared across everything.
    fn fixture() -> (TreeSequence, Vec<Vec<NodeId>>) {
        let mut tables = TableCollection::new(1000.0);
        tables.add_population("domestic");
        tables.add_population("wild");
        tables.add_population("captive");
        let mut samples = vec![];
        for pop in 0..3 {
            let a = tables.add_node(0.0, pop, NULL, true);
            let b = tables.add_node(0.0, pop, NULL, true);
            samples.push(vec![a, b]);
        }
        // domestic pair joins first, everything joins at the top
        let inner = tables.add_node(10.0, 0, NULL, false);
        tables.add_edge(0.0, 1000.0, inner, samples[0][0]);
        tables.add_edge(0.0, 1000.0, inner, samples[0][1]);
        let top = tables.add_node(40.0, 1, NULL, false);
        tables.add_edge(0.0, 1000.0, top, inner);
        for group in &samples[1..] {
            tables.add_edge(0.0, 1000.0, top, group[0]);
            tables.add_edge(0.0, 1000.0, top, group[1]);
        }
        // private to domestic (both copies), at 100
        tables.add_mutation(100.0, inner, 20.0);
        // private to one wild genome, at 200
        tables.add_mutation(200.0, samples[1][0], 5.0);
        let ts = TreeSequence::new(tables).unwrap();
        (ts, samples)
    }

    #[test]
    fn test_tree_stats_values() {
        let (ts, samples) = fixture();
        let stats = tree_stats(&ts, &samples).unwrap();

        // the domestic-private site is fixed within domestic: no diversity
        assert_eq!(stats["diversity_domestic"], 0.0);
        // the wild singleton contributes 2*1*1/(2*1) = 1 over L
        assert_eq!(stats["diversity_wild"], 1.0 / 1000.0);
        assert_eq!(stats["diversity_captive"], 0.0);

        // domestic/wild differ at site 100 fully (1.0) and at site 200 half
        let dxy = stats["divergence_domestic_wild"];
        assert!((dxy - 1.5 / 1000.0).abs() < 1e-12);

        assert_eq!(stats["segregating_sites"], 2.0);
        assert_eq!(stats["median_root_time"], 40.0);
    }

    #[test]
    fn test_tree_stats_rejects_empty_population() {
        let (ts, mut samples) = fixture();
        samples[2] = vec![];
        assert!(tree_stats(&ts, &samples).is_err());
    }

    #[test]
    fn test_afs_stats_values() {
        let (ts, samples) = fixture();
        let stats = afs_stats(&ts, &samples).unwrap();
        // the only polymorphic site within wild is a singleton
        assert_eq!(stats["afs_singleton_prop_wild"], 1.0);
        assert_eq!(stats["afs_mean_maf_wild"], 0.5);
        // nothing segregates within domestic: 0/0 and an empty mean
        assert!(stats["afs_singleton_prop_domestic"].is_nan());
    }

    #[test]
    fn test_r2_stats_bins() {
        let (ts, samples) = fixture();
        let stats = r2_stats(&ts, &samples, &[0.0, 150.0, 400.0], &["near", "far"]).unwrap();
        // the two sites are 100 apart: one pair in the "near" bin
        assert!(!stats["r2_near"].is_nan());
        assert!(stats["r2_far"].is_nan());
        assert!(stats["r2_near"] >= 0.0 && stats["r2_near"] <= 1.0);
    }

    #[test]
    fn test_r2_stats_label_mismatch() {
        let (ts, samples) = fixture();
        assert!(r2_stats(&ts, &samples, &[0.0, 100.0], &["a", "b"]).is_err());
    }
}
