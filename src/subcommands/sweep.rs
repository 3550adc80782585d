use std::path::{Path, PathBuf};
use std::time::Instant;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::args::{ForwardParams, RecapParams, SeqFeatures, SliceArgs, NUM_POPULATIONS};
use crate::error::WildsimError::EmptySliceError;
use crate::io::{column_f64, open_csv_writer, read_feather, write_feather};
use crate::sim::command::build_command;
use crate::sim::demography::demographic_model;
use crate::sim::recapitate::complete_tree_sequence;
use crate::sim::runner::run_forward;
use crate::sim::sample::sample_nodes;
use crate::stats::{afs_stats, r2_stats, tree_stats, StatMap};
use crate::structs::{NodeId, TreeSequence};
use crate::utils::check_prior;

const R2_BREAKPOINTS: [f64; 4] = [0.0, 1e6, 2e6, 4e6];
const R2_LABELS: [&str; 3] = ["0_1Mb", "1_2Mb", "2_4Mb"];

/// Run the pipeline over a contiguous slice of prior rows and write one
/// summary-statistics row per run. A failed statistic family leaves its
/// columns NaN for that row; a failed run leaves everything but the seed
/// NaN. Neither aborts the batch.
#[doc(hidden)]
pub fn run(
    prior: PathBuf,
    output: PathBuf,
    slice: SliceArgs,
    seq: SeqFeatures,
    template: PathBuf,
    decap_trees_filename: String,
    script_filename: String,
    sample_sizes: Vec<usize>,
    csv: bool,
) -> Result<()> {
    let start = Instant::now();

    let sizes: [usize; NUM_POPULATIONS] = sample_sizes
        .try_into()
        .map_err(|_| eyre!("exactly {NUM_POPULATIONS} sample sizes are required"))?;

    let prior_df = read_feather(&prior)?;
    let (start_row, end_row) = slice.row_range(prior_df.height());
    if start_row >= end_row {
        return Err(eyre!(EmptySliceError((start_row, prior_df.height()))));
    }
    tracing::info!(
        "task {} processing prior rows {start_row}..{end_row}",
        slice.task_index
    );

    let mut rows: Vec<StatMap> = vec![];
    for i in start_row..end_row {
        let seed = column_f64(&prior_df, "random_seed", i)?.round() as u64;
        let forward = forward_params_from_row(&prior_df, i)?;
        let recap = recap_params_from_row(&prior_df, i)?;
        for warning in check_prior(&recap) {
            tracing::warn!("prior row {i}: {warning}");
        }

        let mut row = StatMap::new();
        row.insert("random_seed".to_string(), seed as f64);

        match run_one(
            &template,
            &seq,
            &forward,
            &recap,
            seed,
            &decap_trees_filename,
            &script_filename,
            &sizes,
        ) {
            Ok(families) => {
                for (name, result) in families {
                    match result {
                        Ok(stats) => row.extend(stats),
                        Err(err) => tracing::error!(
                            "The statistic family {name} failed on parameter index {i}: {err}"
                        ),
                    }
                }
            }
            Err(err) => {
                tracing::error!("simulation failed on parameter index {i}: {err}");
            }
        }
        rows.push(row);
        tracing::info!("finished prior row {i}");
    }

    let extension = if csv { "csv" } else { "feather" };
    let mut path = output;
    path.push(format!("summary_stats_{}.{extension}", slice.task_index));
    if csv {
        write_csv(&path, &rows)?;
    } else {
        let mut frame = assemble_frame(&rows)?;
        write_feather(&path, &mut frame)?;
    }

    println!(
        "Simulations completed in {:.2} hours",
        start.elapsed().as_secs_f64() / 3600.0
    );
    Ok(())
}

type FamilyResults = Vec<(&'static str, Result<StatMap>)>;

fn run_one(
    template: &Path,
    seq: &SeqFeatures,
    forward: &ForwardParams,
    recap: &RecapParams,
    seed: u64,
    decap_trees_filename: &str,
    script_filename: &str,
    sample_sizes: &[usize; NUM_POPULATIONS],
) -> Result<FamilyResults> {
    let cmd = build_command(
        template,
        seq,
        forward,
        seed,
        true,
        decap_trees_filename,
        script_filename,
    )?;
    let tables = run_forward(&cmd, seed)?;
    let decap = TreeSequence::new(tables)?;

    let events = demographic_model(recap);
    let ts = complete_tree_sequence(&decap, &events, &cmd.sizes, seq, seed, false)?;

    let samples = sample_nodes(&ts, sample_sizes, seed)?;
    let flat: Vec<NodeId> = samples.concat();
    let ts = ts.simplify(Some(&flat))?;
    // node ids moved during simplification; regroup from the new sequence
    let groups = ts.samples_by_population();

    Ok(vec![
        ("tree_stats", tree_stats(&ts, &groups)),
        ("afs_stats", afs_stats(&ts, &groups)),
        (
            "r2_stats",
            r2_stats(&ts, &groups, &R2_BREAKPOINTS, &R2_LABELS),
        ),
    ])
}

fn forward_params_from_row(df: &DataFrame, row: usize) -> Result<ForwardParams> {
    Ok(ForwardParams {
        pop_size_domestic_1: column_f64(df, "pop_size_domestic_1", row)?.round() as u32,
        pop_size_wild_1: column_f64(df, "pop_size_wild_1", row)?.round() as u32,
        pop_size_captive: column_f64(df, "pop_size_captive", row)?.round() as u32,
        migration_length_1: column_f64(df, "migration_length_1", row)?.round() as u32,
        migration_rate_1: column_f64(df, "migration_rate_1", row)?,
        captive_time: column_f64(df, "captive_time", row)?.round() as u32,
    })
}

fn recap_params_from_row(df: &DataFrame, row: usize) -> Result<RecapParams> {
    Ok(RecapParams {
        pop_size_domestic_2: column_f64(df, "pop_size_domestic_2", row)?.round() as u32,
        pop_size_wild_2: column_f64(df, "pop_size_wild_2", row)?.round() as u32,
        div_time: column_f64(df, "div_time", row)?.round(),
        migration_rate_2: column_f64(df, "migration_rate_2", row)?,
        migration_length_2: column_f64(df, "migration_length_2", row)?.round(),
        bottleneck_time_wild: column_f64(df, "bottleneck_time_wild", row)?.round(),
        bottleneck_strength_wild: column_f64(df, "bottleneck_strength_wild", row)?.round(),
        bottleneck_time_domestic: column_f64(df, "bottleneck_time_domestic", row)?.round(),
        bottleneck_strength_domestic: column_f64(df, "bottleneck_strength_domestic", row)?
            .round(),
    })
}

fn column_union(rows: &[StatMap]) -> Vec<String> {
    let mut columns: Vec<String> = vec![];
    for row in rows {
        for key in row.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

/// Union of all row columns in first-seen order, NaN-filled where a row
/// has no value for a column.
fn assemble_frame(rows: &[StatMap]) -> Result<DataFrame> {
    let columns = column_union(rows);
    let series: Vec<Series> = columns
        .iter()
        .map(|col| {
            let values: Vec<f64> = rows
                .iter()
                .map(|row| row.get(col).copied().unwrap_or(f64::NAN))
                .collect();
            Series::new(col, values)
        })
        .collect();
    Ok(DataFrame::new(series)?)
}

fn write_csv(path: &Path, rows: &[StatMap]) -> Result<()> {
    let columns = column_union(rows);
    let mut writer = open_csv_writer(path.to_path_buf())?;
    writer.write_record(&columns)?;
    for row in rows {
        let record: Vec<String> = columns
            .iter()
            .map(|col| row.get(col).copied().unwrap_or(f64::NAN).to_string())
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::write_tables;
    use crate::structs::{TableCollection, NULL};

    fn scratch_dir(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("wildsim_sweep_test_{}_{name}", std::process::id()));
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    fn prior_row(seed: i64) -> DataFrame {
        let columns: Vec<(&str, f64)> = vec![
            ("pop_size_domestic_1", 100.0),
            ("pop_size_wild_1", 100.0),
            ("pop_size_captive", 50.0),
            ("migration_length_1", 20.0),
            ("migration_rate_1", 0.05),
            ("captive_time", 20.0),
            ("pop_size_domestic_2", 200.0),
            ("pop_size_wild_2", 200.0),
            ("div_time", 500.0),
            ("migration_rate_2", 0.01),
            ("migration_length_2", 100.0),
            ("bottleneck_time_wild", 300.0),
            ("bottleneck_strength_wild", 100.0),
            ("bottleneck_time_domestic", 300.0),
            ("bottleneck_strength_domestic", 100.0),
        ];
        let mut series = vec![Series::new("random_seed", vec![seed])];
        for (name, value) in columns {
            series.push(Series::new(name, vec![value]));
        }
        DataFrame::new(series).unwrap()
    }

    /// One diploid individual per population; captive genomes descend from
    /// the domestic first-generation root, as in the forward model.
    fn decap_tables() -> TableCollection {
        let mut tables = TableCollection::new(1000.0);
        tables.add_population("domestic");
        tables.add_population("wild");
        tables.add_population("captive");
        let mut nodes = vec![];
        for pop in 0..3 {
            let a = tables.add_node(0.0, pop, NULL, true);
            let b = tables.add_node(0.0, pop, NULL, true);
            let ind = tables.add_individual(pop, 0.0, [a, b]);
            tables.nodes[a as usize].individual = ind;
            tables.nodes[b as usize].individual = ind;
            nodes.push((a, b));
        }
        let root_domestic = tables.add_node(50.0, 0, NULL, false);
        let root_wild = tables.add_node(50.0, 1, NULL, false);
        for (a, b) in [nodes[0], nodes[2]] {
            tables.add_edge(0.0, 1000.0, root_domestic, a);
            tables.add_edge(0.0, 1000.0, root_domestic, b);
        }
        tables.add_edge(0.0, 1000.0, root_wild, nodes[1].0);
        tables.add_edge(0.0, 1000.0, root_wild, nodes[1].1);
        tables
    }

    #[test]
    fn test_param_extraction_rounds_counts_not_rates() {
        let df = prior_row(11);
        let forward = forward_params_from_row(&df, 0).unwrap();
        assert_eq!(forward.pop_size_domestic_1, 100);
        assert_eq!(forward.migration_rate_1, 0.05);
        let recap = recap_params_from_row(&df, 0).unwrap();
        assert_eq!(recap.div_time, 500.0);
        assert_eq!(recap.migration_rate_2, 0.01);
    }

    #[test]
    fn test_assemble_frame_fills_missing_with_nan() {
        let mut first = StatMap::new();
        first.insert("random_seed".into(), 1.0);
        first.insert("diversity_wild".into(), 0.5);
        let mut second = StatMap::new();
        second.insert("random_seed".into(), 2.0);
        let frame = assemble_frame(&[first, second]).unwrap();
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.width(), 2);
        assert_eq!(column_f64(&frame, "diversity_wild", 0).unwrap(), 0.5);
        assert!(column_f64(&frame, "diversity_wild", 1).unwrap().is_nan());
    }

    #[test]
    fn test_sweep_end_to_end_with_fake_simulator() {
        let dir = scratch_dir("end_to_end");
        let staged = dir.join("staged.trees");
        write_tables(&staged, &decap_tables()).unwrap();

        // the "forward simulator" copies the staged tables into place
        let template_path = dir.join("template.txt");
        std::fs::write(
            &template_path,
            format!(
                "cp {} p_decap_trees_filename # seed p_random_seed length p_length \
                 sizes p_pop_size_domestic_1 p_pop_size_wild_1 p_pop_size_captive \
                 rates p_recombination_rate p_migration_rate_1 p_migration_length_1 \
                 p_captive_time p_script_filename",
                staged.display()
            ),
        )
        .unwrap();

        let seq = SeqFeatures {
            length: 1000,
            recombination_rate: 1e-8,
            mutation_rate: 1e-4,
        };
        let prior_path = dir.join("prior.feather");
        write_feather(&prior_path, &mut prior_row(11)).unwrap();

        let decap_out = dir.join("decap.trees");
        run(
            prior_path,
            dir.clone(),
            SliceArgs {
                task_index: 0,
                runs_per_task: 2,
            },
            seq,
            template_path,
            decap_out.display().to_string(),
            "model.txt".to_string(),
            vec![1, 1, 1],
            false,
        )
        .unwrap();

        let result = read_feather(&dir.join("summary_stats_0.feather")).unwrap();
        assert_eq!(result.height(), 1);
        assert_eq!(column_f64(&result, "random_seed", 0).unwrap(), 11.0);
        // the run succeeded, so the statistic families are populated
        assert!(column_f64(&result, "segregating_sites", 0).unwrap() >= 0.0);
        assert!(!column_f64(&result, "diversity_wild", 0).unwrap().is_nan());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_write_csv_output() {
        let dir = scratch_dir("csv");
        let mut first = StatMap::new();
        first.insert("random_seed".into(), 1.0);
        first.insert("diversity_wild".into(), 0.25);
        let mut second = StatMap::new();
        second.insert("random_seed".into(), 2.0);
        let path = dir.join("summary_stats_0.csv");
        write_csv(&path, &[first, second]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("random_seed,diversity_wild"));
        assert!(text.contains("1,0.25"));
        assert!(text.contains("2,NaN"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_sweep_slice_past_table_end_is_an_error() {
        let dir = scratch_dir("bad_slice");
        let prior_path = dir.join("prior.feather");
        write_feather(&prior_path, &mut prior_row(3)).unwrap();

        let seq = SeqFeatures {
            length: 1000,
            recombination_rate: 1e-8,
            mutation_rate: 1e-4,
        };
        let result = run(
            prior_path,
            dir.clone(),
            SliceArgs {
                task_index: 5,
                runs_per_task: 10,
            },
            seq,
            dir.join("template.txt"),
            "decap.trees".to_string(),
            "model.txt".to_string(),
            vec![1, 1, 1],
            false,
        );
        assert!(result.is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
