use std::path::PathBuf;
use std::time::Instant;

use color_eyre::Result;

use crate::args::{ForwardParams, RecapParams, SeqFeatures};
use crate::sim::command::build_command;
use crate::sim::demography::demographic_model;
use crate::sim::recapitate::complete_tree_sequence;
use crate::sim::runner::run_forward;
use crate::sim::sample::tree_summary;
use crate::structs::TreeSequence;
use crate::utils::check_prior;

/// One full run: forward stage, recapitation, mutation overlay, summary.
#[doc(hidden)]
pub fn run(
    template: PathBuf,
    seq: SeqFeatures,
    forward: ForwardParams,
    recap: RecapParams,
    seed: u64,
    no_suffix: bool,
    decap_trees_filename: String,
    script_filename: String,
    debug_demography: bool,
) -> Result<()> {
    let start = Instant::now();

    for warning in check_prior(&recap) {
        tracing::warn!("{warning}");
    }

    let cmd = build_command(
        &template,
        &seq,
        &forward,
        seed,
        !no_suffix,
        &decap_trees_filename,
        &script_filename,
    )?;

    tracing::info!("running the forward simulator");
    let tables = run_forward(&cmd, seed)?;
    let decap = TreeSequence::new(tables)?;
    tracing::info!(
        "forward stage produced {} nodes over {} trees",
        decap.num_nodes(),
        decap.num_trees()
    );

    let events = demographic_model(&recap);
    let ts = complete_tree_sequence(&decap, &events, &cmd.sizes, &seq, seed, debug_demography)?;

    tree_summary(&ts);
    println!("Simulation finished in {:.2} s", start.elapsed().as_secs_f64());
    println!("Command ran:");
    println!("{}", cmd.command);

    Ok(())
}
