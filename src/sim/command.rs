use std::path::{Path, PathBuf};

use color_eyre::eyre::WrapErr;
use color_eyre::Result;

use crate::args::{ForwardParams, PopulationSizes, SeqFeatures};

/// A fully resolved forward-simulator invocation, together with the
/// run parameters the later stages need. Building this value is the only
/// place the output filename and population sizes are decided.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardCommand {
    /// Shell command with every placeholder substituted
    pub command: String,
    /// Where the simulator will write the decapitated tree sequence
    pub decap_trees_path: PathBuf,
    pub sizes: PopulationSizes,
}

/// Insert `_{seed}` before the last dot, so concurrent runs sharing a
/// working directory never collide on filenames.
pub fn add_suffix(filename: &str, seed: u64) -> String {
    match filename.rfind('.') {
        Some(dot) => format!("{}_{}{}", &filename[..dot], seed, &filename[dot..]),
        None => format!("{filename}_{seed}"),
    }
}

/// Build the forward-simulator command from a template file.
///
/// Placeholders are `p_`-prefixed tokens replaced verbatim. A placeholder
/// missing from the template is reported as a warning and skipped; the
/// command is still returned.
pub fn build_command(
    template_path: &Path,
    seq: &SeqFeatures,
    params: &ForwardParams,
    seed: u64,
    suffix: bool,
    decap_trees_filename: &str,
    script_filename: &str,
) -> Result<ForwardCommand> {
    let decap_trees_filename = if suffix {
        add_suffix(decap_trees_filename, seed)
    } else {
        decap_trees_filename.to_string()
    };

    let replacements = [
        ("p_pop_size_domestic_1", params.pop_size_domestic_1.to_string()),
        ("p_pop_size_wild_1", params.pop_size_wild_1.to_string()),
        ("p_pop_size_captive", params.pop_size_captive.to_string()),
        ("p_length", seq.length.to_string()),
        ("p_recombination_rate", seq.recombination_rate.to_string()),
        ("p_migration_length_1", params.migration_length_1.to_string()),
        ("p_migration_rate_1", params.migration_rate_1.to_string()),
        ("p_captive_time", params.captive_time.to_string()),
        ("p_random_seed", seed.to_string()),
        ("p_script_filename", script_filename.to_string()),
        ("p_decap_trees_filename", decap_trees_filename.clone()),
    ];

    let mut command = std::fs::read_to_string(template_path)
        .wrap_err_with(|| format!("failed to read command template {template_path:?}"))?;

    for (placeholder, value) in &replacements {
        if command.contains(placeholder) {
            command = command.replace(placeholder, value);
        } else {
            tracing::warn!("The placeholder {placeholder} could not be found in the template file");
        }
    }

    Ok(ForwardCommand {
        command,
        decap_trees_path: PathBuf::from(decap_trees_filename),
        sizes: PopulationSizes::from(params),
    })
}
