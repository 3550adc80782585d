use std::path::{Path, PathBuf};
use std::process::Command;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;

use crate::error::WildsimError::SimulatorError;
use crate::io::read_tables;
use crate::sim::command::{add_suffix, ForwardCommand};
use crate::structs::TableCollection;

/// Run the forward simulator and load its decapitated tree sequence.
///
/// The command is written to a seed-suffixed file and executed through
/// `bash`; running from a file avoids shell quoting games. A non-zero exit
/// status is an error and the output file is never loaded after one. On
/// success both the command file and the raw output file are removed; only
/// the in-memory tables survive.
pub fn run_forward(cmd: &ForwardCommand, seed: u64) -> Result<TableCollection> {
    let command_path = PathBuf::from(add_suffix("_temporary_command.txt", seed));
    std::fs::write(&command_path, &cmd.command)
        .wrap_err_with(|| format!("failed to write command file {command_path:?}"))?;

    let status = Command::new("bash")
        .arg(&command_path)
        .status()
        .wrap_err("failed to launch bash for the forward simulator")?;

    if !status.success() {
        // Keep the command file around so the failure can be reproduced
        return Err(eyre!(SimulatorError((
            status.code(),
            command_path.display().to_string()
        ))));
    }

    let tables = read_tables(&cmd.decap_trees_path)?;

    remove_or_warn(&command_path);
    remove_or_warn(&cmd.decap_trees_path);

    Ok(tables)
}

fn remove_or_warn(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        tracing::warn!("could not remove temporary file {}: {err}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::PopulationSizes;
    use crate::io::write_tables;
    use crate::structs::{TableCollection, NULL};

    fn scratch(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("wildsim_runner_test_{}_{name}", std::process::id()));
        path
    }

    fn fake_tables() -> TableCollection {
        let mut tables = TableCollection::new(10.0);
        tables.add_population("domestic");
        tables.add_node(0.0, 0, NULL, true);
        tables
    }

    fn command_for(shell: &str, output: &Path) -> ForwardCommand {
        ForwardCommand {
            command: shell.to_string(),
            decap_trees_path: output.to_path_buf(),
            sizes: PopulationSizes {
                domestic: 10,
                wild: 10,
                captive: 5,
            },
        }
    }

    #[test]
    fn test_successful_run_loads_and_cleans_up() {
        let output = scratch("ok.trees");
        // the "simulator" here just copies a pre-staged file into place
        let staged = scratch("staged.trees");
        write_tables(&staged, &fake_tables()).unwrap();
        let shell = format!("cp {} {}", staged.display(), output.display());
        let cmd = command_for(&shell, &output);

        let tables = run_forward(&cmd, 4242).unwrap();
        assert_eq!(tables.nodes.len(), 1);
        assert!(!output.exists(), "raw output file should be deleted");
        assert!(!PathBuf::from(add_suffix("_temporary_command.txt", 4242)).exists());
        std::fs::remove_file(&staged).unwrap();
    }

    #[test]
    fn test_failing_run_is_an_error_and_never_loads() {
        let output = scratch("fail.trees");
        // the output file exists and is stale; a failed run must not load it
        write_tables(&output, &fake_tables()).unwrap();
        let cmd = command_for("exit 3", &output);

        let result = run_forward(&cmd, 4343);
        assert!(result.is_err());
        let msg = format!("{:?}", result.unwrap_err());
        assert!(msg.contains("status 3"), "unexpected error: {msg}");
        // stale output still on disk, untouched
        assert!(output.exists());
        std::fs::remove_file(&output).unwrap();
        std::fs::remove_file(add_suffix("_temporary_command.txt", 4343)).unwrap();
    }
}
