use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::time::OffsetTime;

use crate::args::{ForwardParams, RecapParams, SeqFeatures, SliceArgs};
use crate::subcommands::{simulate, sweep};

#[derive(Parser, Debug)]
#[command(author, version, about, styles=get_styles())]
pub struct Arguments {
    #[command(subcommand)]
    cmd: SubCommand,
}

#[derive(Args, Debug, Clone)]
pub struct LogAndVerbosity {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, default_value_t = 3)]
    pub verbosity: u8,

    /// A file path to save logs to
    #[arg(short, long)]
    pub log_file: Option<PathBuf>,

    /// Silence all warning and info messages
    #[arg(long)]
    pub silent: bool,
}

#[derive(Subcommand, Debug)]
pub enum SubCommand {
    /// Run one forward + recapitation simulation and print a tree summary
    Simulate {
        /// Forward-simulator command template file
        template: PathBuf,

        #[command(flatten)]
        seq: SeqFeatures,

        #[command(flatten)]
        forward: ForwardParams,

        #[command(flatten)]
        recap: RecapParams,

        #[command(flatten)]
        log_and_verbosity: LogAndVerbosity,

        /// Random seed; the sole source of stochasticity
        #[arg(short, long, default_value_t = 2)]
        seed: u64,

        /// Do not add _{seed} to the simulator output filename
        #[arg(long)]
        no_suffix: bool,

        /// Filename the simulator writes the decapitated tree sequence to
        #[arg(long, default_value_t = String::from("decap.trees"))]
        decap_trees: String,

        /// Forward-model script filename substituted into the template
        #[arg(long, default_value_t = String::from("forward_model.txt"))]
        script: String,

        /// Print a trace of the demographic history before recapitating
        #[arg(long)]
        debug_demography: bool,
    },

    /// Run a slice of a prior table and write summary statistics per row
    Sweep {
        /// Prior-parameter table (feather), one row per run
        prior: PathBuf,

        /// Forward-simulator command template file
        #[arg(long)]
        template: PathBuf,

        #[command(flatten)]
        slice: SliceArgs,

        #[command(flatten)]
        seq: SeqFeatures,

        #[command(flatten)]
        log_and_verbosity: LogAndVerbosity,

        /// Output directory
        #[arg(short = 'o', long = "outdir", default_value_os_t = PathBuf::from("./"))]
        output: PathBuf,

        /// Filename the simulator writes the decapitated tree sequence to
        #[arg(long, default_value_t = String::from("decap.trees"))]
        decap_trees: String,

        /// Forward-model script filename substituted into the template
        #[arg(long, default_value_t = String::from("forward_model.txt"))]
        script: String,

        /// Individuals sampled per population (domestic wild captive)
        #[arg(long, num_args = 3, value_delimiter = ' ', default_values_t = vec![5, 30, 10])]
        sample_sizes: Vec<usize>,

        /// Write csv instead of feather
        #[arg(long)]
        csv: bool,
    },
}

impl SubCommand {
    #[rustfmt::skip]
    pub fn log_and_verbosity(&self) -> (u8, &Option<PathBuf>, bool) {
        match self {
            SubCommand::Simulate { log_and_verbosity, .. }
            | SubCommand::Sweep { log_and_verbosity, .. }
            => (log_and_verbosity.verbosity, &log_and_verbosity.log_file, log_and_verbosity.silent),
        }
    }

    pub fn output(&self) -> Option<PathBuf> {
        match self {
            SubCommand::Sweep { output, .. } => Some(output.clone()),
            SubCommand::Simulate { .. } => None,
        }
    }
}

pub fn run_args(args: Arguments) -> Result<()> {
    let (verbosity, log_file, is_silent) = args.cmd.log_and_verbosity();

    let (level, wrtr, _guard) = init_tracing(verbosity, log_file, is_silent)?;

    let timer = time::format_description::parse("[hour]:[minute]:[second].[subsecond digits:3]")?;
    let time_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = OffsetTime::new(time_offset, timer);

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(wrtr)
        .with_timer(timer)
        .init();

    if let Some(output) = args.cmd.output() {
        if let Err(e) = std::fs::create_dir(output.clone()) {
            match e.kind() {
                std::io::ErrorKind::AlreadyExists => (),
                _ => return Err(eyre!("Error creating directory {output:?}")),
            }
        }
    }

    run_cmd(args.cmd)?;

    Ok(())
}

#[rustfmt::skip]
pub fn run_cmd(cmd: SubCommand) -> Result<()> {
    match cmd {
        SubCommand::Simulate {
            template, seq, forward, recap, seed, no_suffix, decap_trees, script, debug_demography, ..
        } => simulate::run(
            template, seq, forward, recap, seed, no_suffix, decap_trees, script, debug_demography,
        )?,

        SubCommand::Sweep {
            prior, template, slice, seq, output, decap_trees, script, sample_sizes, csv, ..
        } => sweep::run(
            prior, output, slice, seq, template, decap_trees, script, sample_sizes, csv,
        )?,
    };
    Ok(())
}

pub fn init_tracing(
    verbosity: u8,
    log_file: &Option<PathBuf>,
    is_silent: bool,
) -> Result<(Level, NonBlocking, WorkerGuard)> {
    let level = if is_silent {
        Level::ERROR
    } else {
        match verbosity {
            0 => unreachable!(),
            1 => Level::ERROR,
            2 => Level::WARN,
            3 => Level::INFO,
            4 => Level::DEBUG,
            5..=u8::MAX => Level::TRACE,
        }
    };

    // Write logs to stderr or file
    let (wrtr, _guard) = match log_file {
        Some(path) => {
            let file = std::fs::File::options()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    Ok((level, wrtr, _guard))
}

pub fn get_styles() -> clap::builder::Styles {
    clap::builder::Styles::styled()
        .usage(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
        )
        .header(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
        )
        .literal(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .invalid(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
        )
        .error(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
        )
        .valid(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .placeholder(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing() {
        let (level, _, _) = init_tracing(1, &None, false).unwrap();
        assert_eq!(Level::ERROR, level);
        let (level, _, _) = init_tracing(2, &None, false).unwrap();
        assert_eq!(Level::WARN, level);
        let (level, _, _) = init_tracing(3, &None, false).unwrap();
        assert_eq!(Level::INFO, level);
        let (level, _, _) = init_tracing(4, &None, false).unwrap();
        assert_eq!(Level::DEBUG, level);
        let (level, _, _) = init_tracing(5, &None, false).unwrap();
        assert_eq!(Level::TRACE, level);
    }

    #[test]
    fn test_simulate_defaults_parse() {
        let args = Arguments::parse_from(["wildsim", "simulate", "template.txt"]);
        match args.cmd {
            SubCommand::Simulate {
                seed,
                seq,
                forward,
                recap,
                ..
            } => {
                assert_eq!(seed, 2);
                assert_eq!(seq.length, 10_000_000);
                assert_eq!(forward.pop_size_captive, 100);
                assert_eq!(recap.div_time, 40000.0);
            }
            SubCommand::Sweep { .. } => panic!("parsed the wrong subcommand"),
        }
    }

    #[test]
    fn test_sweep_requires_task_index() {
        let result = Arguments::try_parse_from([
            "wildsim",
            "sweep",
            "prior.feather",
            "--template",
            "template.txt",
        ]);
        assert!(result.is_err());

        let args = Arguments::parse_from([
            "wildsim",
            "sweep",
            "prior.feather",
            "--template",
            "template.txt",
            "--task-index",
            "3",
        ]);
        match args.cmd {
            SubCommand::Sweep {
                slice,
                sample_sizes,
                ..
            } => {
                assert_eq!(slice.task_index, 3);
                assert_eq!(slice.runs_per_task, 200);
                assert_eq!(sample_sizes, vec![5, 30, 10]);
            }
            SubCommand::Simulate { .. } => panic!("parsed the wrong subcommand"),
        }
    }
}
