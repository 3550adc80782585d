#[derive(Debug)]
pub enum WildsimError {
    SimulatorError((Option<i32>, String)),
    SampleSizeError((usize, usize, usize)),
    TableIntegrityError(String),
    ColumnNotFoundError(String),
    EmptySliceError((usize, usize)),
    NonCoalescingDemography,
}

impl std::fmt::Display for WildsimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SimulatorError((Some(code), cmd_file)) => write!(
                f,
                "The forward simulator exited with status {code}. The command file {cmd_file:?} has been kept for inspection."
            ),
            Self::SimulatorError((None, cmd_file)) => write!(
                f,
                "The forward simulator was terminated by a signal. The command file {cmd_file:?} has been kept for inspection."
            ),
            Self::SampleSizeError((pop, requested, available)) => write!(
                f,
                "Requested {requested} individuals from population {pop}, but only {available} are alive at the present time."
            ),
            Self::TableIntegrityError(msg) => write!(f, "Tree-sequence table error: {msg}"),
            Self::ColumnNotFoundError(col) => {
                write!(f, "The prior table has no column named {col:?}")
            }
            Self::EmptySliceError((start, nrows)) => write!(
                f,
                "Task slice starts at row {start}, but the prior table has only {nrows} rows."
            ),
            Self::NonCoalescingDemography => write!(
                f,
                "All rates are zero before full coalescence and no demographic events remain. Check the migration rates and the mass migration at the divergence time."
            ),
        }
    }
}
