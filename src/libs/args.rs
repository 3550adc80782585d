use serde::{Deserialize, Serialize};

/// The three simulated populations in their fixed table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Population {
    Domestic,
    Wild,
    Captive,
}

pub const NUM_POPULATIONS: usize = 3;

impl Population {
    pub fn index(self) -> usize {
        match self {
            Self::Domestic => 0,
            Self::Wild => 1,
            Self::Captive => 2,
        }
    }

    pub fn all() -> [Population; NUM_POPULATIONS] {
        [Self::Domestic, Self::Wild, Self::Captive]
    }
}

impl std::fmt::Display for Population {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            Self::Domestic => write!(f, "domestic"),
            Self::Wild => write!(f, "wild"),
            Self::Captive => write!(f, "captive"),
        }
    }
}

/// Fixed features of the simulated sequence, shared by every stage of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct SeqFeatures {
    /// Length of the simulated sequence in base pairs
    #[cfg_attr(feature = "clap", arg(long, default_value_t = 10_000_000))]
    pub length: u64,

    /// Recombination rate per base pair per generation
    #[cfg_attr(feature = "clap", arg(long, default_value_t = 1.8e-8))]
    pub recombination_rate: f64,

    /// Neutral mutation rate per base pair per generation
    #[cfg_attr(feature = "clap", arg(long, default_value_t = 6e-8))]
    pub mutation_rate: f64,
}

/// Parameters substituted into the forward-simulator command template.
/// Population sizes are diploid.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct ForwardParams {
    #[cfg_attr(feature = "clap", arg(long, default_value_t = 1000))]
    pub pop_size_domestic_1: u32,

    #[cfg_attr(feature = "clap", arg(long, default_value_t = 1000))]
    pub pop_size_wild_1: u32,

    #[cfg_attr(feature = "clap", arg(long, default_value_t = 100))]
    pub pop_size_captive: u32,

    /// Generations of the forward stage before migration begins
    #[cfg_attr(feature = "clap", arg(long, default_value_t = 50))]
    pub migration_length_1: u32,

    /// Rate of migration from domestic into wild during the forward stage
    #[cfg_attr(feature = "clap", arg(long, default_value_t = 0.05))]
    pub migration_rate_1: f64,

    /// Generations ago the captive population was established
    #[cfg_attr(feature = "clap", arg(long, default_value_t = 50))]
    pub captive_time: u32,
}

/// Ancestral demography parameters for recapitation. Times are generations
/// before present; `migration_length_2` is measured back from `div_time`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct RecapParams {
    #[cfg_attr(feature = "clap", arg(long, default_value_t = 8000))]
    pub pop_size_domestic_2: u32,

    #[cfg_attr(feature = "clap", arg(long, default_value_t = 8000))]
    pub pop_size_wild_2: u32,

    /// Divergence of the domestic and wild ancestors
    #[cfg_attr(feature = "clap", arg(long, default_value_t = 40000.0))]
    pub div_time: f64,

    /// Reciprocal migration rate between the two ancestral populations
    #[cfg_attr(feature = "clap", arg(long, default_value_t = 0.1))]
    pub migration_rate_2: f64,

    /// Duration of the reciprocal migration, measured back from `div_time`
    #[cfg_attr(feature = "clap", arg(long, default_value_t = 20000.0))]
    pub migration_length_2: f64,

    #[cfg_attr(feature = "clap", arg(long, default_value_t = 3000.0))]
    pub bottleneck_time_wild: f64,

    #[cfg_attr(feature = "clap", arg(long, default_value_t = 10000.0))]
    pub bottleneck_strength_wild: f64,

    #[cfg_attr(feature = "clap", arg(long, default_value_t = 3000.0))]
    pub bottleneck_time_domestic: f64,

    #[cfg_attr(feature = "clap", arg(long, default_value_t = 10000.0))]
    pub bottleneck_strength_domestic: f64,
}

/// Diploid population sizes in effect at the start of recapitation.
///
/// This value is produced by the command builder and handed to the
/// recapitation call explicitly, so the two stages share no hidden state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PopulationSizes {
    pub domestic: u32,
    pub wild: u32,
    pub captive: u32,
}

impl PopulationSizes {
    pub fn get(&self, population: Population) -> f64 {
        match population {
            Population::Domestic => f64::from(self.domestic),
            Population::Wild => f64::from(self.wild),
            Population::Captive => f64::from(self.captive),
        }
    }
}

impl From<&ForwardParams> for PopulationSizes {
    fn from(params: &ForwardParams) -> Self {
        Self {
            domestic: params.pop_size_domestic_1,
            wild: params.pop_size_wild_1,
            captive: params.pop_size_captive,
        }
    }
}

/// Which contiguous slice of prior rows a batch invocation processes.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct SliceArgs {
    /// Index of this task within the batch array
    #[cfg_attr(feature = "clap", arg(long))]
    pub task_index: usize,

    /// Number of prior rows each task processes
    #[cfg_attr(feature = "clap", arg(long, default_value_t = 200))]
    pub runs_per_task: usize,
}

impl SliceArgs {
    /// Row range `[start, end)` of the prior table covered by this task.
    pub fn row_range(&self, nrows: usize) -> (usize, usize) {
        let start = self.task_index * self.runs_per_task;
        let end = (start + self.runs_per_task).min(nrows);
        (start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_population_indices() {
        assert_eq!(Population::Domestic.index(), 0);
        assert_eq!(Population::Wild.index(), 1);
        assert_eq!(Population::Captive.index(), 2);
    }

    #[test]
    fn test_slice_row_range() {
        let slice = SliceArgs {
            task_index: 2,
            runs_per_task: 10,
        };
        assert_eq!(slice.row_range(100), (20, 30));
        assert_eq!(slice.row_range(25), (20, 25));
        // a slice past the end of the table is empty
        assert_eq!(slice.row_range(10), (20, 10));
    }
}
