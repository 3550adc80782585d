use std::fmt::Write as _;

use crate::args::{Population, PopulationSizes, RecapParams, NUM_POPULATIONS};

/// A timestamped change to the ancestral population structure, applied
/// during recapitation. Times are generations before present.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DemographicEvent {
    PopulationSizeChange {
        time: f64,
        population: Population,
        size: f64,
    },
    InstantaneousBottleneck {
        time: f64,
        population: Population,
        strength: f64,
    },
    MigrationRateChange {
        time: f64,
        source: Population,
        dest: Population,
        rate: f64,
    },
    MassMigration {
        time: f64,
        source: Population,
        dest: Population,
        proportion: f64,
    },
}

impl DemographicEvent {
    pub fn time(&self) -> f64 {
        match *self {
            Self::PopulationSizeChange { time, .. }
            | Self::InstantaneousBottleneck { time, .. }
            | Self::MigrationRateChange { time, .. }
            | Self::MassMigration { time, .. } => time,
        }
    }
}

impl std::fmt::Display for DemographicEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            Self::PopulationSizeChange {
                time,
                population,
                size,
            } => write!(f, "t={time}: {population} size set to {size}"),
            Self::InstantaneousBottleneck {
                time,
                population,
                strength,
            } => write!(f, "t={time}: {population} bottleneck of strength {strength}"),
            Self::MigrationRateChange {
                time,
                source,
                dest,
                rate,
            } => write!(f, "t={time}: migration {source} -> {dest} set to {rate}"),
            Self::MassMigration {
                time,
                source,
                dest,
                proportion,
            } => write!(
                f,
                "t={time}: mass migration of {proportion} of {source} into {dest}"
            ),
        }
    }
}

/// Build the ancestral demography: a size change paired with an
/// instantaneous bottleneck per population at its bottleneck time,
/// reciprocal migration between the two ancestral populations starting
/// (backwards in time) at `div_time - migration_length_2`, and a full
/// merger of the domestic ancestor into the wild one at the divergence.
///
/// The events are returned sorted ascending in time. At equal timestamps
/// the sort is stable, so each size change stays ahead of its bottleneck
/// and takes effect first. Parameter combinations are not validated here;
/// see `utils::check_prior`.
pub fn demographic_model(params: &RecapParams) -> Vec<DemographicEvent> {
    let domestic = Population::Domestic;
    let wild = Population::Wild;

    let migration_time_2 = params.div_time - params.migration_length_2;

    let mut events = vec![
        DemographicEvent::PopulationSizeChange {
            time: params.bottleneck_time_domestic,
            population: domestic,
            size: f64::from(params.pop_size_domestic_2),
        },
        DemographicEvent::InstantaneousBottleneck {
            time: params.bottleneck_time_domestic,
            population: domestic,
            strength: params.bottleneck_strength_domestic,
        },
        DemographicEvent::PopulationSizeChange {
            time: params.bottleneck_time_wild,
            population: wild,
            size: f64::from(params.pop_size_wild_2),
        },
        DemographicEvent::InstantaneousBottleneck {
            time: params.bottleneck_time_wild,
            population: wild,
            strength: params.bottleneck_strength_wild,
        },
        DemographicEvent::MigrationRateChange {
            time: migration_time_2,
            source: domestic,
            dest: wild,
            rate: params.migration_rate_2,
        },
        DemographicEvent::MigrationRateChange {
            time: migration_time_2,
            source: wild,
            dest: domestic,
            rate: params.migration_rate_2,
        },
        DemographicEvent::MassMigration {
            time: params.div_time,
            source: domestic,
            dest: wild,
            proportion: 1.0,
        },
    ];

    events.sort_by(|a, b| a.time().total_cmp(&b.time()));
    events
}

/// Render a human-readable trace of the demographic history: the epochs
/// between event times with the population sizes and migration matrix in
/// effect, and the events applied at each boundary. Purely informational.
pub fn render_history(sizes: &PopulationSizes, events: &[DemographicEvent]) -> String {
    let mut text = String::new();
    let mut current: [f64; NUM_POPULATIONS] = [
        sizes.get(Population::Domestic),
        sizes.get(Population::Wild),
        sizes.get(Population::Captive),
    ];
    let mut migration = [[0.0_f64; NUM_POPULATIONS]; NUM_POPULATIONS];

    let mut epoch_start = 0.0;
    let mut i = 0;
    writeln!(text, "Demographic history (time in generations before present)").ok();
    while i <= events.len() {
        let epoch_end = if i < events.len() {
            events[i].time()
        } else {
            f64::INFINITY
        };
        writeln!(text, "Epoch [{epoch_start} .. {epoch_end})").ok();
        writeln!(
            text,
            "  sizes: domestic={} wild={} captive={}",
            current[0], current[1], current[2]
        )
        .ok();
        for (row, source) in Population::all().iter().enumerate() {
            for (col, dest) in Population::all().iter().enumerate() {
                if migration[row][col] > 0.0 {
                    writeln!(
                        text,
                        "  migration: {source} -> {dest} at rate {}",
                        migration[row][col]
                    )
                    .ok();
                }
            }
        }
        // apply every event at this boundary before describing the next epoch
        let boundary = epoch_end;
        while i < events.len() && events[i].time() == boundary {
            writeln!(text, "  event: {}", events[i]).ok();
            match events[i] {
                DemographicEvent::PopulationSizeChange {
                    population, size, ..
                } => current[population.index()] = size,
                DemographicEvent::MigrationRateChange {
                    source, dest, rate, ..
                } => migration[source.index()][dest.index()] = rate,
                DemographicEvent::InstantaneousBottleneck { .. }
                | DemographicEvent::MassMigration { .. } => {}
            }
            i += 1;
        }
        epoch_start = boundary;
        if boundary.is_infinite() {
            break;
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn default_params() -> RecapParams {
        RecapParams {
            pop_size_domestic_2: 8000,
            pop_size_wild_2: 8000,
            div_time: 40000.0,
            migration_rate_2: 0.1,
            migration_length_2: 20000.0,
            bottleneck_time_wild: 3000.0,
            bottleneck_strength_wild: 10000.0,
            bottleneck_time_domestic: 3000.0,
            bottleneck_strength_domestic: 10000.0,
        }
    }

    #[test]
    fn test_events_are_time_sorted() {
        let events = demographic_model(&default_params());
        assert_eq!(events.len(), 7);
        for pair in events.windows(2) {
            assert!(pair[0].time() <= pair[1].time());
        }
    }

    #[test]
    fn test_event_times_and_ordering() {
        let events = demographic_model(&default_params());
        // both bottleneck pairs at 3000, migration changes at 20000,
        // mass migration at 40000
        assert!(matches!(
            events[0],
            DemographicEvent::PopulationSizeChange { time, .. } if time == 3000.0
        ));
        assert!(matches!(
            events[1],
            DemographicEvent::InstantaneousBottleneck { time, .. } if time == 3000.0
        ));
        assert!(matches!(
            events[2],
            DemographicEvent::PopulationSizeChange { time, .. } if time == 3000.0
        ));
        assert!(matches!(
            events[3],
            DemographicEvent::InstantaneousBottleneck { time, .. } if time == 3000.0
        ));
        assert!(matches!(
            events[4],
            DemographicEvent::MigrationRateChange { time, .. } if time == 20000.0
        ));
        assert!(matches!(
            events[5],
            DemographicEvent::MigrationRateChange { time, .. } if time == 20000.0
        ));
        assert!(matches!(
            events[6],
            DemographicEvent::MassMigration { time, proportion, .. }
                if time == 40000.0 && proportion == 1.0
        ));
    }

    #[test]
    fn test_size_change_sorts_ahead_of_its_bottleneck() {
        let mut params = default_params();
        params.bottleneck_time_domestic = 500.0;
        params.bottleneck_time_wild = 500.0;
        let events = demographic_model(&params);
        let kinds: Vec<_> = events
            .iter()
            .take(4)
            .map(|e| matches!(e, DemographicEvent::PopulationSizeChange { .. }))
            .collect();
        assert_eq!(kinds, vec![true, false, true, false]);
    }

    #[test]
    fn test_render_history_lists_epochs() {
        let sizes = PopulationSizes {
            domestic: 1000,
            wild: 1000,
            captive: 100,
        };
        let events = demographic_model(&default_params());
        let text = render_history(&sizes, &events);
        assert!(text.contains("Epoch [0 .. 3000)"));
        assert!(text.contains("Epoch [20000 .. 40000)"));
        assert!(text.contains("migration: domestic -> wild at rate 0.1"));
        assert!(text.contains("mass migration of 1 of domestic into wild"));
    }

    proptest! {
        #[test]
        fn prop_events_never_decrease_in_time(
            div_time in 1000.0_f64..100000.0,
            migration_length in 0.0_f64..100000.0,
            bottleneck_domestic in 0.0_f64..100000.0,
            bottleneck_wild in 0.0_f64..100000.0,
        ) {
            let params = RecapParams {
                div_time,
                migration_length_2: migration_length,
                bottleneck_time_domestic: bottleneck_domestic,
                bottleneck_time_wild: bottleneck_wild,
                ..default_params()
            };
            let events = demographic_model(&params);
            for pair in events.windows(2) {
                prop_assert!(pair[0].time() <= pair[1].time());
            }
        }
    }
}
