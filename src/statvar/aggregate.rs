//! Duplicate observation handling.

use crate::counters::Counters;
use crate::mcf::node::format_number;
use crate::statvar::Observation;
use indexmap::map::Entry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Keep the first value; differing duplicates are counted as errors.
    #[default]
    None,
    Sum,
    Min,
    Max,
    Mean,
    First,
    Last,
    Count,
}

impl std::str::FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "sum" => Ok(Self::Sum),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "mean" => Ok(Self::Mean),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            "count" => Ok(Self::Count),
            other => Err(format!("unknown aggregation '{}'", other)),
        }
    }
}

struct AggregateState {
    observation: Observation,
    aggregation: Aggregation,
    count: usize,
    sum: f64,
}

pub struct ObservationAggregator {
    default: Aggregation,
    entries: IndexMap<String, AggregateState>,
    counters: Counters,
}

impl ObservationAggregator {
    pub fn new(default: Aggregation, counters: Counters) -> Self {
        Self {
            default,
            entries: IndexMap::new(),
            counters,
        }
    }

    pub fn add(&mut self, mut observation: Observation) {
        let key = observation.key();
        let state = match self.entries.entry(key.clone()) {
            Entry::Vacant(slot) => {
                let aggregation = observation.aggregation.unwrap_or(self.default);
                let sum = observation.value;
                if aggregation == Aggregation::Count {
                    observation.value = 1.0;
                }
                slot.insert(AggregateState {
                    observation,
                    aggregation,
                    count: 1,
                    sum,
                });
                return;
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        self.counters.add("duplicate-svobs", 1);
        state.count += 1;
        state.sum += observation.value;
        let current = &mut state.observation.value;
        match state.aggregation {
            Aggregation::None => {
                if *current != observation.value {
                    self.counters.add_with_sample(
                        "error-duplicate-svobs",
                        1,
                        format!("{}: {} vs {}", key, format_number(*current), format_number(observation.value)),
                    );
                }
            }
            Aggregation::Sum => *current = state.sum,
            Aggregation::Min => *current = current.min(observation.value),
            Aggregation::Max => *current = current.max(observation.value),
            Aggregation::Mean => *current = state.sum / state.count as f64,
            Aggregation::First => {}
            Aggregation::Last => *current = observation.value,
            Aggregation::Count => *current = state.count as f64,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Aggregated observations in first-seen order.
    pub fn into_observations(self) -> Vec<Observation> {
        self.entries
            .into_values()
            .map(|state| state.observation)
            .collect()
    }
}
