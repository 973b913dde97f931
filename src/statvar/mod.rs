//! StatVar Module - Tabular data to statistical variables and observations
//!
//! The processor resolves each cell of an input table to PVs through the
//! PV mapper, assembles StatVarObservations, derives statvar dcids and
//! writes the statvar MCF, observation CSV and TMCF outputs.

pub mod aggregate;
pub mod date;
pub mod dcid;
pub mod output;
pub mod processor;

pub use aggregate::{Aggregation, ObservationAggregator};
pub use dcid::generate_statvar_dcid;
pub use output::{write_outputs, OutputFiles};
pub use processor::{ProcessResult, StatVarProcessor};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Observation properties other than the statvar's own PVs.
pub const SVOBS_PROPERTIES: [&str; 8] = [
    "observationAbout",
    "observationDate",
    "value",
    "variableMeasured",
    "unit",
    "scalingFactor",
    "measurementMethod",
    "observationPeriod",
];

pub fn is_svobs_property(prop: &str) -> bool {
    SVOBS_PROPERTIES.contains(&prop)
}

/// A single StatVarObservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub variable: String,
    pub place: String,
    pub date: String,
    pub value: f64,
    /// unit, scalingFactor, measurementMethod, observationPeriod
    pub props: IndexMap<String, String>,
    #[serde(skip)]
    pub aggregation: Option<Aggregation>,
}

impl Observation {
    pub fn new(variable: &str, place: &str, date: &str, value: f64) -> Self {
        Self {
            variable: variable.to_string(),
            place: place.to_string(),
            date: date.to_string(),
            value,
            props: IndexMap::new(),
            aggregation: None,
        }
    }

    /// Identity of the observation; duplicates share a key.
    pub fn key(&self) -> String {
        let mut extra: Vec<String> = self
            .props
            .iter()
            .map(|(p, v)| format!("{}={}", p, v))
            .collect();
        extra.sort();
        format!("{}|{}|{}|{}", self.variable, self.place, self.date, extra.join(";"))
    }
}
