//! Output writers for processed tables: statvar MCF, observation CSV and
//! the TMCF that maps CSV columns onto StatVarObservation nodes.

use crate::config::ImportConfig;
use crate::counters::Counters;
use crate::error::Result;
use crate::mcf::node::{add_namespace, format_number};
use crate::mcf::writer::{write_mcf_file, WriteOptions};
use crate::statvar::processor::ProcessResult;
use crate::statvar::Observation;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct OutputFiles {
    pub statvar_mcf: PathBuf,
    pub csv: PathBuf,
    pub tmcf: PathBuf,
}

impl OutputFiles {
    /// `<prefix>_stat_vars.mcf`, `<prefix>.csv` and `<prefix>.tmcf`.
    pub fn for_prefix(prefix: &str) -> Self {
        Self {
            statvar_mcf: PathBuf::from(format!("{}_stat_vars.mcf", prefix)),
            csv: PathBuf::from(format!("{}.csv", prefix)),
            tmcf: PathBuf::from(format!("{}.tmcf", prefix)),
        }
    }
}

/// Extra observation columns whose values are node references.
const REFERENCE_COLUMNS: [&str; 2] = ["unit", "measurementMethod"];

fn column_value(observation: &Observation, column: &str) -> String {
    match column {
        "observationAbout" if !observation.place.is_empty() => format!("dcid:{}", observation.place),
        "observationAbout" => String::new(),
        "observationDate" => observation.date.clone(),
        "variableMeasured" => format!("dcid:{}", observation.variable),
        "value" => format_number(observation.value),
        other => match observation.props.get(other) {
            Some(v) if REFERENCE_COLUMNS.contains(&other) => add_namespace(v),
            Some(v) => v.clone(),
            None => String::new(),
        },
    }
}

/// Configured output columns that have a value in at least one row.
pub fn used_columns(observations: &[Observation], columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .filter(|column| {
            observations
                .iter()
                .any(|obs| !column_value(obs, column).is_empty())
        })
        .cloned()
        .collect()
}

pub fn tmcf_text(dataset: &str, columns: &[String]) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "Node: E:{}->E0", dataset);
    let _ = writeln!(text, "typeOf: dcs:StatVarObservation");
    for column in columns {
        let _ = writeln!(text, "{}: C:{}->{}", column, dataset, column);
    }
    text
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn write_observations_csv(path: &Path, observations: &[Observation], columns: &[String]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(columns)?;
    for observation in observations {
        writer.write_record(columns.iter().map(|c| column_value(observation, c)))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_outputs(
    result: &ProcessResult,
    output_prefix: &str,
    config: &ImportConfig,
    counters: &Counters,
) -> Result<OutputFiles> {
    let files = OutputFiles::for_prefix(output_prefix);

    let options = WriteOptions {
        sort_nodes: true,
        header: Some(format!(
            "Auto-generated statistical variables for {}",
            dataset_name(&files.csv)
        )),
        ..WriteOptions::default()
    };
    write_mcf_file(&files.statvar_mcf, &result.statvars, &options)?;

    let columns = used_columns(&result.observations, &config.output_columns);
    write_observations_csv(&files.csv, &result.observations, &columns)?;

    ensure_parent(&files.tmcf)?;
    std::fs::write(&files.tmcf, tmcf_text(&dataset_name(&files.csv), &columns))?;

    counters.set("output-csv-rows", result.observations.len() as i64);
    info!(
        "Wrote {}, {} and {}",
        files.statvar_mcf.display(),
        files.csv.display(),
        files.tmcf.display()
    );
    Ok(files)
}

fn dataset_name(csv: &Path) -> String {
    csv.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Data".to_string())
}
