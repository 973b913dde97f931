//! StatVar Processor - Converts input tables into StatVarObservations
//!
//! Header cells give each column constant PVs or a per-cell template. Data
//! cells are resolved in the column's namespace; cells that carry a `value`
//! become observations, all other PVs apply to every observation in the row.

use crate::config::ImportConfig;
use crate::counters::Counters;
use crate::error::{ImportError, Result};
use crate::mcf::diff::fingerprint_node;
use crate::mcf::merge::{append_node, can_merge};
use crate::mcf::node::{
    add_namespace, format_number, normalize_value, numeric_value, split_values, strip_namespace,
    McfNode, McfNodes,
};
use crate::mcf::parser::{load_mcf_files, ParseOptions};
use crate::pvmap::rules::{AGGREGATE_PROP, IGNORE_PROP};
use crate::pvmap::{
    is_template, merge_pvs, process_pvs_for_data, MapperOptions, PropertyValueMapper,
    PropertyValues, PvMap, GLOBAL_NAMESPACE,
};
use crate::statvar::aggregate::{Aggregation, ObservationAggregator};
use crate::statvar::date::normalize_date;
use crate::statvar::dcid::generate_statvar_dcid;
use crate::statvar::{is_svobs_property, Observation};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// PVs resolved from a column's header cells.
#[derive(Debug, Clone, Default)]
struct ColumnPvs {
    name: String,
    constant: PropertyValues,
    templates: Vec<(PropertyValues, HashMap<String, String>)>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessResult {
    pub statvars: McfNodes,
    pub observations: Vec<Observation>,
}

pub struct StatVarProcessor {
    config: ImportConfig,
    mapper: PropertyValueMapper,
    counters: Counters,
    statvars: McfNodes,
    /// Fingerprint of an existing statvar to its dcid.
    existing_statvars: HashMap<String, String>,
    fingerprint_ignore: Vec<String>,
    aggregator: ObservationAggregator,
}

impl StatVarProcessor {
    pub fn new(config: ImportConfig, pv_map: PvMap, counters: Counters) -> Result<Self> {
        let mapper =
            PropertyValueMapper::new(pv_map, MapperOptions::from(&config), counters.clone());

        let mut fingerprint_ignore = config.statvar_dcid_ignore_properties.clone();
        fingerprint_ignore.push("dcid".to_string());

        let mut existing_statvars = HashMap::new();
        if !config.existing_statvar_mcf.is_empty() {
            let nodes = load_mcf_files(&config.existing_statvar_mcf, &ParseOptions::default())?;
            for (key, node) in &nodes {
                let dcid = node
                    .dcid()
                    .unwrap_or_else(|| strip_namespace(key).to_string());
                existing_statvars
                    .entry(fingerprint_node(node, &fingerprint_ignore))
                    .or_insert(dcid);
            }
            info!("Indexed {} existing statvars", existing_statvars.len());
        }

        let aggregator = ObservationAggregator::new(config.aggregation, counters.clone());
        Ok(Self {
            config,
            mapper,
            counters,
            statvars: McfNodes::new(),
            existing_statvars,
            fingerprint_ignore,
            aggregator,
        })
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn process_files(&mut self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            self.process_file(path)?;
        }
        Ok(())
    }

    pub fn process_file(&mut self, path: &Path) -> Result<()> {
        let delimiter = u8::try_from(self.config.input_delimiter).map_err(|_| {
            ImportError::Config(format!(
                "input_delimiter '{}' is not a single byte",
                self.config.input_delimiter
            ))
        })?;
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_path(path)?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(|cell| cell.to_string()).collect::<Vec<_>>());
        }
        self.counters.add("input-files", 1);
        info!("Read {} rows from {}", rows.len(), path.display());
        self.process_rows(&rows, &path.display().to_string())
    }

    /// Process a table already split into cells. `source` is used in debug
    /// samples.
    pub fn process_rows(&mut self, rows: &[Vec<String>], source: &str) -> Result<()> {
        let skip = self.config.skip_rows.min(rows.len());
        let rows = &rows[skip..];
        let header_rows = self.config.header_rows.min(rows.len());
        let (headers, data) = rows.split_at(header_rows);

        let num_columns = rows.iter().map(|row| row.len()).max().unwrap_or(0);
        let columns = self.column_pvs(headers, num_columns)?;

        for (idx, row) in data.iter().enumerate() {
            self.counters.add("input-rows", 1);
            let context = format!("{}:{}", source, skip + header_rows + idx + 1);
            self.process_row(row, &columns, &context)?;
        }
        debug!("Processed {} data rows from {}", data.len(), source);
        Ok(())
    }

    fn column_pvs(&self, headers: &[Vec<String>], num_columns: usize) -> Result<Vec<ColumnPvs>> {
        let multi = &self.config.multi_value_properties;
        let mut columns = Vec::with_capacity(num_columns);

        for col in 0..num_columns {
            let name = headers
                .last()
                .and_then(|row| row.get(col))
                .map(|cell| cell.trim().to_string())
                .filter(|cell| !cell.is_empty())
                .unwrap_or_else(|| format!("Column{}", col + 1));
            let mut column = ColumnPvs {
                name,
                ..ColumnPvs::default()
            };

            for row in headers {
                let Some(text) = row.get(col).map(|cell| cell.trim()).filter(|t| !t.is_empty())
                else {
                    continue;
                };
                match self.mapper.get_raw_pvs_for_key(text, GLOBAL_NAMESPACE) {
                    Some((pvs, bindings)) if is_template(&pvs) => {
                        column.templates.push((pvs, bindings));
                    }
                    Some((pvs, bindings)) => {
                        if let Some(pvs) = process_pvs_for_data(&pvs, text, &bindings, &self.counters)? {
                            merge_pvs(&mut column.constant, &pvs, multi, &self.counters);
                        }
                    }
                    None => {
                        for pvs in self.mapper.get_all_pvs_for_value(text, GLOBAL_NAMESPACE)? {
                            merge_pvs(&mut column.constant, &pvs, multi, &self.counters);
                        }
                    }
                }
            }
            debug!(
                "Column {} '{}': {} constant PVs, {} templates",
                col,
                column.name,
                column.constant.len(),
                column.templates.len()
            );
            columns.push(column);
        }
        Ok(columns)
    }

    fn resolve_cell(&self, cell: &str, column: &ColumnPvs, context: &str) -> Result<Option<PropertyValues>> {
        let multi = &self.config.multi_value_properties;
        let mut merged = PropertyValues::new();

        if !column.templates.is_empty() {
            for (template, bindings) in &column.templates {
                if let Some(pvs) = process_pvs_for_data(template, cell, bindings, &self.counters)? {
                    merge_pvs(&mut merged, &pvs, multi, &self.counters);
                }
            }
            return Ok(Some(merged));
        }

        let sets = self.mapper.get_all_pvs_for_value(cell, &column.name)?;
        if !sets.is_empty() {
            for pvs in &sets {
                merge_pvs(&mut merged, pvs, multi, &self.counters);
            }
            return Ok(Some(merged));
        }

        match numeric_value(cell) {
            Some(number) => {
                merged.insert("value".to_string(), format_number(number));
                Ok(Some(merged))
            }
            None => {
                self.counters.add_with_sample(
                    "unmapped-cell",
                    1,
                    format!("{} [{}]: {}", context, column.name, cell),
                );
                Ok(None)
            }
        }
    }

    fn process_row(&mut self, row: &[String], columns: &[ColumnPvs], context: &str) -> Result<()> {
        let mut row_pvs = PropertyValues::new();
        let mut value_cells: Vec<(usize, PropertyValues)> = Vec::new();

        for (col, cell) in row.iter().enumerate() {
            let cell = cell.trim();
            let Some(column) = columns.get(col) else {
                continue;
            };
            if cell.is_empty() {
                continue;
            }
            let Some(cell_pvs) = self.resolve_cell(cell, column, context)? else {
                continue;
            };
            if cell_pvs.contains_key("value") {
                value_cells.push((col, cell_pvs));
            } else {
                merge_pvs(&mut row_pvs, &cell_pvs, &self.config.multi_value_properties, &self.counters);
            }
        }

        for (col, cell_pvs) in value_cells {
            let multi = &self.config.multi_value_properties;
            let mut pvs = columns[col].constant.clone();
            merge_pvs(&mut pvs, &row_pvs, multi, &self.counters);
            merge_pvs(&mut pvs, &cell_pvs, multi, &self.counters);
            let context = format!("{} [{}]", context, columns[col].name);
            self.add_observation(pvs, &context);
        }
        Ok(())
    }

    fn apply_inference_rules(&self, statvar: &mut PropertyValues) {
        for rule in &self.config.inference_rules {
            let applies = rule.when.iter().all(|(prop, value)| {
                statvar
                    .get(prop)
                    .map(|have| normalize_value(have) == normalize_value(value))
                    .unwrap_or(false)
            });
            if !applies {
                continue;
            }
            for (prop, value) in &rule.set {
                if !statvar.contains_key(prop) {
                    statvar.insert(prop.clone(), value.clone());
                    self.counters.add("inferred-pvs", 1);
                }
            }
        }
    }

    /// Build an observation from fully merged PVs. Incomplete observations
    /// are counted and dropped.
    fn add_observation(&mut self, pvs: PropertyValues, context: &str) {
        if pvs.contains_key(IGNORE_PROP) {
            self.counters.add("ignored-svobs", 1);
            return;
        }
        let aggregation = match pvs.get(AGGREGATE_PROP) {
            Some(op) => match op.parse::<Aggregation>() {
                Ok(aggregation) => Some(aggregation),
                Err(e) => {
                    self.counters.add_with_sample("error-invalid-aggregation", 1, e);
                    None
                }
            },
            None => None,
        };

        let mut svobs = PropertyValues::new();
        let mut statvar = PropertyValues::new();
        for (prop, value) in pvs {
            if prop.starts_with('#') {
                continue;
            }
            if is_svobs_property(&prop) {
                svobs.insert(prop, value);
            } else {
                statvar.insert(prop, value);
            }
        }

        let explicit_variable = svobs
            .get("variableMeasured")
            .map(|v| strip_namespace(v).to_string());
        if explicit_variable.is_none() {
            self.apply_inference_rules(&mut statvar);
            for (prop, value) in &self.config.default_statvar_pvs {
                statvar.entry(prop.clone()).or_insert_with(|| value.clone());
            }
            for prop in &self.config.required_statvar_properties {
                if !statvar.contains_key(prop) {
                    self.counters
                        .add_with_sample(&format!("error-missing-{}", prop), 1, context);
                    return;
                }
            }
        }
        for prop in &self.config.required_svobs_properties {
            if !svobs.contains_key(prop) {
                self.counters
                    .add_with_sample(&format!("error-missing-{}", prop), 1, context);
                return;
            }
        }

        let Some(value) = svobs.get("value").and_then(|v| numeric_value(v)) else {
            self.counters.add_with_sample(
                "error-non-numeric-value",
                1,
                format!("{}: {}", context, svobs.get("value").map(String::as_str).unwrap_or("")),
            );
            return;
        };
        let date = svobs
            .get("observationDate")
            .map(|d| normalize_date(d, &self.config.date_formats, &self.counters))
            .unwrap_or_default();
        let place = svobs
            .get("observationAbout")
            .map(|p| strip_namespace(p).to_string())
            .unwrap_or_default();

        let variable = match explicit_variable {
            Some(variable) => {
                self.counters.add("explicit-statvar", 1);
                variable
            }
            None => self.resolve_statvar(&statvar, context),
        };

        let mut observation = Observation::new(&variable, &place, &date, value);
        for (prop, value) in svobs {
            match prop.as_str() {
                "observationAbout" | "observationDate" | "value" | "variableMeasured" => {}
                _ => {
                    observation.props.insert(prop, value);
                }
            }
        }
        observation.aggregation = aggregation;
        self.counters.add("svobs-generated", 1);
        self.aggregator.add(observation);
    }

    /// Dcid for the statvar PVs, reusing an existing statvar with the same
    /// PVs when one is known.
    fn resolve_statvar(&mut self, statvar: &PropertyValues, context: &str) -> String {
        let dcid = generate_statvar_dcid(statvar, &self.config.statvar_dcid_ignore_properties);
        let mut node = McfNode::new();
        node.set_value("Node", &format!("dcid:{}", dcid));
        for (prop, value) in statvar {
            for v in split_values(value) {
                node.add_value(prop, &add_namespace(&v));
            }
        }

        let fingerprint = fingerprint_node(&node, &self.fingerprint_ignore);
        if let Some(existing) = self.existing_statvars.get(&fingerprint) {
            self.counters.add("existing-statvar", 1);
            return existing.clone();
        }

        match self.statvars.get_mut(&dcid) {
            Some(existing) => {
                if can_merge(existing, &node, &self.config.multi_value_properties) {
                    append_node(existing, &node);
                } else {
                    self.counters.add_with_sample(
                        "error-statvar-dcid-conflict",
                        1,
                        format!("{}: {}", dcid, context),
                    );
                }
            }
            None => {
                self.counters.add("statvars-generated", 1);
                self.statvars.insert(dcid.clone(), node);
            }
        }
        dcid
    }

    pub fn finish(self) -> ProcessResult {
        let observations = self.aggregator.into_observations();
        self.counters.set("output-svobs", observations.len() as i64);
        self.counters.set("output-statvars", self.statvars.len() as i64);
        info!(
            "Generated {} statvars and {} observations",
            self.statvars.len(),
            observations.len()
        );
        ProcessResult {
            statvars: self.statvars,
            observations,
        }
    }
}
