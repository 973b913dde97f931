//! Sampler
//!
//! Picks a small subset of rows from a large input file that still covers
//! the distinct values of each column. Useful for building and testing a
//! PV map before processing the full input.

use crate::config::ImportConfig;
use crate::counters::Counters;
use crate::error::{ImportError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone)]
pub struct SampleOptions {
    /// Rows copied unconditionally from the top of the file.
    pub header_rows: usize,
    /// Data rows to keep. 0 keeps every selected row.
    pub max_rows: usize,
    pub unique_per_column: usize,
    pub rate: f64,
    pub seed: u64,
    pub delimiter: u8,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self::from(&ImportConfig::default())
    }
}

impl From<&ImportConfig> for SampleOptions {
    fn from(config: &ImportConfig) -> Self {
        Self {
            header_rows: config.skip_rows + config.header_rows,
            max_rows: config.sample_max_rows,
            unique_per_column: config.sample_unique_per_column.max(1),
            rate: config.sample_rate,
            seed: config.sample_seed,
            delimiter: u8::try_from(config.input_delimiter).unwrap_or(b','),
        }
    }
}

pub struct Sampler {
    options: SampleOptions,
    rng: StdRng,
    /// Per column: times each value has been kept.
    seen: Vec<HashMap<String, usize>>,
}

impl Sampler {
    pub fn new(options: SampleOptions) -> Self {
        let rng = StdRng::seed_from_u64(options.seed);
        Self {
            options,
            rng,
            seen: Vec::new(),
        }
    }

    fn has_new_value(&self, row: &[String]) -> bool {
        row.iter().enumerate().any(|(col, value)| {
            let count = self
                .seen
                .get(col)
                .and_then(|values| values.get(value.trim()))
                .copied()
                .unwrap_or(0);
            count < self.options.unique_per_column
        })
    }

    fn record(&mut self, row: &[String]) {
        if self.seen.len() < row.len() {
            self.seen.resize_with(row.len(), HashMap::new);
        }
        for (col, value) in row.iter().enumerate() {
            *self.seen[col].entry(value.trim().to_string()).or_insert(0) += 1;
        }
    }

    /// Header rows followed by the selected data rows, in input order.
    pub fn sample_rows(&mut self, rows: &[Vec<String>]) -> Vec<Vec<String>> {
        let header_rows = self.options.header_rows.min(rows.len());
        let (headers, data) = rows.split_at(header_rows);
        let mut sampled: Vec<Vec<String>> = headers.to_vec();

        let mut kept = 0;
        for row in data {
            if self.options.max_rows > 0 && kept >= self.options.max_rows {
                break;
            }
            if !self.has_new_value(row) {
                continue;
            }
            if self.rng.gen::<f64>() >= self.options.rate {
                continue;
            }
            self.record(row);
            sampled.push(row.clone());
            kept += 1;
        }
        sampled
    }

    /// Sample `input` into `output`. Returns the number of data rows kept.
    pub fn sample_file(&mut self, input: &Path, output: &Path, counters: &Counters) -> Result<usize> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.options.delimiter)
            .from_path(input)?;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(|c| c.to_string()).collect::<Vec<_>>());
        }

        let sampled = self.sample_rows(&rows);
        let header_rows = self.options.header_rows.min(rows.len());
        let kept = sampled.len() - header_rows;

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .delimiter(self.options.delimiter)
            .from_path(output)?;
        for row in &sampled {
            writer.write_record(row)?;
        }
        writer.flush().map_err(ImportError::Io)?;

        counters.add("sample-input-rows", (rows.len() - header_rows) as i64);
        counters.add("sample-output-rows", kept as i64);
        info!(
            "Sampled {} of {} rows from {} into {}",
            kept,
            rows.len() - header_rows,
            input.display(),
            output.display()
        );
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(n: usize) -> Vec<Vec<String>> {
        let mut rows = vec![vec!["state".to_string(), "value".to_string()]];
        for i in 0..n {
            rows.push(vec![format!("S{}", i % 2), "1".to_string()]);
        }
        rows
    }

    #[test]
    fn test_keeps_header_and_limits_repeats() {
        let options = SampleOptions {
            unique_per_column: 2,
            ..SampleOptions::default()
        };
        let sampled = Sampler::new(options).sample_rows(&table(10));
        // S0 and S1 are kept twice each.
        assert_eq!(sampled.len(), 5);
        assert_eq!(sampled[0], vec!["state", "value"]);
        assert_eq!(sampled[1][0], "S0");
        assert_eq!(sampled[2][0], "S1");
    }

    #[test]
    fn test_max_rows() {
        let rows: Vec<Vec<String>> = (0..20).map(|i| vec![i.to_string()]).collect();
        let options = SampleOptions {
            header_rows: 0,
            max_rows: 3,
            ..SampleOptions::default()
        };
        assert_eq!(Sampler::new(options).sample_rows(&rows).len(), 3);
    }

    #[test]
    fn test_seeded_rate_is_deterministic() {
        let rows: Vec<Vec<String>> = (0..200).map(|i| vec![i.to_string()]).collect();
        let options = SampleOptions {
            header_rows: 0,
            max_rows: 0,
            rate: 0.3,
            seed: 7,
            ..SampleOptions::default()
        };
        let first = Sampler::new(options.clone()).sample_rows(&rows);
        let second = Sampler::new(options).sample_rows(&rows);
        assert_eq!(first, second);
        assert!(first.len() > 20 && first.len() < 120);
    }

    #[test]
    fn test_sample_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.csv");
        std::fs::write(&input, "a,b\n1,x\n1,x\n2,y\n").unwrap();
        let output = dir.path().join("sample/out.csv");
        let counters = Counters::new();
        let options = SampleOptions {
            unique_per_column: 1,
            ..SampleOptions::default()
        };
        let kept = Sampler::new(options).sample_file(&input, &output, &counters).unwrap();
        assert_eq!(kept, 2);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "a,b\n1,x\n2,y\n");
        assert_eq!(counters.get("sample-input-rows"), 3);
    }
}
