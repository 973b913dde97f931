//! Counters
//!
//! Named event counts collected while processing. Per-row problems are
//! recorded here instead of failing the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::Result;

const DEFAULT_MAX_DEBUG_SAMPLES: usize = 5;

#[derive(Debug, Default)]
struct CounterState {
    counts: BTreeMap<String, i64>,
    samples: BTreeMap<String, Vec<String>>,
}

/// Serialisable view of the counters at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterReport {
    pub generated_at: DateTime<Utc>,
    pub counters: BTreeMap<String, i64>,
    pub samples: BTreeMap<String, Vec<String>>,
}

/// Thread-safe counter set. Clones share the same underlying counts.
#[derive(Debug, Clone)]
pub struct Counters {
    state: Arc<Mutex<CounterState>>,
    max_debug_samples: usize,
}

impl Counters {
    pub fn new() -> Self {
        Self::with_max_samples(DEFAULT_MAX_DEBUG_SAMPLES)
    }

    pub fn with_max_samples(max_debug_samples: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CounterState::default())),
            max_debug_samples,
        }
    }

    pub fn add(&self, name: &str, count: i64) {
        let mut state = self.state.lock().unwrap();
        *state.counts.entry(name.to_string()).or_insert(0) += count;
    }

    /// Increment a counter and keep `context` as one of its debug samples.
    pub fn add_with_sample(&self, name: &str, count: i64, context: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        *state.counts.entry(name.to_string()).or_insert(0) += count;
        let samples = state.samples.entry(name.to_string()).or_default();
        if samples.len() < self.max_debug_samples {
            samples.push(context.into());
        }
    }

    pub fn set(&self, name: &str, value: i64) {
        let mut state = self.state.lock().unwrap();
        state.counts.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> i64 {
        let state = self.state.lock().unwrap();
        state.counts.get(name).copied().unwrap_or(0)
    }

    pub fn samples(&self, name: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.samples.get(name).cloned().unwrap_or_default()
    }

    /// Counts sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.state.lock().unwrap().counts.clone()
    }

    pub fn report(&self) -> CounterReport {
        let state = self.state.lock().unwrap();
        CounterReport {
            generated_at: Utc::now(),
            counters: state.counts.clone(),
            samples: state.samples.clone(),
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.report())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn log_summary(&self) {
        for (name, count) in self.snapshot() {
            if name.starts_with("error-") {
                tracing::warn!("{}: {}", name, count);
            } else {
                tracing::info!("{}: {}", name, count);
            }
        }
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}
