//! MCF Loader - Bounded concurrent loading of many MCF files
//!
//! Files are parsed on blocking worker threads, at most `max_concurrent` at a
//! time. Results are merged in input order, so the loaded node map does not
//! depend on which file finished first.

use crate::counters::Counters;
use crate::error::{ImportError, Result};
use crate::mcf::merge::{merge_nodes, MergePolicy};
use crate::mcf::node::McfNodes;
use crate::mcf::parser::{load_mcf_file, renumber_auto_keys, ParseOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub struct LoadOptions {
    pub max_concurrent: usize,
    pub parse: ParseOptions,
    pub policy: MergePolicy,
    pub multi_value_properties: Vec<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            parse: ParseOptions::default(),
            policy: MergePolicy::Append,
            multi_value_properties: Vec::new(),
        }
    }
}

pub async fn load_files_concurrently(
    paths: &[PathBuf],
    options: &LoadOptions,
    counters: &Counters,
) -> Result<McfNodes> {
    let semaphore = Arc::new(Semaphore::new(options.max_concurrent.max(1)));
    let mut tasks = JoinSet::new();

    for (idx, path) in paths.iter().cloned().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let parse = options.parse.clone();
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| ImportError::Process(format!("Loader closed: {}", e)))?;
            let result = tokio::task::spawn_blocking(move || load_mcf_file(&path, &parse))
                .await
                .map_err(|e| ImportError::Process(format!("Loader task failed: {}", e)))?;
            result.map(|nodes| (idx, nodes))
        });
    }

    let mut loaded: Vec<Option<McfNodes>> = vec![None; paths.len()];
    while let Some(joined) = tasks.join_next().await {
        let (idx, nodes) =
            joined.map_err(|e| ImportError::Process(format!("Loader task panicked: {}", e)))??;
        tracing::debug!("Loaded {} nodes from {}", nodes.len(), paths[idx].display());
        loaded[idx] = Some(nodes);
    }

    let mut merged = McfNodes::new();
    let mut next_auto_key = 0;
    for nodes in loaded.into_iter().flatten() {
        counters.add("mcf-input-nodes", nodes.len() as i64);
        merge_nodes(
            &mut merged,
            renumber_auto_keys(nodes, &mut next_auto_key),
            options.policy,
            &options.multi_value_properties,
            counters,
        );
    }
    tracing::info!("Loaded {} unique nodes from {} files", merged.len(), paths.len());
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_merges_in_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..6 {
            let path = dir.path().join(format!("{}.mcf", i));
            std::fs::write(&path, format!("Node: N{}\nname: \"n\"\n\nNode: Shared\nname: \"v{}\"\n", i, i))
                .unwrap();
            paths.push(path);
        }

        let counters = Counters::new();
        let options = LoadOptions {
            max_concurrent: 2,
            policy: MergePolicy::KeepFirst,
            ..LoadOptions::default()
        };
        let nodes = load_files_concurrently(&paths, &options, &counters).await.unwrap();

        assert_eq!(nodes.len(), 7);
        assert_eq!(nodes.keys().next().map(String::as_str), Some("N0"));
        assert_eq!(nodes["Shared"].first_value("name"), Some("\"v0\""));
        assert_eq!(counters.get("mcf-input-nodes"), 12);
    }

    #[tokio::test]
    async fn test_keyless_nodes_from_different_files_stay_apart() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mcf");
        let b = dir.path().join("b.mcf");
        std::fs::write(&a, "typeOf: dcs:StatVarObservation\nobservationAbout: dcid:geoId/06\nvalue: 1\n").unwrap();
        std::fs::write(&b, "typeOf: dcs:StatVarObservation\nobservationAbout: dcid:geoId/48\nvalue: 2\n").unwrap();

        let counters = Counters::new();
        let options = LoadOptions {
            max_concurrent: 2,
            ..LoadOptions::default()
        };
        let nodes = load_files_concurrently(&[a, b], &options, &counters).await.unwrap();

        assert_eq!(nodes.keys().collect::<Vec<_>>(), vec!["_node_0", "_node_1"]);
        assert_eq!(nodes["_node_0"].first_value("value"), Some("1"));
        assert_eq!(nodes["_node_1"].first_value("value"), Some("2"));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let counters = Counters::new();
        let result = load_files_concurrently(
            &[PathBuf::from("/nonexistent/input.mcf")],
            &LoadOptions::default(),
            &counters,
        )
        .await;
        assert!(result.is_err());
    }
}
