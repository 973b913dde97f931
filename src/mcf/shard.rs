//! MCF Shard - Deterministic redistribution of nodes across output files

use crate::counters::Counters;
use crate::error::{ImportError, Result};
use crate::mcf::merge::{merge_nodes, MergePolicy};
use crate::mcf::node::McfNodes;
use crate::mcf::parser::{load_mcf_file, renumber_auto_keys, ParseOptions};
use crate::mcf::writer::{write_mcf_file, WriteOptions};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Shard for a node key: the first 8 bytes of SHA-256(key) as a big-endian
/// integer, modulo `num_shards`.
pub fn shard_index(key: &str, num_shards: usize) -> usize {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % num_shards.max(1) as u64) as usize
}

/// Split nodes into `num_shards` maps, each sorted by key.
pub fn shard_nodes(nodes: McfNodes, num_shards: usize) -> Vec<McfNodes> {
    let num_shards = num_shards.max(1);
    let mut shards: Vec<McfNodes> = (0..num_shards).map(|_| McfNodes::new()).collect();
    for (key, node) in nodes {
        let idx = shard_index(&key, num_shards);
        shards[idx].insert(key, node);
    }
    for shard in shards.iter_mut() {
        shard.sort_keys();
    }
    shards
}

/// `<prefix>-00001-of-00004.mcf`
pub fn shard_file_name(prefix: &str, index: usize, num_shards: usize) -> PathBuf {
    PathBuf::from(format!("{}-{:05}-of-{:05}.mcf", prefix, index, num_shards))
}

pub struct ShardOptions {
    pub num_shards: usize,
    pub policy: MergePolicy,
    pub multi_value_properties: Vec<String>,
    pub sort_properties: bool,
}

/// Load inputs, deduplicate nodes by key, and write them out across
/// `num_shards` files. Returns the paths written.
pub fn reshard_files(
    inputs: &[PathBuf],
    output_prefix: &Path,
    options: &ShardOptions,
    counters: &Counters,
) -> Result<Vec<PathBuf>> {
    if options.num_shards == 0 {
        return Err(ImportError::Config("num_shards must be at least 1".to_string()));
    }
    let mut nodes = McfNodes::new();
    let mut next_auto_key = 0;
    for input in inputs {
        let file_nodes = load_mcf_file(input, &ParseOptions::default())?;
        counters.add("mcf-input-nodes", file_nodes.len() as i64);
        merge_nodes(
            &mut nodes,
            renumber_auto_keys(file_nodes, &mut next_auto_key),
            options.policy,
            &options.multi_value_properties,
            counters,
        );
    }
    counters.set("mcf-unique-nodes", nodes.len() as i64);
    write_shards(nodes, output_prefix, options, counters)
}

pub fn write_shards(
    nodes: McfNodes,
    output_prefix: &Path,
    options: &ShardOptions,
    counters: &Counters,
) -> Result<Vec<PathBuf>> {
    let prefix = output_prefix.display().to_string();
    let write_options = WriteOptions {
        sort_nodes: true,
        sort_properties: options.sort_properties,
        ..WriteOptions::default()
    };
    let mut written = Vec::new();
    for (idx, shard) in shard_nodes(nodes, options.num_shards).into_iter().enumerate() {
        let path = shard_file_name(&prefix, idx, options.num_shards);
        counters.add(&format!("mcf-shard-{:05}-nodes", idx), shard.len() as i64);
        write_mcf_file(&path, &shard, &write_options)?;
        written.push(path);
    }
    Ok(written)
}
