//! MCF Parser - Reads `property: value` blocks into nodes

use crate::error::{ImportError, Result};
use crate::mcf::merge::append_node;
use crate::mcf::node::{split_values, strip_namespace, McfNode, McfNodes, AUTO_KEY_PREFIX};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Drop `dcid:`/`dcs:`/`schema:` prefixes from values while parsing.
    pub strip_namespaces: bool,
}

/// Parse MCF text into a fresh node map.
pub fn parse_mcf(text: &str, source: &str, options: &ParseOptions) -> Result<McfNodes> {
    let mut nodes = McfNodes::new();
    parse_mcf_into(text, source, options, &mut nodes)?;
    Ok(nodes)
}

/// Parse MCF text, merging nodes into `nodes`. Returns the number of node
/// blocks read.
pub fn parse_mcf_into(
    text: &str,
    source: &str,
    options: &ParseOptions,
    nodes: &mut McfNodes,
) -> Result<usize> {
    let mut current: Option<McfNode> = None;
    let mut blocks = 0;

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            if let Some(node) = current.take() {
                blocks += flush_node(node, nodes);
            }
            continue;
        }
        if line.starts_with('#') || line.starts_with("//") {
            continue;
        }

        let (prop, value) = line.split_once(':').ok_or_else(|| ImportError::Mcf {
            file: source.to_string(),
            line: idx + 1,
            message: format!("expected 'property: value', got '{}'", line),
        })?;
        let prop = prop.trim();
        if prop.is_empty() || prop.contains(char::is_whitespace) {
            return Err(ImportError::Mcf {
                file: source.to_string(),
                line: idx + 1,
                message: format!("invalid property name '{}'", prop),
            });
        }

        if prop == "Node" {
            if let Some(node) = current.take() {
                blocks += flush_node(node, nodes);
            }
        }
        let node = current.get_or_insert_with(McfNode::new);
        if options.strip_namespaces && prop != "Node" {
            for value in split_values(value) {
                node.add_value(prop, strip_namespace(&value));
            }
        } else {
            node.add_values(prop, value);
        }
    }
    if let Some(node) = current.take() {
        blocks += flush_node(node, nodes);
    }
    Ok(blocks)
}

fn flush_node(node: McfNode, nodes: &mut McfNodes) -> usize {
    if node.is_empty() {
        return 0;
    }
    let key = node
        .key()
        .unwrap_or_else(|| format!("{}{}", AUTO_KEY_PREFIX, nodes.len()));
    match nodes.get_mut(&key) {
        Some(existing) => append_node(existing, &node),
        None => {
            nodes.insert(key, node);
        }
    }
    1
}

pub fn load_mcf_file(path: &Path, options: &ParseOptions) -> Result<McfNodes> {
    let mut nodes = McfNodes::new();
    load_mcf_file_into(path, options, &mut nodes)?;
    Ok(nodes)
}

pub fn load_mcf_file_into(path: &Path, options: &ParseOptions, nodes: &mut McfNodes) -> Result<usize> {
    let text = std::fs::read_to_string(path)?;
    let blocks = parse_mcf_into(&text, &path.display().to_string(), options, nodes)?;
    tracing::debug!("Read {} nodes from {}", blocks, path.display());
    Ok(blocks)
}

/// Give keyless nodes read from one file fresh `_node_N` keys starting at
/// `*next`, so nodes loaded from separate files never share an auto key.
pub fn renumber_auto_keys(nodes: McfNodes, next: &mut usize) -> McfNodes {
    nodes
        .into_iter()
        .map(|(key, node)| {
            if node.key().is_some() || !key.starts_with(AUTO_KEY_PREFIX) {
                return (key, node);
            }
            let key = format!("{}{}", AUTO_KEY_PREFIX, *next);
            *next += 1;
            (key, node)
        })
        .collect()
}

/// Load files in order; nodes sharing a key are merged by appending values.
pub fn load_mcf_files(paths: &[PathBuf], options: &ParseOptions) -> Result<McfNodes> {
    let mut nodes = McfNodes::new();
    for path in paths {
        load_mcf_file_into(path, options, &mut nodes)?;
    }
    tracing::info!("Loaded {} nodes from {} files", nodes.len(), paths.len());
    Ok(nodes)
}
