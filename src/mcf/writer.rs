//! MCF Writer - Renders nodes back to MCF text

use crate::error::Result;
use crate::mcf::node::{McfNode, McfNodes};
use std::fmt::Write as _;
use std::path::Path;

/// Properties emitted ahead of all others, in this order.
const LEADING_PROPERTIES: [&str; 3] = ["Node", "dcid", "typeOf"];

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub sort_nodes: bool,
    pub sort_properties: bool,
    pub header: Option<String>,
    pub ignore_properties: Vec<String>,
}

/// Render a single node, without the trailing blank line.
pub fn node_to_text(node: &McfNode, options: &WriteOptions) -> String {
    let mut props: Vec<&String> = node
        .properties()
        .filter(|p| !LEADING_PROPERTIES.contains(&p.as_str()))
        .filter(|p| !options.ignore_properties.iter().any(|i| i == *p))
        .collect();
    if options.sort_properties {
        props.sort();
    }

    let mut text = String::new();
    let leading = LEADING_PROPERTIES
        .iter()
        .copied()
        .filter(|p| !options.ignore_properties.iter().any(|i| i == *p));
    for prop in leading.chain(props.into_iter().map(|p| p.as_str())) {
        if let Some(values) = node.get(prop) {
            let _ = writeln!(text, "{}: {}", prop, values.join(", "));
        }
    }
    text
}

pub fn nodes_to_text(nodes: &McfNodes, options: &WriteOptions) -> String {
    let mut text = String::new();
    if let Some(header) = &options.header {
        for line in header.lines() {
            let _ = writeln!(text, "# {}", line);
        }
        text.push('\n');
    }

    let mut keys: Vec<&String> = nodes.keys().collect();
    if options.sort_nodes {
        keys.sort();
    }
    for key in keys {
        let node = &nodes[key.as_str()];
        let rendered = node_to_text(node, options);
        if rendered.is_empty() {
            continue;
        }
        text.push_str(&rendered);
        text.push('\n');
    }
    text
}

pub fn write_mcf_file(path: &Path, nodes: &McfNodes, options: &WriteOptions) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, nodes_to_text(nodes, options))?;
    tracing::info!("Wrote {} nodes to {}", nodes.len(), path.display());
    Ok(())
}
