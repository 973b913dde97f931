//! MCF Module - Graph node files
//!
//! Parsing, writing, merging, diffing, filtering and sharding of MCF
//! (`property: value` block) files.

pub mod diff;
pub mod filter;
pub mod loader;
pub mod merge;
pub mod node;
pub mod parser;
pub mod shard;
pub mod writer;

pub use diff::{fingerprint_node, McfDiff, McfDiffer, NodeDiff, PropertyDiff};
pub use filter::McfFilter;
pub use loader::{load_files_concurrently, LoadOptions};
pub use merge::{can_merge, merge_node, merge_nodes, MergePolicy};
pub use node::{McfNode, McfNodes};
pub use parser::{load_mcf_file, load_mcf_files, parse_mcf, ParseOptions};
pub use shard::{reshard_files, shard_index, shard_nodes, ShardOptions};
pub use writer::{nodes_to_text, write_mcf_file, WriteOptions};
