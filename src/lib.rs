pub mod config;
pub mod counters;
pub mod error;
pub mod mcf;
pub mod pvmap;
pub mod sampler;
pub mod statvar;

pub use config::ImportConfig;
pub use counters::Counters;
pub use error::{ImportError, Result};
