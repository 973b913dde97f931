use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("PV map error: {0}")]
    PvMap(String),

    #[error("MCF error in {file}:{line}: {message}")]
    Mcf {
        file: String,
        line: usize,
        message: String,
    },

    #[error("Processing error: {0}")]
    Process(String),

    #[error("Eval error: {0}")]
    Eval(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, ImportError>;
