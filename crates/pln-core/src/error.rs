// crates/pln-core/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown hash algorithm {0}")]
    UnknownAlgorithm(String),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Deposit protocol error: {0}")]
    Protocol(String),

    #[error("Virus scanner error: {0}")]
    Scanner(String),

    #[error("Bag error: {0}")]
    Bag(String),

    #[error("Invalid deposit state '{0}'")]
    InvalidState(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl From<quick_xml::Error> for PipelineError {
    fn from(err: quick_xml::Error) -> Self {
        PipelineError::Xml(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
