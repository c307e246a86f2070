use std::path::PathBuf;
use thiserror::Error;

/// 実験全体で使用するエラー型。
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid physical parameter: {what}")]
    InvalidParameter { what: String },

    #[error("Invalid argument: {what}")]
    InvalidArgument { what: String },

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    Shape { expected: String, actual: String },

    #[error(
        "Model file '{0}' not found. Run the 'pinn' command first to train and save a model."
    )]
    ModelNotFound(PathBuf),

    #[error("Config error: {0}")]
    Config(#[from] burn::config::ConfigError),

    #[error("Recorder error: {0}")]
    Recorder(#[from] burn::record::RecorderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid_argument(what: impl Into<String>) -> Self {
        Error::InvalidArgument { what: what.into() }
    }

    pub(crate) fn invalid_parameter(what: impl Into<String>) -> Self {
        Error::InvalidParameter { what: what.into() }
    }
}
