// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeploycastError {
    /// Another deployment is already in flight. Retryable, not a fault.
    #[error("deployment already in progress")]
    Busy,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeploycastError {
    /// Whether the caller may simply retry later (currently only `Busy`).
    pub fn is_busy(&self) -> bool {
        matches!(self, DeploycastError::Busy)
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DeploycastError>;
