//! Common error types for SGC

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for SGC operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the SGC crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Delimited table read/write error (wraps csv::Error)
    #[error("Table error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested file or resource not found
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Malformed table content (bad header, non-numeric cell, duplicate id)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
