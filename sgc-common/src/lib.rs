//! # SGC Common Library
//!
//! Shared code for the subgenre classification tools including:
//! - Error types
//! - Configuration loading (TOML bootstrap, path resolution)
//! - Logging initialization
//! - Id-indexed delimited tables (metadata and feature matrices)
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod logging;
pub mod table;
pub mod time;

pub use error::{Error, Result};
pub use table::{FeatureMatrix, IdTable};
