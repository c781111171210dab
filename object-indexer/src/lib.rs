//! # Object Indexer
//!
//! Main library for the object replication and indexing pipeline.
//!
//! This crate provides the entry point, configuration and dependency wiring
//! for running the pipeline locally: notifications are read from stdin and
//! processed against in-process collaborators.

pub mod config;
pub mod local_source;

pub use config::{Dependencies, Settings};
pub use local_source::LineNotificationSource;

use thiserror::Error;

/// Errors that can occur during indexer initialization or execution.
#[derive(Error, Debug)]
pub enum IndexerError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    PipelineError(#[from] object_indexer_pipeline::PipelineError),

    /// Dead-letter sink error.
    #[error("Dead-letter error: {0}")]
    DeadLetterError(#[from] object_indexer_repository::DeadLetterError),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl IndexerError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
