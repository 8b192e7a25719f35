//! Error types for nbdocs.
//!
//! Library crates use [`NbdocsError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all nbdocs operations.
#[derive(Debug, thiserror::Error)]
pub enum NbdocsError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A declared document has no source notebook on disk.
    #[error("missing source for document '{name}': expected {path:?}")]
    MissingSource { name: String, path: PathBuf },

    /// A code cell raised during execution.
    #[error("cell {index} failed: {message}")]
    CellExecution { index: usize, message: String },

    /// The kernel process could not be started or broke the protocol.
    #[error("kernel error: {0}")]
    Kernel(String),

    /// The executed notebook could not be rendered to markdown.
    #[error("render error: {message}")]
    Render { message: String },

    /// Notebook source parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad document name, schema mismatch, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NbdocsError>;

impl NbdocsError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a render error from any displayable message.
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a cell execution error for the cell at `index`.
    pub fn cell(index: usize, msg: impl Into<String>) -> Self {
        Self::CellExecution {
            index,
            message: msg.into(),
        }
    }

    /// Create a missing-source error.
    pub fn missing_source(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::MissingSource {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
