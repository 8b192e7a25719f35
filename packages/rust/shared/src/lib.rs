//! Shared types, error model, and configuration for nbdocs.
//!
//! This crate is the foundation depended on by all other nbdocs crates.
//! It provides:
//! - [`NbdocsError`], the unified error type
//! - Build bookkeeping types ([`BuildStage`], [`PublishManifest`], [`DocumentPaths`])
//! - Configuration ([`AppConfig`], [`BuildConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BuildConfig, CONFIG_FILE_NAME, DRIVER_PLACEHOLDER, KernelConfig, PathsConfig,
    RenderConfig, init_config, load_config_from, same_location, validate_config,
    validate_document_name,
};
pub use error::{NbdocsError, Result};
pub use types::{
    BuildStage, CURRENT_SCHEMA_VERSION, DocumentPaths, EXECUTED_EXTENSION, MANIFEST_FILE_NAME,
    PublishManifest, PublishedEntry, assets_dir_name, executed_file_name, markdown_file_name,
};
