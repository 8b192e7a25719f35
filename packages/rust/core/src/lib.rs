//! Build orchestration for nbdocs.
//!
//! Ties the stages together: collect a notebook source, execute it in a
//! kernel, render the executed notebook to markdown, and publish the result.

pub mod collector;
pub mod executor;
mod files;
pub mod pipeline;
pub mod publisher;

/// Version recorded in the publish manifest.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");
