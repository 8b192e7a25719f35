//! Build bookkeeping types: pipeline stages, on-disk layout, publish manifest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version for the publish manifest format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// File name of the publish manifest inside the publish directory.
pub const MANIFEST_FILE_NAME: &str = ".nbdocs-manifest.json";

/// Executed notebooks are always nbformat JSON.
pub const EXECUTED_EXTENSION: &str = "ipynb";

// ---------------------------------------------------------------------------
// BuildStage
// ---------------------------------------------------------------------------

/// The four pipeline stages a document passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStage {
    Collect,
    Execute,
    Render,
    Publish,
}

impl BuildStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collect => "collect",
            Self::Execute => "execute",
            Self::Render => "render",
            Self::Publish => "publish",
        }
    }
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// DocumentPaths
// ---------------------------------------------------------------------------

/// Every path the pipeline reads or writes for one document name.
///
/// ```text
/// <output_dir>/<name>.output.ipynb   executed notebook (transient)
/// <output_dir>/<name>.md             local render (transient)
/// <output_dir>/<name>_files/         local assets (transient)
/// <publish_dir>/<name>.md            published markdown
/// <publish_dir>/<name>_files/        published assets
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPaths {
    pub name: String,
    pub executed: PathBuf,
    pub local_markdown: PathBuf,
    pub local_assets: PathBuf,
    pub published_markdown: PathBuf,
    pub published_assets: PathBuf,
}

impl DocumentPaths {
    pub fn new(name: &str, output_dir: &Path, publish_dir: &Path) -> Self {
        Self {
            name: name.to_string(),
            executed: output_dir.join(executed_file_name(name)),
            local_markdown: output_dir.join(markdown_file_name(name)),
            local_assets: output_dir.join(assets_dir_name(name)),
            published_markdown: publish_dir.join(markdown_file_name(name)),
            published_assets: publish_dir.join(assets_dir_name(name)),
        }
    }

    /// Paths removed by a plain `clean`.
    pub fn transient(&self) -> [&Path; 3] {
        [&self.executed, &self.local_markdown, &self.local_assets]
    }

    /// Paths additionally removed by `clean-all`.
    pub fn published(&self) -> [&Path; 2] {
        [&self.published_markdown, &self.published_assets]
    }
}

/// `<name>.output.ipynb`
pub fn executed_file_name(name: &str) -> String {
    format!("{name}.output.{EXECUTED_EXTENSION}")
}

/// `<name>.md`
pub fn markdown_file_name(name: &str) -> String {
    format!("{name}.md")
}

/// `<name>_files`
pub fn assets_dir_name(name: &str) -> String {
    format!("{name}_files")
}

// ---------------------------------------------------------------------------
// PublishManifest
// ---------------------------------------------------------------------------

/// The `.nbdocs-manifest.json` structure stored in the publish directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishManifest {
    /// Schema version for forward compatibility.
    pub schema_version: u32,
    /// Published documents keyed by name.
    #[serde(default)]
    pub documents: BTreeMap<String, PublishedEntry>,
}

impl Default for PublishManifest {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            documents: BTreeMap::new(),
        }
    }
}

/// One published document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedEntry {
    /// SHA-256 of the published markdown.
    pub markdown_sha256: String,
    /// Asset file names inside `<name>_files/`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<String>,
    /// Tool version that published the document.
    pub tool_version: String,
    /// When the document was last published.
    pub published_at: DateTime<Utc>,
}
