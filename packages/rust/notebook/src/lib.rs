//! Notebook data model and on-disk formats.
//!
//! Notebooks are read from two formats:
//! - nbformat 4 JSON (`.ipynb`), see [`parse_ipynb`]
//! - MyST text notebooks (`.md` / `.myst`), see [`parse_myst`]
//!
//! Executed notebooks are always written back as nbformat 4 JSON.

mod ipynb;
mod myst;

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use nbdocs_shared::{NbdocsError, Result};

pub use ipynb::{parse_ipynb, to_ipynb_string};
pub use myst::parse_myst;

/// nbformat major version we read and write.
pub const NBFORMAT: u32 = 4;

// ---------------------------------------------------------------------------
// Format detection
// ---------------------------------------------------------------------------

/// On-disk notebook source format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotebookFormat {
    Ipynb,
    Myst,
}

impl NotebookFormat {
    /// Map a file extension (without dot) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "ipynb" => Some(Self::Ipynb),
            "md" | "myst" => Some(Self::Myst),
            _ => None,
        }
    }

    /// Detect the format of a path from its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

/// Read and parse a notebook, dispatching on the file extension.
pub fn load(path: &Path) -> Result<Notebook> {
    let format = NotebookFormat::from_path(path).ok_or_else(|| {
        NbdocsError::parse(format!(
            "unsupported notebook extension: {}",
            path.display()
        ))
    })?;

    let content = std::fs::read_to_string(path).map_err(|e| NbdocsError::io(path, e))?;
    let notebook = match format {
        NotebookFormat::Ipynb => parse_ipynb(&content),
        NotebookFormat::Myst => parse_myst(&content),
    }
    .map_err(|e| match e {
        NbdocsError::Parse { message } => {
            NbdocsError::parse(format!("{}: {message}", path.display()))
        }
        other => other,
    })?;

    debug!(
        path = %path.display(),
        ?format,
        cells = notebook.cells.len(),
        "notebook loaded"
    );
    Ok(notebook)
}

// ---------------------------------------------------------------------------
// Notebook
// ---------------------------------------------------------------------------

/// An nbformat 4 notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub nbformat: u32,
    pub nbformat_minor: u32,
}

impl Notebook {
    /// Create an empty notebook with the given metadata.
    pub fn new(metadata: Map<String, Value>) -> Self {
        Self {
            cells: Vec::new(),
            metadata,
            nbformat: NBFORMAT,
            nbformat_minor: 4,
        }
    }

    /// Kernel language from `kernelspec.language` or `language_info.name`.
    pub fn language(&self) -> Option<&str> {
        let from = |section: &str, key: &str| {
            self.metadata
                .get(section)
                .and_then(|v| v.get(key))
                .and_then(Value::as_str)
        };
        from("kernelspec", "language").or_else(|| from("language_info", "name"))
    }

    /// Number of code cells.
    pub fn code_cell_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| matches!(c, Cell::Code(_)))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

/// A notebook cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum Cell {
    Markdown(TextCell),
    Code(CodeCell),
    Raw(TextCell),
}

impl Cell {
    pub fn metadata(&self) -> &Map<String, Value> {
        match self {
            Self::Markdown(c) | Self::Raw(c) => &c.metadata,
            Self::Code(c) => &c.metadata,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Self::Markdown(c) | Self::Raw(c) => c.source.as_str(),
            Self::Code(c) => c.source.as_str(),
        }
    }

    /// Values of `metadata.tags`.
    pub fn tags(&self) -> Vec<&str> {
        self.metadata()
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| tags.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().contains(&tag)
    }
}

/// Markdown or raw cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextCell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub source: MultilineString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Value>,
}

impl TextCell {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: MultilineString::from(source.into()),
            ..Default::default()
        }
    }
}

/// Code cell with its captured outputs.
///
/// `outputs` is required on read: a code cell without it is malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeCell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub execution_count: Option<u32>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub outputs: Vec<Output>,
    pub source: MultilineString,
}

impl CodeCell {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: MultilineString::from(source.into()),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// MIME type → payload (string, list of line strings, or JSON for `application/json`).
pub type MimeBundle = BTreeMap<String, Value>;

/// A captured code-cell output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    Stream {
        name: StreamName,
        text: MultilineString,
    },
    DisplayData {
        data: MimeBundle,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    ExecuteResult {
        #[serde(default)]
        execution_count: Option<u32>,
        data: MimeBundle,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl Output {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self::Stream {
            name: StreamName::Stdout,
            text: MultilineString::from(text.into()),
        }
    }

    pub fn display(data: MimeBundle) -> Self {
        Self::DisplayData {
            data,
            metadata: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

/// Read a MIME payload that must be text (a string or a list of strings).
pub fn mime_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => parts
            .iter()
            .map(|p| p.as_str())
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.concat()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// MultilineString
// ---------------------------------------------------------------------------

/// nbformat multi-line text: read from a string or a list of lines,
/// always written as a list of lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultilineString(pub String);

impl MultilineString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MultilineString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MultilineString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Serialize for MultilineString {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.split_inclusive('\n'))
    }
}

impl<'de> Deserialize<'de> for MultilineString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(String),
            Many(Vec<String>),
        }

        match Repr::deserialize(deserializer) {
            Ok(Repr::One(s)) => Ok(Self(s)),
            Ok(Repr::Many(lines)) => Ok(Self(lines.concat())),
            Err(_) => Err(de::Error::custom(
                "expected a string or a list of strings",
            )),
        }
    }
}
