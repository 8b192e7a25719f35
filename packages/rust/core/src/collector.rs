//! Source collection: declared document names to notebook files on disk.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use nbdocs_notebook::NotebookFormat;
use nbdocs_shared::{BuildConfig, NbdocsError, Result, same_location, validate_document_name};

/// A resolved notebook source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookSource {
    /// Document base name.
    pub name: String,
    /// `<source_dir>/<name>.<ext>`
    pub path: PathBuf,
    pub format: NotebookFormat,
}

impl NotebookSource {
    /// Directory holding the source; the kernel runs here.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// File name of the source, e.g. `tutorial.ipynb`.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }
}

/// Resolve a single document name to its source file.
pub fn resolve(config: &BuildConfig, name: &str) -> Result<NotebookSource> {
    validate_document_name(name)?;

    let format = NotebookFormat::from_extension(&config.notebook_extension).ok_or_else(|| {
        NbdocsError::config(format!(
            "unsupported notebook extension '{}' (expected ipynb, md or myst)",
            config.notebook_extension
        ))
    })?;

    ensure_source_untouched(config, name)?;
    let path = config.source_path(name);
    if !path.is_file() {
        return Err(NbdocsError::missing_source(name, path));
    }

    debug!(name, path = %path.display(), ?format, "resolved source");
    Ok(NotebookSource {
        name: name.to_string(),
        path,
        format,
    })
}

/// Fail when a build or clean of `name` would write over or delete its
/// own source file.
pub fn ensure_source_untouched(config: &BuildConfig, name: &str) -> Result<()> {
    let source = config.source_path(name);
    let paths = config.paths_for(name);
    for artifact in [
        &paths.executed,
        &paths.local_markdown,
        &paths.published_markdown,
    ] {
        if same_file(&source, artifact) {
            return Err(NbdocsError::config(format!(
                "source {} of '{name}' is also a build artifact; \
                 move paths.source_dir away from paths.output_dir and paths.publish_dir",
                source.display()
            )));
        }
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    if same_location(a, b) {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Resolve every name, failing on the first missing source.
#[instrument(skip_all, fields(count = names.len()))]
pub fn collect(config: &BuildConfig, names: &[String]) -> Result<Vec<NotebookSource>> {
    names.iter().map(|name| resolve(config, name)).collect()
}
