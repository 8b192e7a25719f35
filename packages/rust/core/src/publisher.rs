//! Publication placer.
//!
//! Places rendered documents into the publish directory and keeps the
//! publish manifest in step; removes build artifacts on clean requests.
//!
//! ```text
//! <publish_dir>/
//! ├── .nbdocs-manifest.json
//! ├── tutorial.md
//! └── tutorial_files/
//!     └── output_3_0.png
//! ```

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use nbdocs_markdown::RenderedDocument;
use nbdocs_shared::{
    BuildConfig, CURRENT_SCHEMA_VERSION, DocumentPaths, MANIFEST_FILE_NAME, NbdocsError,
    PublishManifest, PublishedEntry, Result, validate_document_name,
};

use crate::TOOL_VERSION;
use crate::collector::ensure_source_untouched;
use crate::files::{atomic_write, remove_path, sha256_hex, temp_path};

/// Output of a successful publish.
#[derive(Debug, Clone)]
pub struct PublishResult {
    pub markdown_path: PathBuf,
    /// `None` when the document has no assets.
    pub assets_dir: Option<PathBuf>,
    /// The manifest entry that was recorded.
    pub entry: PublishedEntry,
}

/// Paths removed by a clean operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub removed: Vec<PathBuf>,
}

impl CleanReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }

    fn remove(&mut self, path: &Path) -> Result<()> {
        if remove_path(path)? {
            self.removed.push(path.to_path_buf());
        }
        Ok(())
    }

    fn extend(&mut self, other: CleanReport) {
        self.removed.extend(other.removed);
    }
}

// ---------------------------------------------------------------------------
// Publish
// ---------------------------------------------------------------------------

/// Place a rendered document into `publish_dir`, replacing any prior version.
///
/// A prior asset directory is removed even when the new render has none.
/// The markdown is written via temp file + rename.
#[instrument(skip_all, fields(name = %rendered.name, publish_dir = %publish_dir.display()))]
pub fn publish(rendered: &RenderedDocument, publish_dir: &Path) -> Result<PublishResult> {
    std::fs::create_dir_all(publish_dir).map_err(|e| NbdocsError::io(publish_dir, e))?;
    let mut manifest = load_manifest(publish_dir)?;

    let assets_dir = publish_dir.join(rendered.assets_dir_name());
    if remove_path(&assets_dir)? {
        debug!(path = %assets_dir.display(), "removed previous assets");
    }

    let mut asset_names = Vec::with_capacity(rendered.assets.len());
    if !rendered.assets.is_empty() {
        std::fs::create_dir_all(&assets_dir).map_err(|e| NbdocsError::io(&assets_dir, e))?;
        for asset in &rendered.assets {
            let target = publish_dir.join(&asset.path);
            std::fs::write(&target, &asset.bytes).map_err(|e| NbdocsError::io(&target, e))?;
            if let Some(file) = target.file_name() {
                asset_names.push(file.to_string_lossy().into_owned());
            }
        }
    }
    asset_names.sort();

    let markdown_path = publish_dir.join(rendered.markdown_file_name());
    atomic_write(&markdown_path, rendered.markdown.as_bytes())?;

    let entry = PublishedEntry {
        markdown_sha256: sha256_hex(rendered.markdown.as_bytes()),
        assets: asset_names,
        tool_version: TOOL_VERSION.to_string(),
        published_at: Utc::now(),
    };

    manifest
        .documents
        .insert(rendered.name.clone(), entry.clone());
    save_manifest(publish_dir, &manifest)?;

    info!(
        path = %markdown_path.display(),
        assets = rendered.assets.len(),
        "document published"
    );

    Ok(PublishResult {
        markdown_path,
        assets_dir: (!rendered.assets.is_empty()).then_some(assets_dir),
        entry,
    })
}

// ---------------------------------------------------------------------------
// Clean
// ---------------------------------------------------------------------------

/// Remove the transient artifacts of one document. Idempotent.
#[instrument(skip(config))]
pub fn clean(config: &BuildConfig, name: &str) -> Result<CleanReport> {
    validate_document_name(name)?;
    ensure_source_untouched(config, name)?;
    let paths = config.paths_for(name);

    let mut report = CleanReport::default();
    for path in paths.transient() {
        report.remove(path)?;
    }
    report.remove(&temp_path(&paths.executed))?;
    report.remove(&temp_path(&paths.local_markdown))?;

    debug!(removed = report.removed.len(), "clean complete");
    Ok(report)
}

/// Remove transient and published artifacts for every name, plus their
/// manifest entries. Idempotent.
#[instrument(skip_all, fields(count = names.len()))]
pub fn clean_all(config: &BuildConfig, names: &[String]) -> Result<CleanReport> {
    let mut report = CleanReport::default();

    for name in names {
        report.extend(clean(config, name)?);

        let paths: DocumentPaths = config.paths_for(name);
        for path in paths.published() {
            report.remove(path)?;
        }
        report.remove(&temp_path(&paths.published_markdown))?;
    }

    let manifest_path = config.publish_dir.join(MANIFEST_FILE_NAME);
    if manifest_path.exists() {
        let mut manifest = load_manifest(&config.publish_dir)?;
        manifest.documents.retain(|name, _| !names.contains(name));

        if manifest.documents.is_empty() {
            report.remove(&manifest_path)?;
        } else {
            save_manifest(&config.publish_dir, &manifest)?;
        }
    }
    report.remove(&temp_path(&manifest_path))?;

    info!(removed = report.removed.len(), "clean-all complete");
    Ok(report)
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Read the publish manifest, or an empty one when none exists yet.
pub fn load_manifest(publish_dir: &Path) -> Result<PublishManifest> {
    let path = publish_dir.join(MANIFEST_FILE_NAME);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(PublishManifest::default());
        }
        Err(e) => return Err(NbdocsError::io(&path, e)),
    };

    let manifest: PublishManifest = serde_json::from_str(&content).map_err(|e| {
        NbdocsError::validation(format!("invalid {MANIFEST_FILE_NAME}: {e}"))
    })?;

    if manifest.schema_version != CURRENT_SCHEMA_VERSION {
        warn!(
            found = manifest.schema_version,
            expected = CURRENT_SCHEMA_VERSION,
            "manifest schema version differs; rewriting"
        );
    }

    Ok(manifest)
}

fn save_manifest(publish_dir: &Path, manifest: &PublishManifest) -> Result<()> {
    let manifest = PublishManifest {
        schema_version: CURRENT_SCHEMA_VERSION,
        documents: manifest.documents.clone(),
    };
    let mut json = serde_json::to_string_pretty(&manifest).map_err(|e| {
        NbdocsError::validation(format!("manifest serialization failed: {e}"))
    })?;
    json.push('\n');

    atomic_write(&publish_dir.join(MANIFEST_FILE_NAME), json.as_bytes())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
