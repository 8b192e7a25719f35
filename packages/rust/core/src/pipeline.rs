//! End-to-end build pipeline: collect → execute → render → publish.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};

use nbdocs_kernel::KernelFactory;
use nbdocs_markdown::RenderOptions;
use nbdocs_shared::{BuildConfig, BuildStage, NbdocsError};

use crate::collector;
use crate::executor::{self, ExecuteOptions};
use crate::publisher;

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a document enters a stage.
    fn phase(&self, name: &str, stage: BuildStage);
    /// Called after each code cell is run (or skipped).
    fn cell_executed(&self, name: &str, current: usize, total: usize);
    /// Called when a document has been published.
    fn document_done(&self, result: &DocumentResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str, _stage: BuildStage) {}
    fn cell_executed(&self, _name: &str, _current: usize, _total: usize) {}
    fn document_done(&self, _result: &DocumentResult) {}
}

/// A document build failure, tagged with the stage it failed in.
#[derive(Debug, thiserror::Error)]
#[error("{name}: {stage} failed: {source}")]
pub struct DocumentError {
    pub name: String,
    pub stage: BuildStage,
    pub source: NbdocsError,
}

impl DocumentError {
    fn at(name: &str, stage: BuildStage) -> impl FnOnce(NbdocsError) -> Self + '_ {
        move |source| Self {
            name: name.to_string(),
            stage,
            source,
        }
    }
}

/// Result of building one document.
#[derive(Debug, Clone)]
pub struct DocumentResult {
    pub name: String,
    /// Executed notebook artifact.
    pub executed: PathBuf,
    /// Published markdown.
    pub published: PathBuf,
    pub cells_executed: usize,
    pub assets: usize,
    pub elapsed: Duration,
}

/// Outcome of a `build-all` run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub built: Vec<DocumentResult>,
    pub failed: Vec<DocumentError>,
}

impl BatchReport {
    /// True iff no document failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.built.len() + self.failed.len()
    }
}

/// On-disk status of a declared document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentStatus {
    pub name: String,
    pub source: PathBuf,
    pub has_source: bool,
    pub executed: bool,
    pub published: bool,
}

/// Build one declared document through all four stages.
#[instrument(skip_all, fields(name = %name))]
pub async fn build_document<F: KernelFactory>(
    config: &BuildConfig,
    name: &str,
    factory: &F,
    progress: &dyn ProgressReporter,
) -> Result<DocumentResult, DocumentError> {
    let start = Instant::now();
    let paths = config.paths_for(name);

    // --- Stage 1: Collect ---
    progress.phase(name, BuildStage::Collect);
    if !config.is_declared(name) {
        return Err(DocumentError::at(name, BuildStage::Collect)(
            NbdocsError::validation(format!("document '{name}' is not declared in the config")),
        ));
    }
    let source =
        collector::resolve(config, name).map_err(DocumentError::at(name, BuildStage::Collect))?;

    // --- Stage 2: Execute ---
    progress.phase(name, BuildStage::Execute);
    let options = ExecuteOptions::from(&config.kernel);
    let summary = executor::execute(&source, &paths.executed, factory, &options, progress)
        .await
        .map_err(DocumentError::at(name, BuildStage::Execute))?;

    // --- Stage 3: Render ---
    progress.phase(name, BuildStage::Render);
    let render_opts = RenderOptions::new(name, &config.render).with_source(source.file_name());
    let rendered = nbdocs_markdown::render_file(&paths.executed, &render_opts)
        .and_then(|doc| nbdocs_markdown::write_rendered(&doc, &config.output_dir).map(|_| doc))
        .map_err(DocumentError::at(name, BuildStage::Render))?;

    // --- Stage 4: Publish ---
    progress.phase(name, BuildStage::Publish);
    let published = publisher::publish(&rendered, &config.publish_dir)
        .map_err(DocumentError::at(name, BuildStage::Publish))?;

    let result = DocumentResult {
        name: name.to_string(),
        executed: summary.path,
        published: published.markdown_path,
        cells_executed: summary.cells_executed,
        assets: rendered.assets.len(),
        elapsed: start.elapsed(),
    };

    progress.document_done(&result);
    info!(
        cells = result.cells_executed,
        assets = result.assets,
        elapsed_ms = result.elapsed.as_millis(),
        "document built"
    );

    Ok(result)
}

/// Build every declared document in order. A failure does not stop the batch.
#[instrument(skip_all, fields(documents = config.documents.len()))]
pub async fn build_all<F: KernelFactory>(
    config: &BuildConfig,
    factory: &F,
    progress: &dyn ProgressReporter,
) -> BatchReport {
    let mut report = BatchReport::default();

    if config.documents.is_empty() {
        warn!("no documents declared; nothing to build");
    }

    for name in &config.documents {
        match build_document(config, name, factory, progress).await {
            Ok(result) => report.built.push(result),
            Err(e) => {
                error!(document = %e.name, stage = %e.stage, error = %e.source, "document failed");
                report.failed.push(e);
            }
        }
    }

    info!(
        built = report.built.len(),
        failed = report.failed.len(),
        "build-all complete"
    );
    report
}

/// Status of every declared document.
pub fn document_status(config: &BuildConfig) -> Vec<DocumentStatus> {
    config
        .documents
        .iter()
        .map(|name| {
            let paths = config.paths_for(name);
            let source = config.source_path(name);
            DocumentStatus {
                name: name.clone(),
                has_source: source.is_file(),
                source,
                executed: paths.executed.is_file(),
                published: paths.published_markdown.is_file(),
            }
        })
        .collect()
}
