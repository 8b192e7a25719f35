//! Notebook execution: run every code cell in a fresh kernel and write the
//! executed notebook artifact.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use nbdocs_kernel::{CellOutcome, ExecuteRequest, Kernel, KernelFactory, KernelInfo, KernelStart};
use nbdocs_notebook::{Cell, Notebook, Output};
use nbdocs_shared::{KernelConfig, NbdocsError, Result};

use crate::collector::NotebookSource;
use crate::files;
use crate::pipeline::ProgressReporter;

/// Cell tag: an error in this cell is expected and recorded as output.
pub const TAG_RAISES_EXCEPTION: &str = "raises-exception";
/// Cell tag: do not run this cell; keep whatever outputs it has.
pub const TAG_SKIP_EXECUTION: &str = "skip-execution";

/// Execution settings.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Record every cell error as output instead of failing.
    pub allow_errors: bool,
}

impl From<&KernelConfig> for ExecuteOptions {
    fn from(config: &KernelConfig) -> Self {
        Self {
            allow_errors: config.allow_errors,
        }
    }
}

/// What an execution run did.
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    /// Path of the written executed notebook.
    pub path: PathBuf,
    pub cells_executed: usize,
    pub cells_skipped: usize,
    /// Cell errors recorded as outputs (tolerated).
    pub errors_recorded: usize,
    pub elapsed: Duration,
}

/// Execute a notebook source and write the executed notebook to `output_path`.
///
/// Any earlier artifact at `output_path` is removed up front, so a failed
/// run leaves no artifact behind.
#[instrument(skip_all, fields(name = %source.name, path = %source.path.display()))]
pub async fn execute<F: KernelFactory>(
    source: &NotebookSource,
    output_path: &Path,
    factory: &F,
    options: &ExecuteOptions,
    progress: &dyn ProgressReporter,
) -> Result<ExecutionSummary> {
    let start = Instant::now();

    if files::remove_path(output_path)? {
        debug!(path = %output_path.display(), "removed stale executed notebook");
    }

    let mut notebook = nbdocs_notebook::load(&source.path)?;
    let total = notebook.code_cell_count();

    let mut summary = ExecutionSummary {
        path: output_path.to_path_buf(),
        cells_executed: 0,
        cells_skipped: 0,
        errors_recorded: 0,
        elapsed: Duration::ZERO,
    };

    if total > 0 {
        let mut kernel = factory
            .start(KernelStart {
                working_dir: source.dir(),
                document: &source.name,
            })
            .await?;

        let run = run_cells(&mut kernel, &mut notebook, options, progress, &source.name, &mut summary)
            .await;

        let info = kernel.info().clone();
        if let Err(e) = kernel.shutdown().await {
            warn!(name = %source.name, "kernel shutdown failed: {e}");
        }
        run?;

        record_language_info(&mut notebook, &info);
    }

    let content = nbdocs_notebook::to_ipynb_string(&notebook)?;
    files::atomic_write(output_path, content.as_bytes())?;

    summary.elapsed = start.elapsed();
    info!(
        executed = summary.cells_executed,
        skipped = summary.cells_skipped,
        errors = summary.errors_recorded,
        elapsed_ms = summary.elapsed.as_millis(),
        "notebook executed"
    );

    Ok(summary)
}

async fn run_cells<K: Kernel>(
    kernel: &mut K,
    notebook: &mut Notebook,
    options: &ExecuteOptions,
    progress: &dyn ProgressReporter,
    name: &str,
    summary: &mut ExecutionSummary,
) -> Result<()> {
    let total = notebook.code_cell_count();
    let mut seen = 0;
    let mut execution_count = 0u32;

    for (index, cell) in notebook.cells.iter_mut().enumerate() {
        let skip = cell.has_tag(TAG_SKIP_EXECUTION);
        let tolerate = options.allow_errors || cell.has_tag(TAG_RAISES_EXCEPTION);
        let Cell::Code(code) = cell else {
            continue;
        };
        seen += 1;

        if skip {
            debug!(cell = index, "skipping cell");
            summary.cells_skipped += 1;
            progress.cell_executed(name, seen, total);
            continue;
        }

        execution_count += 1;
        code.execution_count = Some(execution_count);
        code.outputs.clear();

        let source = code.source.as_str().to_owned();
        let outcome = kernel
            .execute(ExecuteRequest {
                cell_index: index,
                code: &source,
            })
            .await
            .map_err(|e| match e {
                NbdocsError::Kernel(message) => NbdocsError::cell(index, message),
                other => other,
            })?;

        summary.cells_executed += 1;
        progress.cell_executed(name, seen, total);

        match outcome {
            CellOutcome::Completed { outputs } => {
                code.outputs = numbered(outputs, execution_count);
            }
            CellOutcome::Failed { outputs, error } => {
                code.outputs = numbered(outputs, execution_count);
                code.outputs.push(error.to_output());

                if !tolerate {
                    return Err(NbdocsError::cell(index, error.summary()));
                }
                debug!(cell = index, error = %error.summary(), "cell error recorded");
                summary.errors_recorded += 1;
            }
        }
    }

    Ok(())
}

/// Stamp `execute_result` outputs with the cell's execution count.
fn numbered(mut outputs: Vec<Output>, count: u32) -> Vec<Output> {
    for output in &mut outputs {
        if let Output::ExecuteResult {
            execution_count, ..
        } = output
        {
            *execution_count = Some(count);
        }
    }
    outputs
}

fn record_language_info(notebook: &mut Notebook, info: &KernelInfo) {
    let Some(language) = &info.language else {
        return;
    };

    let entry = notebook
        .metadata
        .entry("language_info")
        .or_insert_with(|| json!({}));
    if !entry.is_object() {
        *entry = json!({});
    }
    if let Value::Object(map) = entry {
        map.insert("name".into(), json!(language));
        if let Some(version) = &info.version {
            map.insert("version".into(), json!(version));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn execute_results_get_cell_count() {
        let outputs = vec![
            Output::stdout("x\n"),
            Output::ExecuteResult {
                execution_count: None,
                data: Default::default(),
                metadata: Map::new(),
            },
        ];
        let out = numbered(outputs, 7);
        assert!(matches!(
            out[1],
            Output::ExecuteResult {
                execution_count: Some(7),
                ..
            }
        ));
    }

    #[test]
    fn language_info_merges_into_metadata() {
        let mut nb = Notebook::new(Map::new());
        nb.metadata
            .insert("language_info".into(), json!({"name": "old", "mimetype": "text/x-python"}));

        record_language_info(
            &mut nb,
            &KernelInfo {
                language: Some("python".into()),
                version: Some("3.12.1".into()),
            },
        );

        let info = &nb.metadata["language_info"];
        assert_eq!(info["name"], "python");
        assert_eq!(info["version"], "3.12.1");
        assert_eq!(info["mimetype"], "text/x-python");
    }

    #[test]
    fn unknown_language_leaves_metadata_alone() {
        let mut nb = Notebook::new(Map::new());
        record_language_info(&mut nb, &KernelInfo::default());
        assert!(nb.metadata.is_empty());
    }

    #[test]
    fn options_follow_kernel_config() {
        let config = KernelConfig {
            allow_errors: true,
            ..KernelConfig::default()
        };
        assert!(ExecuteOptions::from(&config).allow_errors);
    }
}
