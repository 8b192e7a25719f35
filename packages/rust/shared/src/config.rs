//! Build configuration for nbdocs.
//!
//! The project config lives in `nbdocs.toml` next to the notebooks.
//! CLI flags override config file values, which override defaults.
//! Relative paths in the file resolve against the file's own directory.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NbdocsError, Result};
use crate::types::DocumentPaths;

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "nbdocs.toml";

/// Placeholder in `kernel.args` replaced by the embedded driver script.
pub const DRIVER_PLACEHOLDER: &str = "{driver}";

// ---------------------------------------------------------------------------
// Config structs (matching nbdocs.toml schema)
// ---------------------------------------------------------------------------

/// Top-level project config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Declared document base names, built in this order.
    #[serde(default)]
    pub documents: Vec<String>,

    /// Directory layout.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Kernel subprocess settings.
    #[serde(default)]
    pub kernel: KernelConfig,

    /// Markdown rendering settings.
    #[serde(default)]
    pub render: RenderConfig,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where notebook sources live.
    #[serde(default = "default_source_dir")]
    pub source_dir: String,

    /// Where executed notebooks and local renders are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Where finished markdown and assets are published.
    #[serde(default = "default_publish_dir")]
    pub publish_dir: String,

    /// Source notebook extension without the dot (`ipynb`, `md`, `myst`).
    #[serde(default = "default_notebook_extension")]
    pub notebook_extension: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            output_dir: default_output_dir(),
            publish_dir: default_publish_dir(),
            notebook_extension: default_notebook_extension(),
        }
    }
}

fn default_source_dir() -> String {
    ".".into()
}
fn default_output_dir() -> String {
    "_build".into()
}
fn default_publish_dir() -> String {
    "docs".into()
}
fn default_notebook_extension() -> String {
    "ipynb".into()
}

/// `[kernel]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Interpreter executable.
    #[serde(default = "default_kernel_command")]
    pub command: String,

    /// Interpreter arguments; `{driver}` is replaced by the driver script.
    #[serde(default = "default_kernel_args")]
    pub args: Vec<String>,

    /// Maximum seconds a single cell may run.
    #[serde(default = "default_cell_timeout")]
    pub cell_timeout_secs: u64,

    /// Maximum seconds to wait for the kernel's ready handshake.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Record cell errors as outputs instead of failing the build.
    #[serde(default)]
    pub allow_errors: bool,

    /// Extra environment for the kernel process.
    #[serde(default = "default_kernel_env")]
    pub env: BTreeMap<String, String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            command: default_kernel_command(),
            args: default_kernel_args(),
            cell_timeout_secs: default_cell_timeout(),
            startup_timeout_secs: default_startup_timeout(),
            allow_errors: false,
            env: default_kernel_env(),
        }
    }
}

fn default_kernel_command() -> String {
    "python3".into()
}
fn default_kernel_args() -> Vec<String> {
    vec!["-u".into(), "-c".into(), DRIVER_PLACEHOLDER.into()]
}
fn default_cell_timeout() -> u64 {
    600
}
fn default_startup_timeout() -> u64 {
    60
}
fn default_kernel_env() -> BTreeMap<String, String> {
    BTreeMap::from([("MPLBACKEND".to_string(), "Agg".to_string())])
}

/// `[render]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Prepend YAML front matter (title, source) to each document.
    #[serde(default)]
    pub front_matter: bool,

    /// Code fence language when the notebook metadata names none.
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Render stderr stream outputs.
    #[serde(default = "default_true")]
    pub include_stderr: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            front_matter: false,
            default_language: default_language(),
            include_stderr: true,
        }
    }
}

fn default_language() -> String {
    "python".into()
}
fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Build config (runtime, resolved from config file + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime build configuration with resolved directories.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub publish_dir: PathBuf,
    pub notebook_extension: String,
    pub documents: Vec<String>,
    pub kernel: KernelConfig,
    pub render: RenderConfig,
}

impl BuildConfig {
    /// Resolve an [`AppConfig`] against the directory containing its file.
    pub fn resolve(config: &AppConfig, root: &Path) -> Self {
        let join = |p: &str| {
            let p = Path::new(p);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            }
        };

        Self {
            source_dir: join(&config.paths.source_dir),
            output_dir: join(&config.paths.output_dir),
            publish_dir: join(&config.paths.publish_dir),
            notebook_extension: config
                .paths
                .notebook_extension
                .trim_start_matches('.')
                .to_string(),
            documents: config.documents.clone(),
            kernel: config.kernel.clone(),
            render: config.render.clone(),
        }
    }

    /// Layout of every file the pipeline touches for `name`.
    pub fn paths_for(&self, name: &str) -> DocumentPaths {
        DocumentPaths::new(name, &self.output_dir, &self.publish_dir)
    }

    /// Source path for a document name.
    pub fn source_path(&self, name: &str) -> PathBuf {
        self.source_dir
            .join(format!("{name}.{}", self.notebook_extension))
    }

    /// Whether `name` is one of the declared documents.
    pub fn is_declared(&self, name: &str) -> bool {
        self.documents.iter().any(|d| d == name)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load the project config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NbdocsError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        NbdocsError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    validate_config(&config)?;
    tracing::debug!(?path, documents = config.documents.len(), "loaded config");
    Ok(config)
}

/// Write a starter config file at `path`, declaring a `tutorial` document.
/// Refuses to overwrite.
pub fn init_config(path: &Path) -> Result<PathBuf> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| NbdocsError::io(dir, e))?;
    }

    if path.exists() {
        return Err(NbdocsError::config(format!(
            "{} already exists",
            path.display()
        )));
    }

    let config = AppConfig {
        documents: vec!["tutorial".into()],
        ..AppConfig::default()
    };
    let content =
        toml::to_string_pretty(&config).map_err(|e| NbdocsError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| NbdocsError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path.to_path_buf())
}

/// Reject configs the pipeline cannot build from.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.paths.notebook_extension.trim_start_matches('.').is_empty() {
        return Err(NbdocsError::config("paths.notebook_extension must not be empty"));
    }
    if config.kernel.command.trim().is_empty() {
        return Err(NbdocsError::config("kernel.command must not be empty"));
    }

    // `<name>.md` sources share a file name with the rendered markdown.
    let extension = config.paths.notebook_extension.trim_start_matches('.');
    if extension.eq_ignore_ascii_case("md") {
        let source = Path::new(&config.paths.source_dir);
        for (key, dir) in [
            ("output_dir", &config.paths.output_dir),
            ("publish_dir", &config.paths.publish_dir),
        ] {
            if same_location(source, Path::new(dir)) {
                return Err(NbdocsError::config(format!(
                    "paths.source_dir and paths.{key} are the same directory; \
                     rendered markdown would overwrite the .md notebook sources"
                )));
            }
        }
    }

    let mut seen = HashSet::new();
    for name in &config.documents {
        validate_document_name(name)?;
        if !seen.insert(name.as_str()) {
            return Err(NbdocsError::config(format!(
                "document '{name}' is declared more than once"
            )));
        }
    }

    Ok(())
}

/// Lexical path equality, ignoring `.` components.
pub fn same_location(a: &Path, b: &Path) -> bool {
    fn parts(p: &Path) -> Vec<Component<'_>> {
        p.components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect::<Vec<_>>()
    }
    parts(a) == parts(b)
}

/// A document name is a bare file stem: non-empty, no separators, no `..`.
pub fn validate_document_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(NbdocsError::validation("document name must not be empty"));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(NbdocsError::validation(format!(
            "document name '{name}' must be a bare file stem"
        )));
    }
    Ok(())
}
