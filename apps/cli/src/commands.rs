//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, bail, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use nbdocs_core::pipeline::{self, DocumentResult, ProgressReporter};
use nbdocs_core::publisher;
use nbdocs_kernel::{BridgeFactory, BridgeSpec};
use nbdocs_shared::{AppConfig, BuildConfig, BuildStage, init_config, load_config_from};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// nbdocs: execute notebooks and publish them as Markdown.
#[derive(Parser)]
#[command(
    name = "nbdocs",
    version,
    about = "Execute notebooks and publish them as Markdown documentation.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Path to the project config file.
    #[arg(long, default_value = "nbdocs.toml", global = true, env = "NBDOCS_CONFIG")]
    pub config: PathBuf,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Defaults to `build-all`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand, Debug, PartialEq)]
pub(crate) enum Command {
    /// Execute, render, and publish one declared document.
    Build {
        /// Document name (source file stem).
        name: String,

        /// Record every cell error as output instead of failing.
        #[arg(long)]
        allow_errors: bool,
    },

    /// Build every declared document.
    BuildAll {
        /// Record every cell error as output instead of failing.
        #[arg(long)]
        allow_errors: bool,
    },

    /// Remove executed notebooks and local renders.
    Clean {
        /// Document to clean. Defaults to every declared document.
        name: Option<String>,
    },

    /// Remove transient artifacts and published documents.
    CleanAll,

    /// List declared documents and their build status.
    List,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand, Debug, PartialEq)]
pub(crate) enum ConfigAction {
    /// Write a default nbdocs.toml.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "nbdocs=info",
        1 => "nbdocs=debug",
        _ => "nbdocs=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let command = cli.command.unwrap_or(Command::BuildAll {
        allow_errors: false,
    });

    match command {
        Command::Build { name, allow_errors } => {
            let config = load_build_config(&cli.config, allow_errors)?;
            cmd_build(&config, &name).await
        }
        Command::BuildAll { allow_errors } => {
            let config = load_build_config(&cli.config, allow_errors)?;
            cmd_build_all(&config).await
        }
        Command::Clean { name } => cmd_clean(&load_build_config(&cli.config, false)?, name),
        Command::CleanAll => cmd_clean_all(&load_build_config(&cli.config, false)?),
        Command::List => cmd_list(&load_build_config(&cli.config, false)?),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(&cli.config),
            ConfigAction::Show => cmd_config_show(&cli.config),
        },
    }
}

/// Load the config file and resolve it against its own directory.
fn load_build_config(path: &Path, allow_errors: bool) -> Result<BuildConfig> {
    let app = load_config_from(path)
        .map_err(|e| eyre!("{e}\n(run `nbdocs config init` to create a config file)"))?;
    let mut config = BuildConfig::resolve(&app, config_root(path));
    if allow_errors {
        config.kernel.allow_errors = true;
    }
    Ok(config)
}

fn config_root(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn kernel_factory(config: &BuildConfig) -> BridgeFactory {
    BridgeFactory::new(BridgeSpec::from(&config.kernel))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_build(config: &BuildConfig, name: &str) -> Result<()> {
    info!(name, "building document");
    let factory = kernel_factory(config);
    let reporter = CliProgress::new();

    let result = pipeline::build_document(config, name, &factory, &reporter).await;
    reporter.finish();

    match result {
        Ok(result) => {
            print_built(&result);
            Ok(())
        }
        Err(e) => {
            eprintln!("  FAILED  {}  [{}]  {}", e.name, e.stage, e.source);
            Err(e.into())
        }
    }
}

async fn cmd_build_all(config: &BuildConfig) -> Result<()> {
    info!(documents = config.documents.len(), "building all documents");
    let factory = kernel_factory(config);
    let reporter = CliProgress::new();

    let report = pipeline::build_all(config, &factory, &reporter).await;
    reporter.finish();

    for result in &report.built {
        print_built(result);
    }
    for failure in &report.failed {
        eprintln!(
            "  FAILED  {}  [{}]  {}",
            failure.name, failure.stage, failure.source
        );
    }

    println!();
    println!(
        "  {} built, {} failed, {} total",
        report.built.len(),
        report.failed.len(),
        report.total()
    );

    if !report.is_success() {
        let names: Vec<&str> = report.failed.iter().map(|f| f.name.as_str()).collect();
        bail!("{} document(s) failed: {}", names.len(), names.join(", "));
    }
    Ok(())
}

fn print_built(result: &DocumentResult) {
    println!(
        "  built   {}  ({} cells, {} assets, {:.1}s)  -> {}",
        result.name,
        result.cells_executed,
        result.assets,
        result.elapsed.as_secs_f64(),
        result.published.display()
    );
}

fn cmd_clean(config: &BuildConfig, name: Option<String>) -> Result<()> {
    let names = match name {
        Some(name) => vec![name],
        None => config.documents.clone(),
    };

    let mut removed = 0;
    for name in &names {
        let report = publisher::clean(config, name)?;
        for path in &report.removed {
            println!("  removed {}", path.display());
        }
        removed += report.removed.len();
    }

    info!(documents = names.len(), removed, "clean complete");
    Ok(())
}

fn cmd_clean_all(config: &BuildConfig) -> Result<()> {
    let report = publisher::clean_all(config, &config.documents)?;
    for path in &report.removed {
        println!("  removed {}", path.display());
    }
    info!(removed = report.removed.len(), "clean-all complete");
    Ok(())
}

fn cmd_list(config: &BuildConfig) -> Result<()> {
    let statuses = pipeline::document_status(config);
    if statuses.is_empty() {
        println!("No documents declared.");
        return Ok(());
    }

    let flag = |set: bool, label: &'static str| if set { label } else { "-" };
    for status in statuses {
        println!(
            "  {:<24} {:<8} {:<9} {:<10} {}",
            status.name,
            flag(status.has_source, "source"),
            flag(status.executed, "executed"),
            flag(status.published, "published"),
            status.source.display()
        );
    }
    Ok(())
}

fn cmd_config_init(path: &Path) -> Result<()> {
    let created = init_config(path)?;
    println!("Config initialized at: {}", created.display());
    Ok(())
}

fn cmd_config_show(path: &Path) -> Result<()> {
    let config: AppConfig = load_config_from(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str, stage: BuildStage) {
        self.spinner.set_message(format!("{name}: {stage}"));
    }

    fn cell_executed(&self, name: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("{name}: executing [{current}/{total}]"));
    }

    fn document_done(&self, result: &DocumentResult) {
        self.spinner.set_message(format!("{}: published", result.name));
    }
}
