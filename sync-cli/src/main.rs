use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use remote_sync::import::{self, BuildModule, ImportDecision};
use remote_sync::{
    default_config_path, load_config_store, ConfigStore, Engine, EventChannel, LaunchOutcome,
    NoopHost, RunEvent, RunHandle, RunStatus, SyncConfig, Trigger,
};
use tracing::{info, warn};

mod logging;

#[derive(Parser)]
#[command(name = "rsync-mirror")]
#[command(about = "Mirror build output and resources onto configured target locations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Also write JSON logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Print run events as JSON lines instead of console text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize the given files, or every mapping when none are given
    Run {
        files: Vec<PathBuf>,
    },
    /// Synchronize after a build, using only groups enabled for compilation
    CompileFinished {
        /// Output roots written by the build
        roots: Vec<PathBuf>,
    },
    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
    /// Add a mapping from build module properties
    Import {
        /// Module name, used in log output
        #[arg(long)]
        module: String,

        /// Compiled output directory of the module
        #[arg(long)]
        output_dir: PathBuf,

        /// Module property as KEY=VALUE; repeatable
        #[arg(short = 'D', long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,
    },
}

#[derive(Subcommand)]
enum ConfigActions {
    /// Validate configuration file
    Validate,
    /// Show current configuration
    Show,
    /// Generate default configuration
    Generate {
        /// Output path for configuration
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = logging::init_logging(&cli.log_level, cli.log_dir.as_deref())?;
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Run { files } => synchronize(&config_path, files, Trigger::Manual, cli.json).await,
        Commands::CompileFinished { roots } => {
            synchronize(&config_path, roots, Trigger::CompileFinished, cli.json).await
        }
        Commands::Config { action } => match action {
            ConfigActions::Validate => validate_config(&config_path).await,
            ConfigActions::Show => show_config(&config_path).await,
            ConfigActions::Generate { output } => generate_config(output.as_deref()).await,
        },
        Commands::Import {
            module,
            output_dir,
            properties,
        } => import_module(&config_path, module, output_dir, properties).await,
    }
}

fn parse_property(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

async fn synchronize(config_path: &Path, files: Vec<PathBuf>, trigger: Trigger, json: bool) -> Result<()> {
    info!("Loading configuration from {}", config_path.display());
    let store = load_config_store(config_path)
        .await
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    let (engine, events) = Engine::new(store, Arc::new(NoopHost));
    let handle = match engine.launch(files, trigger) {
        LaunchOutcome::Launched(handle) => handle,
        LaunchOutcome::Rejected(rejected) => bail!("{}", rejected),
    };

    let status = tokio::select! {
        status = render(events, &handle, json) => status?,
        _ = tokio::signal::ctrl_c() => {
            warn!(run_id = %handle.id(), "Interrupted, stopping after the current file");
            engine.stop(handle.id())?;
            handle.wait().await
        }
    };
    engine.shutdown().await;

    match status {
        RunStatus::Completed => Ok(()),
        other => bail!("Synchronization {}: {}", other, handle.summary()),
    }
}

/// Print events until the run finishes
async fn render(mut events: EventChannel, handle: &RunHandle, json: bool) -> Result<RunStatus> {
    while let Some(event) = events.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else if let RunEvent::Line { line, .. } = &event {
            println!("{}", line);
        }

        if let RunEvent::RunFinished { run_id, status, .. } = event {
            if run_id == handle.id() {
                return Ok(status);
            }
        }
    }
    Ok(handle.wait().await)
}

async fn validate_config(path: &Path) -> Result<()> {
    info!("Validating configuration at {}", path.display());

    match load_config_store(path).await {
        Ok(store) => {
            let snapshot = store.snapshot();
            let mappings: usize = snapshot
                .config
                .target_mappings
                .iter()
                .map(|group| group.mappings.len())
                .sum();
            println!("✓ Configuration is valid");
            println!("Groups configured: {}", snapshot.config.target_mappings.len());
            println!("Mappings configured: {}", mappings);
            Ok(())
        }
        Err(e) => {
            println!("✗ Configuration validation failed: {}", e);
            Err(e.into())
        }
    }
}

async fn show_config(path: &Path) -> Result<()> {
    let config = SyncConfig::load(path).await?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn generate_config(output_path: Option<&Path>) -> Result<()> {
    let config = SyncConfig::default();

    if let Some(path) = output_path {
        config.save(path).await?;
        println!("Configuration generated at {}", path.display());
    } else {
        println!("{}", toml::to_string_pretty(&config)?);
    }

    Ok(())
}

async fn import_module(
    config_path: &Path,
    module: String,
    output_dir: PathBuf,
    properties: Vec<(String, String)>,
) -> Result<()> {
    let config = if tokio::fs::try_exists(config_path).await? {
        SyncConfig::load(config_path).await?
    } else {
        info!("No configuration at {}, starting from defaults", config_path.display());
        SyncConfig::default()
    };
    let store = ConfigStore::new(config);

    let module = properties
        .into_iter()
        .fold(BuildModule::new(module, output_dir), |module, (key, value)| {
            module.with_property(key, value)
        });

    match import::import_module(&store, &module)? {
        ImportDecision::Configure(mapping) => {
            store.snapshot().config.save(config_path).await?;
            println!(
                "Mapped {} -> {} in group '{}'",
                mapping.source_path.display(),
                mapping.target_path.display(),
                import::IMPORTED_GROUP_NAME
            );
        }
        ImportDecision::Skip(reason) => {
            println!("Module '{}' skipped: {:?}", module.name, reason);
        }
    }
    Ok(())
}
