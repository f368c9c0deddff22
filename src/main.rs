//! kgsync CLI - import knowledge graphs into KV, vector and graph stores

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use kgsync::config::{self, KgsyncConfig};
use kgsync::ui::{self, ColorChoice, UiSettings};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "kgsync")]
#[command(version)]
#[command(about = "Knowledge-graph import pipeline - entities, relations and embeddings across KV, vector and graph stores")]
#[command(long_about = r#"
kgsync loads a knowledge-graph description (entities, relations, documents)
and writes it consistently into three storage roles:
  • KV store: full records and document status
  • Vector store: one embedding per record
  • Graph store: entity nodes and relation edges

Example usage:
  kgsync init
  kgsync import --source graph.json
  kgsync import --source graph.json --no-reset --format json
  kgsync status --document doc-1
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true, env = "KGSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace to operate on (overrides config)
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Path to the database file (overrides config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// When to color output
    #[arg(long, global = true, value_enum, default_value = "auto")]
    color: ColorChoice,

    /// Suppress banners, tables and progress bars
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Human or machine-readable output
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    #[default]
    Text,
    Json,
}

impl OutputMode {
    pub fn is_human(&self) -> bool {
        *self == OutputMode::Text
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default kgsync.toml and prepare the database directory
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Import a graph description
    Import {
        /// Graph description file (JSON)
        #[arg(short, long)]
        source: PathBuf,

        /// Clear the KV and vector namespaces first
        #[arg(long, overrides_with = "no_reset")]
        reset: bool,

        /// Keep existing KV and vector records
        #[arg(long)]
        no_reset: bool,

        /// Also clear the graph namespace
        #[arg(long)]
        full_reset: bool,

        /// Graph merge policy (additive, replace)
        #[arg(long)]
        merge: Option<String>,

        /// Concurrent batches and writes
        #[arg(short, long)]
        workers: Option<usize>,

        /// Skip post-write verification
        #[arg(long)]
        no_verify: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputMode,
    },

    /// Remove every record of the namespace from all three stores
    Clean {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputMode,
    },

    /// Show record counts per store
    Stats {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputMode,
    },

    /// Show the processing status of a document
    Status {
        /// Document id
        #[arg(long)]
        document: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputMode,
    },
}

pub fn emit_success(output_mode: OutputMode, command: &str, data: serde_json::Value) -> anyhow::Result<()> {
    debug_assert!(!output_mode.is_human());
    let envelope = serde_json::json!({
        "ok": true,
        "command": command,
        "data": data,
    });
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

/// Config file, then environment, then CLI flags
fn resolve_config(cli: &Cli) -> anyhow::Result<KgsyncConfig> {
    let mut config = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    config.apply_env()?;
    if let Some(namespace) = &cli.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(database) = &cli.database {
        config.database = database.display().to_string();
    }
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Init { force } => {
            let path = cli.config.clone().unwrap_or_else(config::default_config_path);
            commands::run_init(&config, &path, force)?;
            Ok(0)
        }
        Commands::Import {
            source,
            reset,
            no_reset,
            full_reset,
            merge,
            workers,
            no_verify,
            format,
        } => {
            let flags = commands::ImportFlags {
                reset: if no_reset { Some(false) } else if reset { Some(true) } else { None },
                full_reset,
                merge,
                workers,
                no_verify,
            };
            commands::run_import(&config, &source, flags, format).await
        }
        Commands::Clean { format } => {
            commands::run_clean(&config, format).await?;
            Ok(0)
        }
        Commands::Stats { format } => {
            commands::run_stats(&config, format).await?;
            Ok(0)
        }
        Commands::Status { document, format } => {
            commands::run_status(&config, &document, format).await?;
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let quiet = cli.quiet || ui::theme::quiet_from_env(std::env::var("KGSYNC_QUIET").ok().as_deref());
    ui::configure(UiSettings::new(cli.color, quiet));

    // Initialize logging; stdout stays free for reports
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            ui::error(&format!("{:#}", e));
            1
        }
    };
    std::process::exit(code);
}
