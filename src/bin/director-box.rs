//! director-box - director container CLI
//!
//! Brings up, inspects and tears down a single director container on a
//! local Docker or Incus runtime.
//!
//! ## Usage
//!
//! ```sh
//! director-box start [--yes] [--timeout-secs N]
//! director-box stop
//! director-box destroy [--yes]
//! director-box status
//! director-box logs [--follow] [--tail N|all] [--component C]... [--message-only]
//! director-box exec -- bosh-director-ctl status
//! director-box cloud-config
//! director-box resolve IMAGE
//! director-box diff CURRENT NEW
//! director-box extract IMAGE PATH [--output FILE]
//! ```
//!
//! `RUST_LOG` controls diagnostics on stderr; `-v` raises the default to
//! `debug`.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use director_box::cpi::{Cpi, LogSink, LogTail};
use director_box::lifecycle::{LogsRequest, Reconciler, StartOutcome};
use director_box::{
    Config, ConsoleUi, DockerCpi, ImageReference, ImageResolver, IncusCpi, OciRegistry,
    RuntimeKind,
};
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug};
use tracing_subscriber::EnvFilter;

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Parser)]
#[command(name = "director-box")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a director in a single local container", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(short, long, global = true, env = "DIRECTOR_BOX_CONFIG")]
    config: Option<PathBuf>,

    /// Container runtime (docker or incus)
    #[arg(long, global = true)]
    runtime: Option<RuntimeKind>,

    /// Director image reference
    #[arg(long, global = true)]
    image: Option<String>,

    /// Container name
    #[arg(long, global = true)]
    name: Option<String>,

    /// Enable debug diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the container and wait for the director
    Start {
        /// Answer yes to confirmation prompts
        #[arg(short, long)]
        yes: bool,

        /// Readiness wait budget in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Stop the container, keeping its volumes
    Stop,

    /// Remove the container, its volumes and its network
    Destroy {
        /// Answer yes to confirmation prompts
        #[arg(short, long)]
        yes: bool,
    },

    /// Show container state and connection details
    Status,

    /// Print container logs
    Logs {
        /// Keep streaming until interrupted
        #[arg(short, long)]
        follow: bool,

        /// Number of trailing lines, or "all"
        #[arg(long, default_value = "all")]
        tail: LogTail,

        /// Only show these components (repeatable)
        #[arg(long = "component")]
        components: Vec<String>,

        /// Print message bodies only
        #[arg(long)]
        message_only: bool,

        /// Disable colors
        #[arg(long)]
        no_color: bool,
    },

    /// Run a command inside the container
    Exec {
        #[arg(trailing_var_arg = true, required = true)]
        cmd: Vec<String>,
    },

    /// Print the cloud-config for this backend's network
    CloudConfig,

    /// Resolve an image reference to its digest and version tag
    Resolve { image: String },

    /// Diff the director manifests of two images
    Diff { current: String, new: String },

    /// Extract one file from an image's layers
    Extract {
        image: String,
        path: String,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// =============================================================================
// Setup
// =============================================================================

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load_or_default(cli.config.as_deref())
        .with_context(|| format!("loading config {:?}", cli.config))?;
    if let Some(runtime) = cli.runtime {
        config.runtime = runtime;
    }
    if let Some(image) = &cli.image {
        config.image = image.clone();
    }
    if let Some(name) = &cli.name {
        config.container_name = name.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn resolver(config: &Config) -> ImageResolver {
    ImageResolver::new(Arc::new(OciRegistry::new()))
        .with_manifest_path(config.director_manifest_path.clone())
}

fn build_cpi(config: &Config) -> Result<Arc<dyn Cpi>> {
    let backend = config.backend_config()?;
    let cpi: Arc<dyn Cpi> = match config.runtime {
        RuntimeKind::Docker => Arc::new(
            DockerCpi::connect(backend, resolver(config)).context("connecting to Docker")?,
        ),
        RuntimeKind::Incus => {
            Arc::new(IncusCpi::connect(backend).context("connecting to Incus")?)
        }
    };
    debug!(backend = cpi.backend_name(), "runtime selected");
    Ok(cpi)
}

/// Cancels the returned token on Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

// =============================================================================
// Commands
// =============================================================================

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli)?;
    let colorize = std::io::stdout().is_terminal();

    match cli.command {
        Commands::Start { yes, timeout_secs } => {
            let mut options = config.reconciler_options(colorize);
            if let Some(secs) = timeout_secs {
                options.ready_timeout = std::time::Duration::from_secs(secs);
            }
            let ui = ConsoleUi::new().with_assume_yes(yes).with_colorize(colorize);
            let mut reconciler =
                Reconciler::new(build_cpi(&config)?, Arc::new(ui)).with_options(options);

            let cancel = interrupt_token();
            match reconciler.start(&cancel).await? {
                StartOutcome::Ready { warnings } if !warnings.is_empty() => {
                    Ok(ExitCode::from(2))
                }
                _ => Ok(ExitCode::SUCCESS),
            }
        }

        Commands::Stop => {
            reconciler(&config, false, colorize)?.stop().await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Destroy { yes } => {
            reconciler(&config, yes, colorize)?.destroy().await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Status => {
            reconciler(&config, false, colorize)?.status().await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Logs {
            follow,
            tail,
            components,
            message_only,
            no_color,
        } => {
            let request = LogsRequest {
                tail,
                follow,
                components,
                message_only,
                colorize: colorize && !no_color,
            };
            let stdout: LogSink = Box::new(std::io::stdout());
            let stderr: LogSink = Box::new(std::io::stderr());
            reconciler(&config, false, colorize)?
                .logs(interrupt_token(), request, stdout, stderr)
                .await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Exec { cmd } => {
            let output = reconciler(&config, false, colorize)?.exec(&cmd).await?;
            print!("{}", output);
            Ok(ExitCode::SUCCESS)
        }

        Commands::CloudConfig => {
            let bytes = build_cpi(&config)?.cloud_config_bytes()?;
            std::io::stdout().write_all(&bytes)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Resolve { image } => {
            let reference = parse_image(&image)?;
            let metadata = resolver(&config).resolve_metadata(&reference).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Diff { current, new } => {
            let diff = resolver(&config)
                .get_manifest_diff(&parse_image(&current)?, &parse_image(&new)?)
                .await?;
            if diff.is_empty() {
                println!("No manifest changes.");
            } else {
                print!("{}", diff);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Extract {
            image,
            path,
            output,
        } => {
            let content = resolver(&config)
                .extract_file_from_image(&parse_image(&image)?, &path)
                .await?;
            match output {
                Some(file) => std::fs::write(&file, &content)
                    .with_context(|| format!("writing {}", file.display()))?,
                None => std::io::stdout().write_all(&content)?,
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn reconciler(config: &Config, yes: bool, colorize: bool) -> Result<Reconciler> {
    let ui = ConsoleUi::new().with_assume_yes(yes).with_colorize(colorize);
    Ok(Reconciler::new(build_cpi(config)?, Arc::new(ui))
        .with_options(config.reconciler_options(colorize)))
}

fn parse_image(input: &str) -> Result<ImageReference> {
    if input.trim().is_empty() {
        bail!("image reference must not be empty");
    }
    Ok(ImageReference::parse(input)?)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
