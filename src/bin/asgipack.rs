use anyhow::Result;
use asgipack_invoker::{Invoker, ServiceLauncher};
use asgipack_models::{Config, LaunchSpec, PackError};
use asgipack_packaging::PackagingService;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "asgipack", version, about = "Build and launch container images for ASGI services")]
struct Cli {
    /// Configuration file. Defaults to the first of configs/default.toml,
    /// asgipack.toml that exists; built-in defaults otherwise.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the build context and print the rendered Dockerfile.
    Plan {
        #[arg(default_value = ".")]
        context: PathBuf,
    },
    /// Run the build pipeline and print the resulting image reference.
    Build {
        #[arg(default_value = ".")]
        context: PathBuf,
    },
    /// Print the startup command a build of this context would declare.
    Command {
        #[arg(default_value = ".")]
        context: PathBuf,
    },
    /// Build (or reuse) the image, then run it in the foreground until the
    /// service exits or Ctrl-C.
    Run {
        #[arg(default_value = ".")]
        context: PathBuf,
        /// Host port override for the published service port.
        #[arg(long)]
        port: Option<u16>,
    },
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    } else {
        candidates.push(PathBuf::from("configs/default.toml"));
        candidates.push(PathBuf::from("asgipack.toml"));
    }

    for path in &candidates {
        if path.exists() {
            let contents = fs::read_to_string(path)?;
            let config: Config = toml::from_str(&contents)?;
            info!("Configuration loaded from {}", path.display());
            return Ok(config);
        }
    }

    if explicit.is_some() {
        anyhow::bail!("config file not found: {}", candidates[0].display());
    }
    Err(anyhow::anyhow!("no config file found"))
}

async fn run(cli: Cli) -> Result<()> {
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) if cli.config.is_none() => {
            warn!("Failed to load config file: {}, using defaults", e);
            Config::default()
        }
        Err(e) => return Err(e),
    };

    match cli.command {
        Commands::Plan { context } => {
            let service = PackagingService::new(config)?;
            let (_context, plan) = service.plan(&context)?;
            print!("{}", plan.dockerfile());
        }
        Commands::Command { context } => {
            let service = PackagingService::new(config.clone())?;
            // Validation first: a context that cannot build declares no command.
            let (validated, _plan) = service.plan(&context)?;
            let launch = LaunchSpec::for_target(
                &validated.target,
                &config.service.bind,
                config.service.port,
            );
            println!("{}", launch.command_line());
        }
        Commands::Build { context } => {
            let mut service = PackagingService::new(config)?;
            let artifact = service.build(&context).await?;
            info!(
                "Build complete: {} (manifest {}, source {})",
                artifact.image_ref,
                &artifact.manifest_digest[..12],
                &artifact.source_digest[..12]
            );
            println!("{}", artifact.image_ref);
        }
        Commands::Run { context, port } => {
            let mut config = config;
            if let Some(port) = port {
                config.launch.host_port = Some(port);
            }

            let mut service = PackagingService::new(config.clone())?;
            let artifact = service.build(&context).await?;

            let invoker = Arc::new(Invoker::new(config.clone())?);
            let launcher = ServiceLauncher::new(invoker, config);

            let running = launcher.launch(&artifact.image_ref, &artifact.launch).await?;
            let logs = launcher.stream_logs(&running);

            let exit_code = tokio::select! {
                code = launcher.wait(&running) => {
                    let code = code?;
                    info!("Service exited with code {}", code);
                    code
                }
                _ = signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    0
                }
            };

            launcher.cleanup(&running).await?;
            logs.abort();

            if exit_code != 0 {
                std::process::exit(exit_code as i32);
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err:#}");
        let code = err
            .downcast_ref::<PackError>()
            .map(PackError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
