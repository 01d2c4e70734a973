mod config;
mod mount;
mod server;

use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigOverrides};
use server::{build_context, run_server};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "poolgate")]
#[command(about = "WebDAV-style gateway for object store pools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Serve(GatewayArgs),
    /// Load configuration and open every mount, then exit
    Check(GatewayArgs),
}

#[derive(Args, Clone)]
struct GatewayArgs {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Mount definition, e.g. mountpoint=/foo,pool=bucket,timeout=30,allow_put=1
    #[arg(long = "mount")]
    mounts: Vec<String>,

    /// Default store call timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Listen address
    #[arg(long)]
    bind: Option<String>,
}

fn load_config(args: GatewayArgs) -> poolgate_core::Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;
    config.apply_overrides(ConfigOverrides {
        mounts: args.mounts,
        timeout_secs: args.timeout,
        bind_addr: args.bind,
    })?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "poolgate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let config = match load_config(args) {
                Ok(config) => config,
                Err(error) => {
                    tracing::error!("Failed to load config: {}", error);
                    std::process::exit(1);
                }
            };

            tracing::info!("Starting Poolgate on {}", config.bind_addr);
            if let Err(error) = run_server(config).await {
                tracing::error!("Server error: {}", error);
                std::process::exit(1);
            }
        }
        Commands::Check(args) => {
            let config = match load_config(args) {
                Ok(config) => config,
                Err(error) => {
                    tracing::error!("Failed to load config: {}", error);
                    std::process::exit(1);
                }
            };

            match build_context(&config) {
                Ok(context) => {
                    tracing::info!("configuration ok: {} mount(s)", context.mounts().len());
                }
                Err(error) => {
                    tracing::error!("Mount check failed: {}", error);
                    std::process::exit(1);
                }
            }
        }
    }
}
