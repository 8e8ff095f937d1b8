//! FrameLink - Type-length-value messaging over TCP
//!
//! A registration client and server exchanging framed messages.

mod config;
mod network;
mod protocol;
mod registry;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use network::{Client, RegistrationOutcome, Server};

/// FrameLink - framed request/response messaging over TCP
#[derive(Parser)]
#[command(name = "framelink")]
#[command(author = "FrameLink Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Register names with a server over a type-length-value protocol", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the registration server (start this first)
    Server {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind to
        #[arg(short, long)]
        bind: Option<String>,

        /// Exit after serving a single client
        #[arg(long)]
        once: bool,
    },

    /// Register a name with a running server
    Client {
        /// Name to register
        #[arg(short, long)]
        name: String,

        /// Server host
        #[arg(long)]
        host: Option<String>,

        /// Server port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Server { port, bind, once } => {
            run_server(config, port, bind, once).await?;
        }
        Commands::Client { name, host, port } => {
            run_client(config, name, host, port).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                if let Some(path) = output {
                    config::sample_config().save(&path)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", config::generate_sample_config()?);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Run the registration server
async fn run_server(
    config: Config,
    port: Option<u16>,
    bind: Option<String>,
    once: bool,
) -> anyhow::Result<()> {
    let mut net_config = config.network_config(port);
    if let Some(bind) = bind {
        net_config = net_config.with_bind_address(bind);
    }

    let mut server = Server::bind(net_config).await?;
    let local_addr = server.local_addr()?;

    println!("now listening on {}", local_addr);

    if once {
        let summary = server.serve_one().await?;
        println!(
            "served one client: {} registered, {} rejected ({})",
            summary.registered.len(),
            summary.rejected,
            summary.close_reason
        );
    } else {
        println!("Press Ctrl+C to stop.");
        server
            .run(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
    }

    if server.registry().is_empty() {
        tracing::info!("Server stopped with no registered names");
    } else {
        tracing::info!(
            "Server stopped with {} registered name(s)",
            server.registry().len()
        );
    }

    Ok(())
}

/// Run the client for a single registration
async fn run_client(
    config: Config,
    name: String,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let net_config = config.network_config(port);
    let host = host.unwrap_or_else(|| config.network.host.clone());
    let port = net_config.port;

    let mut client = Client::new(net_config);

    println!("connecting to {}:{}", host, port);
    client.connect_hostname(&host, port).await?;
    if let Some(addr) = client.server_addr() {
        println!("connected to {}; sending registration", addr);
    }

    let outcome = client.register(&name).await;
    if client.is_connected() {
        client.close().await?;
    }
    let outcome = outcome?;

    match outcome {
        RegistrationOutcome::Accepted => {
            println!("registered '{}'", name);
            Ok(())
        }
        RegistrationOutcome::Rejected(reason) => {
            anyhow::bail!("registration rejected: {}", reason)
        }
    }
}
