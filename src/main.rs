//! openttd-admin - Command line client for the OpenTTD admin port
//!
//! Scrape a server's state, run rcon commands or watch the event stream.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use openttd_admin::config::{self, Config};
use openttd_admin::protocol::{UpdateFrequency, UpdateType};
use openttd_admin::{Event, Session, SessionError};

/// openttd-admin - OpenTTD admin port client
#[derive(Parser)]
#[command(name = "openttd-admin")]
#[command(author = "openttd-admin Contributors")]
#[command(version)]
#[command(about = "Talk to an OpenTTD server over its admin port", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Server host (overrides the configuration file)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Admin port (overrides the configuration file)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Admin password (overrides the configuration file)
    #[arg(long, global = true, env = "OPENTTD_ADMIN_PASSWORD")]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect the server's state once and print it as JSON
    Query {
        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Run a remote console command and print its output
    Rcon {
        /// The console command, e.g. "companies"
        command: String,
    },

    /// Stay connected and log every event
    Watch {
        /// Also subscribe to chat and console output
        #[arg(long)]
        chat: bool,
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
    let mut config = if let Some(config_path) = &cli.config {
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
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(password) = cli.password {
        config.server.password = password;
    }
    config.validate()?;

    match cli.command {
        Commands::Query { pretty } => {
            run_query(&config, pretty || config.general.pretty).await?;
        }
        Commands::Rcon { command } => {
            run_rcon(&config, &command).await?;
        }
        Commands::Watch { chat } => {
            run_watch(&config, chat).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Scrape the server once
async fn run_query(config: &Config, pretty: bool) -> anyhow::Result<()> {
    let state = openttd_admin::scrape(config.session_config()).await?;

    let json = if pretty {
        serde_json::to_string_pretty(&state)?
    } else {
        serde_json::to_string(&state)?
    };
    println!("{}", json);

    Ok(())
}

/// Run one rcon command
async fn run_rcon(config: &Config, command: &str) -> anyhow::Result<()> {
    let session = Session::new(config.session_config().without_reconnect().without_state());
    session.open().await?;

    let result = session.submit_sync(command).await;
    session.close().await?;

    for line in result? {
        println!("{}", line.output);
    }

    Ok(())
}

/// Log events until Ctrl+C
async fn run_watch(config: &Config, chat: bool) -> anyhow::Result<()> {
    let session = Session::new(config.session_config());

    session.register_all(|event: &Event| match event {
        Event::Connect => tracing::info!("Connected"),
        Event::Disconnect => tracing::info!("Disconnected"),
        Event::Packet(packet) => tracing::info!("{:?}", packet),
    });

    session.open().await?;

    if chat {
        for update_type in [UpdateType::Chat, UpdateType::Console] {
            match session.request_updates(update_type, UpdateFrequency::Automatic).await {
                Ok(()) => {}
                Err(SessionError::InvalidUpdateFrequency) => {
                    tracing::warn!("Server does not offer automatic {:?} updates", update_type);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    println!("Watching {}:{}. Press Ctrl+C to stop.", config.server.host, config.server.port);
    tokio::signal::ctrl_c().await?;

    println!("\nDisconnecting...");
    session.close().await?;

    if let Ok(state) = session.state() {
        let counts = state.counts();
        tracing::info!(
            "Last seen: {} clients ({} spectating), {} companies",
            counts.clients,
            counts.spectators,
            counts.companies
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["openttd-admin", "query", "--pretty"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_rcon_requires_command() {
        assert!(Cli::try_parse_from(["openttd-admin", "rcon"]).is_err());

        let cli = Cli::try_parse_from(["openttd-admin", "--host", "10.0.0.1", "rcon", "companies"]).unwrap();
        assert_eq!(cli.host.as_deref(), Some("10.0.0.1"));
        assert!(matches!(cli.command, Commands::Rcon { command } if command == "companies"));
    }
}
