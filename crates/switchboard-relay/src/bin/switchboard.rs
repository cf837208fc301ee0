//! Switchboard signaling relay
//!
//! WebSocket signaling relay for peer discovery and negotiation.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (0.0.0.0:8080, WebSocket on /ws)
//! switchboard
//!
//! # Serve a frontend and use a config file
//! switchboard --config ./switchboard.toml --static-dir ./frontend
//! ```

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use switchboard_core::Config;
use switchboard_relay::RelayServer;

#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(about = "Switchboard signaling relay for peer discovery")]
#[command(version)]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, env = "SWITCHBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "SWITCHBOARD_PORT")]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long, env = "SWITCHBOARD_BIND")]
    bind: Option<IpAddr>,

    /// Directory with static frontend files
    #[arg(long, env = "SWITCHBOARD_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Outbound mailbox capacity per session
    #[arg(long)]
    mailbox_capacity: Option<usize>,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn into_config(self) -> Result<Config, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load(),
        };

        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
        if let Some(dir) = self.static_dir {
            config.server.static_dir = Some(dir);
        }
        if let Some(capacity) = self.mailbox_capacity {
            config.hub.mailbox_capacity = capacity;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.json);

    let print_config = args.print_config;
    let config = args.into_config()?;

    if print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    info!("Starting Switchboard relay");
    info!(
        "Mailbox capacity {}, max message size {} bytes",
        config.hub.mailbox_capacity, config.transport.max_message_size
    );
    if let Some(dir) = &config.server.static_dir {
        info!("Serving static files from {:?}", dir);
    }

    let server = RelayServer::new(config);

    tokio::select! {
        result = server.serve() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
