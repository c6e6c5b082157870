use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use led_simulator::client;
use led_simulator::protocol::PORT_NUMBER;
use led_simulator::report::{LogRenderer, LogStatus};
use led_simulator::{Command, CommandExecutor, Config, LedGrid, Rgb, Server};

/// Stats interval used by `--debug` when the config sets none
const DEBUG_STATS_INTERVAL_SECS: u64 = 5;

#[derive(Parser)]
#[command(name = "led_simulator")]
#[command(about = "LED strip simulator\n\nAccepts 7-byte control frames over TCP and applies them to an in-memory LED grid.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulator
    Serve {
        /// Path to configuration file (JSON)
        config: Option<PathBuf>,

        /// Override the listening port
        #[arg(long)]
        port: Option<u16>,

        /// Enable debug output (statistics)
        #[arg(long)]
        debug: bool,

        /// Enable detailed debug (every frame and grid update)
        #[arg(long)]
        ddebug: bool,
    },
    /// Send command frames to a running simulator
    Send {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = PORT_NUMBER)]
        port: u16,

        #[command(subcommand)]
        command: SendCommand,
    },
}

#[derive(Subcommand)]
enum SendCommand {
    /// Set one stripe to a color (RRGGBB)
    Stripe { index: u8, color: Rgb },
    /// Set one row to a color (RRGGBB)
    Row { index: u8, color: Rgb },
    /// Start the demo pattern
    Demo,
    /// Fade every LED to white
    FadeWhite,
    /// Fade every LED to black
    FadeBlack,
}

impl From<SendCommand> for Command {
    fn from(command: SendCommand) -> Self {
        match command {
            SendCommand::Stripe { index, color } => Command::SetStripe { index, color },
            SendCommand::Row { index, color } => Command::SetRow { index, color },
            SendCommand::Demo => Command::Demo,
            SendCommand::FadeWhite => Command::FadeAllToWhite,
            SendCommand::FadeBlack => Command::FadeAllToBlack,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            debug,
            ddebug,
        } => {
            // ddebug implies debug
            let debug = debug || ddebug;
            init_logging(if ddebug {
                "trace"
            } else if debug {
                "debug"
            } else {
                "info"
            });
            serve(config, port, debug).await
        }
        Commands::Send {
            host,
            port,
            command,
        } => {
            init_logging("info");
            let command = Command::from(command);
            client::send((host.as_str(), port), &[command]).await?;
            info!("Sent {:?} to {}:{}", command, host, port);
            Ok(())
        }
    }
}

/// `RUST_LOG` wins over the level picked from the command line
fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_ansi(true)
        .init();
}

async fn serve(config_path: Option<PathBuf>, port: Option<u16>, debug: bool) -> Result<()> {
    let mut config = match config_path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if debug && config.server.stats_interval_secs.is_none() {
        config.server.stats_interval_secs = Some(DEBUG_STATS_INTERVAL_SECS);
    }
    let port = port.unwrap_or(config.server.port);

    let layout = config.grid.layout()?;
    info!(
        "Grid: {} LEDs in {} stripes x {} rows",
        layout.led_count(),
        layout.stripes(),
        layout.rows()
    );
    let grid = Arc::new(LedGrid::new(layout, config.grid.background, Arc::new(LogRenderer)));
    let executor = Arc::new(CommandExecutor::new(grid, config.effects.clone()));
    let server = Server::new(config.server.clone(), executor, Arc::new(LogStatus));

    // Set up Ctrl-C handler with graceful shutdown
    let shutdown = CancellationToken::new();
    let handler_token = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!("Could not set Ctrl-C handler: {}", e);
    }

    server.start(port).await?;
    info!("(Press Ctrl-C to stop)");

    shutdown.cancelled().await;
    info!("Shutting down...");
    server.stop().await;

    Ok(())
}
