use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::OutputFormat;

#[derive(Parser)]
#[command(name = "sleepsync")]
#[command(author, version, about = "CLI for the SleepSync sleep tracker bridge", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports and flag likely ESP32 boards
    Ports {
        /// Output format (text, json)
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Connect to the device and print its messages
    Watch {
        /// Serial port path (auto-detect when omitted)
        #[arg(short, long)]
        port: Option<String>,

        /// Serial baud rate
        #[arg(short, long, default_value_t = sleepsync_link::DEFAULT_BAUD)]
        baud: u32,

        /// Also print non-JSON log lines from the firmware
        #[arg(long)]
        raw: bool,

        /// Print every message as raw JSON instead of summaries
        #[arg(long)]
        json: bool,
    },

    /// Send a command to the device over serial
    Send {
        /// Command name, e.g. set_rgb
        command: String,

        /// JSON payload for the command
        #[arg(short, long)]
        data: Option<String>,

        /// Serial port path (auto-detect when omitted)
        #[arg(short, long)]
        port: Option<String>,

        /// Serial baud rate
        #[arg(short, long, default_value_t = sleepsync_link::DEFAULT_BAUD)]
        baud: u32,

        /// Wait for the device's command_response before exiting
        #[arg(short, long)]
        wait: bool,

        /// Seconds to wait for connection and response
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Show a running bridge's status
    Status {
        /// Bridge HTTP API base URL
        #[arg(short, long, default_value = "http://127.0.0.1:3001")]
        server: String,

        /// Output format (text, json)
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Check a running bridge's health endpoint
    Health {
        /// Bridge HTTP API base URL
        #[arg(short, long, default_value = "http://127.0.0.1:3001")]
        server: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "sleepsync", &mut io::stdout());
        return Ok(());
    }

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Ports { format } => commands::ports::cmd_ports(format),
        Commands::Watch { port, baud, raw, json } => {
            commands::watch::cmd_watch(port, baud, raw, json).await
        }
        Commands::Send {
            command,
            data,
            port,
            baud,
            wait,
            timeout,
        } => commands::send::cmd_send(command, data, port, baud, wait, timeout).await,
        Commands::Status { server, format } => commands::status::cmd_status(&server, format).await,
        Commands::Health { server } => commands::status::cmd_health(&server).await,
        Commands::Completions { .. } => {
            // Already handled above
            unreachable!()
        }
    }
}
