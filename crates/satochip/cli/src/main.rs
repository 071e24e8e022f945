//! Command-line interface for Satochip cards

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use satochip_apdu_transport_pcsc::{PcscConfig, PcscDeviceManager};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod utils;

use commands::*;
use utils::reader;

#[derive(Parser)]
#[command(version, about = "Provision and use Satochip hardware wallets")]
struct Cli {
    /// Reader name to use (auto-detected if not specified)
    #[arg(short, long)]
    reader: Option<String>,

    /// Configuration file (default ~/.satochip/satochip.toml)
    #[arg(short, long, env = "SATOCHIP_CONFIG")]
    config: Option<PathBuf>,

    /// Debug output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available readers
    List,

    /// Show the card status
    Status,

    /// Set up a new card: PIN, optional 2FA and seed
    #[command(alias = "provision")]
    Setup,

    /// Print the card's authentikey
    Authentikey {
        /// PIN (prompted for when missing)
        #[arg(long, env = "SATOCHIP_PIN", hide_env_values = true)]
        pin: Option<String>,
    },

    /// Export an extended public key
    Xpub {
        /// Derivation path (default: the configured account path)
        #[arg(long)]
        path: Option<String>,

        /// Script type: standard, p2wpkh-p2sh, p2wsh-p2sh, p2wpkh or p2wsh
        #[arg(long = "type")]
        xtype: Option<String>,

        /// PIN (prompted for when missing)
        #[arg(long, env = "SATOCHIP_PIN", hide_env_values = true)]
        pin: Option<String>,
    },

    /// Sign a message with an address key
    SignMessage {
        /// Message text
        #[arg(required = true)]
        message: String,

        /// 1 for change addresses
        #[arg(long, default_value_t = 0)]
        change: u32,

        /// Address index
        #[arg(long, default_value_t = 0)]
        index: u32,

        /// PIN (prompted for when missing)
        #[arg(long, env = "SATOCHIP_PIN", hide_env_values = true)]
        pin: Option<String>,
    },
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = config::load_config(cli.config.as_deref())?;
    let manager = PcscDeviceManager::new()?;

    if let Commands::List = cli.command {
        return reader::list_readers(&manager);
    }

    let reader = match cli.reader.as_ref().or(config.reader.as_ref()) {
        Some(name) => reader::find_reader_by_name(&manager, name)?,
        None => reader::find_reader_with_card(&manager)?,
    };
    info!("Using reader: {}", reader.name());
    let transport = manager.open_reader_with_config(reader.name(), PcscConfig::default())?;

    match &cli.command {
        Commands::List => Ok(()),
        Commands::Status => status_command(transport),
        Commands::Setup => setup_command(transport),
        Commands::Authentikey { pin } => authentikey_command(transport, pin.as_deref()),
        Commands::Xpub { path, xtype, pin } => xpub_command(
            transport,
            &config,
            pin.as_deref(),
            path.as_deref(),
            xtype.as_deref(),
        ),
        Commands::SignMessage {
            message,
            change,
            index,
            pin,
        } => sign_message_command(
            transport,
            &config,
            pin.as_deref(),
            message,
            (*change, *index),
        ),
    }
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .init();
}
