use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};

use wifi_manager::{
    config::{self, Config},
    scan, server, WifiManager,
};

#[derive(Parser)]
#[command(name = "wifi-manager")]
#[command(about = "Scan, remember and join wireless networks on ifupdown hosts")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Optional body of save and connect.
#[derive(clap::Args)]
struct NetworkArgs {
    /// Interface to use
    iface: String,

    /// SSID of the network
    ssid: String,

    /// Passphrase or key, required for encrypted networks
    #[arg(short, long)]
    passkey: Option<String>,

    /// Latitude where the network is seen
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Longitude where the network is seen
    #[arg(long, allow_hyphen_values = true)]
    lng: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Network(NetworkCommands),

    /// Start the REST API server
    Serve {
        /// Port to listen on (overrides the config)
        #[arg(short, long)]
        port: Option<u16>,

        /// API key clients must send (overrides the config)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Show the effective configuration
    ShowConfig,
}

/// Subcommands that operate on the stores and interfaces.
#[derive(Subcommand)]
enum NetworkCommands {
    /// List network interfaces
    ListInterfaces {
        /// Include IPv4 addresses
        #[arg(short, long)]
        addresses: bool,
    },

    /// Scan for networks in range, strongest first
    Scan { iface: String },

    /// Show the SSID an interface is associated with
    Status { iface: String },

    /// Show the strongest network in range that has a saved profile
    Available { iface: String },

    /// Save a profile for a network in range
    Save(NetworkArgs),

    /// Save a network and join it
    Connect(NetworkArgs),

    /// Delete a saved network
    Delete {
        iface: String,
        ssid: String,

        /// Keep the profile, delete only the location record
        #[arg(long)]
        db_only: bool,
    },

    /// Delete every saved network
    DeleteAll {
        /// Keep the profiles, delete only the location records
        #[arg(long)]
        db_only: bool,
    },

    /// Show where a network was last seen
    Location { ssid: String },

    /// Bring an interface up
    Enable { iface: String },

    /// Take an interface down
    Disable { iface: String },

    /// List saved networks
    Networks {
        /// Show location records instead of profiles
        #[arg(short, long)]
        gps: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::ShowConfig => cmd_show_config(cli.config.as_deref(), &cfg),
        Commands::Serve { port, api_key } => cmd_serve(cfg, port, api_key).await,
        Commands::Network(command) => {
            let manager = WifiManager::from_config(&cfg).context("Failed to open stores")?;
            run(&manager, command)
        }
    }
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wifi_manager={}", log_level)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(manager: &WifiManager, command: NetworkCommands) -> Result<()> {
    match command {
        NetworkCommands::ListInterfaces { addresses } => {
            for iface in manager.list_interfaces(addresses)? {
                match iface.address {
                    Some(address) => println!("{:<16} {}", iface.name, address),
                    None => println!("{}", iface.name),
                }
            }
        }
        NetworkCommands::Scan { iface } => {
            let cells = manager.scan(&iface)?;
            scan::display_cells(&cells);
        }
        NetworkCommands::Status { iface } => {
            let ssid = manager.status(&iface);
            if ssid.is_empty() {
                println!("{}: not associated", iface);
            } else {
                println!("{}: {}", iface, ssid);
            }
        }
        NetworkCommands::Available { iface } => {
            let ssid = manager.best_known_network(&iface)?;
            if ssid.is_empty() {
                println!("No saved network in range.");
            } else {
                println!("{}", ssid);
            }
        }
        NetworkCommands::Save(args) => {
            let saved = manager.save(
                &args.iface,
                &args.ssid,
                args.passkey.as_deref(),
                args.lat,
                args.lng,
            )?;
            if saved.created {
                println!("created {}:{}", args.iface, saved.profile.name);
            } else {
                println!("{}:{} already saved", args.iface, saved.profile.name);
            }
        }
        NetworkCommands::Connect(args) => {
            println!("Connecting to '{}' on {}...", args.ssid, args.iface);
            let connection = manager.connect(
                &args.iface,
                &args.ssid,
                args.passkey.as_deref(),
                args.lat,
                args.lng,
            )?;
            println!(
                "connected {}:{} after {} attempt(s) in {:.1}s",
                args.iface,
                connection.profile.name,
                connection.attempts,
                connection.elapsed.as_secs_f64()
            );
            if let Some(address) = connection.address {
                println!("address {}", address);
            }
        }
        NetworkCommands::Delete {
            iface,
            ssid,
            db_only,
        } => {
            manager.delete(&iface, &ssid, db_only)?;
            println!("deleted {}:{}", iface, ssid);
        }
        NetworkCommands::DeleteAll { db_only } => {
            let summary = manager.delete_all(db_only)?;
            println!("deleted {}/{} schemes", summary.total, summary.deleted);
            if !summary.is_complete() {
                anyhow::bail!("not deleted: {}", summary.failed.join(", "));
            }
        }
        NetworkCommands::Location { ssid } => {
            let (lat, lng) = manager.last_location(&ssid)?;
            println!("{:?},{:?}", lat, lng);
        }
        NetworkCommands::Enable { iface } => {
            manager.enable(&iface)?;
            println!("enabled {}", iface);
        }
        NetworkCommands::Disable { iface } => {
            manager.disable(&iface)?;
            println!("disabled {}", iface);
        }
        NetworkCommands::Networks { gps } => {
            if gps {
                let records = manager.network_records()?;
                if records.is_empty() {
                    println!("No saved networks.");
                    return Ok(());
                }
                println!("{:<12} {:<32} {:>12} {:>12}", "INTERFACE", "SSID", "LAT", "LNG");
                println!("{}", "-".repeat(70));
                for record in records {
                    println!(
                        "{:<12} {:<32} {:>12?} {:>12?}",
                        record.interface, record.ssid, record.lat, record.lng
                    );
                }
            } else {
                let profiles = manager.networks()?;
                if profiles.is_empty() {
                    println!("No saved networks.");
                    return Ok(());
                }
                println!("{:<12} {:<32} {}", "INTERFACE", "SSID", "AUTH");
                println!("{}", "-".repeat(60));
                for profile in profiles {
                    let auth = if profile.options.contains_key("wpa-psk") {
                        "wpa"
                    } else if profile.options.contains_key("wireless-key") {
                        "wep"
                    } else {
                        "open"
                    };
                    println!("{:<12} {:<32} {}", profile.interface, profile.name, auth);
                }
            }
        }
    }

    Ok(())
}

async fn cmd_serve(mut cfg: Config, port: Option<u16>, api_key: Option<String>) -> Result<()> {
    if let Some(port) = port {
        cfg.server.port = port;
    }
    if api_key.is_some() {
        cfg.server.api_key = api_key;
    }

    let manager = WifiManager::from_config(&cfg).context("Failed to open stores")?;
    server::run_server(manager, &cfg.server).await
}

fn cmd_show_config(path: Option<&std::path::Path>, cfg: &Config) -> Result<()> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config::config_path()?,
    };
    println!("Config file: {}", path.display());
    println!();

    let rendered = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    print!("{}", rendered);

    Ok(())
}
