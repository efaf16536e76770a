// ============================================
// File: crates/fleetlink-server/src/main.rs
// ============================================
//! # FleetLink Server Entry Point
//!
//! ## Creation Reason
//! Main entry point for the FleetLink device communication server.
//! Handles CLI parsing, logging setup, and server initialization.
//!
//! ## Main Functionality
//! - CLI argument parsing with clap
//! - Logging initialization with tracing
//! - Configuration loading
//! - Master secret generation
//! - Server execution
//!
//! ## Usage
//! ```bash
//! # Step 1: Generate a master secret and reference it in the config
//! fleetlink-server keygen --output /etc/fleetlink/master.key
//!
//! # Step 2: Start server
//! fleetlink-server start
//!
//! # Other commands
//! fleetlink-server validate            # Validate config file
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Losing the master secret strands every device on its issued key
//!   only for v2, but breaks v1 devices entirely
//! - `RUST_LOG` overrides the configured log level
//! - Use systemd for production deployments
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fleetlink_core::MasterSecret;
use fleetlink_server::{Server, ServerConfig};

// ============================================
// CLI Definition
// ============================================

/// FleetLink Device Communication Server
#[derive(Parser, Debug)]
#[command(name = "fleetlink-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/fleetlink/server.toml")]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/fleetlink/server.toml")]
        config: PathBuf,
    },

    /// Generate a new base64 master secret
    Keygen {
        /// Write the secret to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start { config } => cmd_start(config).await,
        Commands::Validate { config } => {
            init_logging("info");
            cmd_validate(config).await
        }
        Commands::Keygen { output } => {
            init_logging("info");
            cmd_keygen(output).await
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Starts the server.
async fn cmd_start(config_path: PathBuf) -> anyhow::Result<()> {
    let config = match load_or_default_config(&config_path).await {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            return Err(e);
        }
    };
    init_logging(&config.logging.level);

    let master = config.security.load_master_secret().await?;

    info!("════════════════════════════════════════");
    info!("  FleetLink Server v{}", env!("CARGO_PKG_VERSION"));
    info!("════════════════════════════════════════");
    info!("  Listen:          {}", config.listen_addr());
    info!("  Protocol header: {}", config.network.protocol_header);
    info!("  Concurrency:     {}", config.scheduler.concurrency);
    info!("════════════════════════════════════════");

    let server = Server::new(config, master);
    server.run().await?;
    Ok(())
}

/// Validates the configuration file.
async fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("⚠️  Config file not found: {}", config_path.display());
        println!("   Server will use default values.");
        return Ok(());
    }

    let config = ServerConfig::load(&config_path).await?;
    let secret = match config.security.load_master_secret().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("NOT USABLE ({e})"),
    };

    println!("✅ Configuration is valid");
    println!();
    println!("Network:");
    println!("   Listen:            {}", config.listen_addr());
    println!("   Protocol header:   {}", config.network.protocol_header);
    println!();
    println!("Security:");
    println!("   Master secret:     {secret}");
    println!();
    println!("Guard:");
    println!("   Check interval:    {}ms", config.guard.check_interval_ms);
    println!("   Max loop delay:    {}ms", config.guard.max_event_loop_delay_ms);
    println!("   Max virtual mem:   {}MB", config.guard.max_virtual_memory_mb);
    println!("   Max resident mem:  {}MB", config.guard.max_resident_memory_mb);
    println!("   Reject delay:      {}s", config.guard.reject_delay_secs);
    println!();
    println!("Scheduler:");
    println!("   Concurrency:       {}", config.scheduler.concurrency);
    println!("   Intervals:         {}", config.intervals.len());
    println!("   Device overrides:  {}", config.devices.len());
    println!();

    Ok(())
}

/// Generates a master secret.
async fn cmd_keygen(output: Option<PathBuf>) -> anyhow::Result<()> {
    let encoded = MasterSecret::generate().to_base64();

    match output {
        Some(path) => {
            tokio::fs::write(&path, format!("{encoded}\n")).await?;
            info!("Master secret written to {}", path.display());
            println!("Set in config:  [security] master_secret_file = \"{}\"", path.display());
        }
        None => println!("{encoded}"),
    }
    Ok(())
}

// ============================================
// Helpers
// ============================================

/// Initializes the tracing subscriber. `RUST_LOG` wins over `level`.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}

/// Loads config, or defaults if the file does not exist.
async fn load_or_default_config(path: &Path) -> anyhow::Result<ServerConfig> {
    if path.exists() {
        Ok(ServerConfig::load(path).await?)
    } else {
        println!("Config file not found at {}, using defaults", path.display());
        Ok(ServerConfig::default())
    }
}
