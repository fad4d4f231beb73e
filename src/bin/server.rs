//! latticekv Server Binary
//!
//! Starts the TCP server in primary or replica role per the YAML config.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use latticekv::config::Config;
use latticekv::network::{Server, ServerOptions};
use latticekv::storage::{Storage, StorageOptions};

/// latticekv Server
#[derive(Parser, Debug)]
#[command(name = "latticekv-server")]
#[command(about = "In-memory key-value store with WAL durability and replication")]
#[command(version)]
struct Args {
    /// Path to the YAML config file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: could not load config file: {}. Using default configuration.",
                e
            );
            Config::default()
        }
    };

    init_tracing(&config);

    tracing::info!("latticekv server v{}", latticekv::VERSION);
    tracing::info!(address = %config.network.address, "configured listen address");

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    let wal_config = match config.wal_config() {
        Ok(wal_config) => wal_config,
        Err(e) => {
            tracing::error!(error = %e, "invalid WAL configuration");
            std::process::exit(1);
        }
    };

    if wal_config.is_some() {
        tracing::info!("WAL is enabled - data will persist after restart");
    } else {
        tracing::info!("WAL is disabled - data will be lost after restart");
    }

    let storage = match Storage::open(StorageOptions {
        wal: wal_config,
        replication: config.replication_config(),
    }) {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize storage");
            std::process::exit(1);
        }
    };

    let options = ServerOptions {
        address: config.network.address.clone(),
        max_connections: config.network.max_connections,
        max_message_size: config.message_buffer_size(),
        idle_timeout: config.network.idle_timeout,
    };

    let mut server = Server::new(options, Arc::clone(&storage));

    // SIGINT/SIGTERM flip the server's shutdown flag; the accept loop
    // notices within one poll interval
    let shutdown = server.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown.shutdown();
    }) {
        tracing::warn!(error = %e, "failed to install signal handler");
    }

    if let Err(e) = server.run() {
        tracing::error!(error = %e, "server error");
        storage.close();
        std::process::exit(1);
    }

    storage.close();
    tracing::info!("server stopped");
}

/// Initialize tracing from the `logging` config section
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,latticekv={}", config.logging.level)));

    let builder = fmt().with_env_filter(filter).with_target(true);

    match config.logging.output.as_str() {
        "" | "stdout" => builder.init(),
        "stderr" => builder.with_writer(std::io::stderr).init(),
        path => match std::fs::File::create(path) {
            Ok(file) => builder
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init(),
            Err(e) => {
                eprintln!("Warning: cannot open log file {}: {}. Logging to stdout.", path, e);
                builder.init();
            }
        },
    }
}
