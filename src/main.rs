//! stompd - STOMP 1.0 message broker
//!
//! Usage:
//!   stompd [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>      Configuration file path
//!   --port <PORT>            TCP listen port (default: 44444)
//!   --dbhost <HOST>          Database server hostname
//!   --dbport <PORT>          Database server port (default: 5432)
//!   --dbdatabase <DATABASE>  Database name
//!   --dbsockdir <DIR>        Database unix socket directory
//!   --dbuser <USER>          Database role
//!   --dbpassword <PASSWORD>  Database password
//!   -l, --log-level          Log level (error, warn, info, debug, trace)
//!   -h, --help               Print help

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use stompd::broker::{Broker, BrokerConfig};
use stompd::config::Config;
use stompd::persistence::{MemoryBackend, PostgresBackend, StorageBackend};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// stompd - STOMP 1.0 message broker
#[derive(Parser, Debug)]
#[command(name = "stompd")]
#[command(version = "0.1.0")]
#[command(about = "STOMP 1.0 message broker with fair-share queues and durable overflow")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP listen port
    #[arg(long)]
    port: Option<u16>,

    /// Database server hostname
    #[arg(long)]
    dbhost: Option<String>,

    /// Database server port
    #[arg(long)]
    dbport: Option<u16>,

    /// Database name
    #[arg(long)]
    dbdatabase: Option<String>,

    /// Database unix socket directory
    #[arg(long)]
    dbsockdir: Option<String>,

    /// Database role
    #[arg(long)]
    dbuser: Option<String>,

    /// Database password
    #[arg(long)]
    dbpassword: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise use defaults
    let mut file_config = if let Some(config_path) = &args.config {
        match Config::load(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config file: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // Setup logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match file_config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    // CLI args override file config
    let port = args.port.unwrap_or(file_config.server.port);
    if let Some(host) = args.dbhost {
        file_config.database.host = Some(host);
    }
    if let Some(dbport) = args.dbport {
        file_config.database.port = dbport;
    }
    if let Some(database) = args.dbdatabase {
        file_config.database.database = database;
    }
    if let Some(sockdir) = args.dbsockdir {
        file_config.database.sockdir = Some(sockdir);
    }
    if let Some(user) = args.dbuser {
        file_config.database.user = Some(user);
    }
    if let Some(password) = args.dbpassword {
        file_config.database.password = Some(password);
    }

    let broker_config = BrokerConfig {
        bind_addr: ([0, 0, 0, 0], port).into(),
        backlog: file_config.server.backlog,
        frame_trailing_newline: file_config.server.frame_trailing_newline,
        default_prefetch: file_config.server.default_prefetch,
        max_frame_size: file_config.server.max_frame_size,
        connect_timeout: Duration::from_secs(file_config.server.connect_timeout_secs),
    };

    info!("Starting stompd STOMP broker");
    info!("  Bind address: {}", broker_config.bind_addr);
    info!("  Default prefetch: {}", broker_config.default_prefetch);
    info!("  Max frame size: {} bytes", broker_config.max_frame_size);

    let storage: Arc<dyn StorageBackend> = if file_config.database.is_configured() {
        info!(
            "  Persistence: postgres ({})",
            file_config
                .database
                .host
                .as_deref()
                .or(file_config.database.sockdir.as_deref())
                .unwrap_or("?")
        );
        match PostgresBackend::connect(&file_config.database).await {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                eprintln!("Error connecting to database: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        info!("  Persistence: in-memory (no database configured)");
        Arc::new(MemoryBackend::new())
    };

    let broker = Broker::new(broker_config, storage);
    broker.run().await?;

    Ok(())
}
