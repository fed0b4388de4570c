use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use soillab::config::AppConfig;
use soillab::server::{self, MigrateDirection};

#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    #[clap(short, long, global = true)]
    log_level: Option<String>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the web service
    Serve {
        #[clap(short, long)]
        port: Option<u16>,
        #[clap(short, long)]
        database: Option<String>,
        #[clap(long)]
        lock_file: Option<String>,
        #[clap(long)]
        cors_origin: Option<String>,
        /// Optional TOML configuration file; CLI flags override it
        #[clap(short, long)]
        config: Option<String>,
    },
    /// Manage the database schema
    Migrate {
        #[clap(short, long, default_value = "soillab.db")]
        database: String,
        #[clap(subcommand)]
        direction: MigrateDirection,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    setup_logging(&args.log_level);

    match args.command {
        Commands::Serve {
            port,
            database,
            lock_file,
            cors_origin,
            config,
        } => {
            let mut app_config = match config {
                Some(path) => AppConfig::from_file(&path)?,
                None => AppConfig::default(),
            };
            if let Some(port) = port {
                app_config.server.port = port;
            }
            if let Some(database) = database {
                app_config.server.database_path = database;
            }
            if let Some(lock_file) = lock_file {
                app_config.lock.path = lock_file.into();
            }
            if let Some(cors_origin) = cors_origin {
                app_config.server.cors_origin = Some(cors_origin);
            }

            info!("Starting server on port {}", app_config.server.port);
            server::start_server(app_config).await?;
        }
        Commands::Migrate {
            database,
            direction,
        } => {
            server::migrate_database(&database, direction).await?;
        }
    }

    Ok(())
}

fn setup_logging(log_level: &Option<String>) {
    let log_level = match log_level
        .as_ref()
        .unwrap_or(&"info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level.to_string()))
        .without_time()
        .init();
}
