use anyhow::Result;
use clap::{Parser, Subcommand};
use traineehub::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// traineehub - notification orchestrator for the trainee-management platform
#[derive(Parser)]
#[command(name = "traineehub")]
#[command(about = "Event-driven notification orchestrator", long_about = None)]
struct Cli {
    /// Path to a configuration file overriding config/default.toml
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume inbound queues and fire scheduled notifications
    Serve,
    /// Run database migrations
    Migrate,
    /// Drop the database if it exists and recreate it with migrations
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.json {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_filter(env_filter),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
            .try_init()?;
    }

    match cli.command {
        Commands::Serve => traineehub::server::serve(config).await,
        Commands::Migrate => traineehub::server::migrate(&config).await,
        Commands::Reset => traineehub::server::reset(&config).await,
    }
}
