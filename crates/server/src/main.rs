use clap::Parser;
use skyhaven_engine::{Catalog, GameConfig};
use skyhaven_server::ServerOptions;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "skyhaven-server")]
#[command(about = "Local API for a Skyhaven floating island")]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value_t = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 39444))]
    addr: SocketAddr,

    /// SQLite database path (default: ~/.skyhaven/skyhaven.db)
    #[arg(long)]
    db: Option<PathBuf>,

    /// YAML game config; only used when the database has no island yet
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON building catalog replacing the built-in one
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Seconds between production ticks
    #[arg(long)]
    tick_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => GameConfig::load(path)?,
        None => GameConfig::default(),
    };
    if let Some(secs) = cli.tick_secs {
        config.tick_secs = secs;
    }
    config.validate()?;

    let catalog = match &cli.catalog {
        Some(path) => Catalog::load(path)?,
        None => Catalog::builtin()?,
    };

    let db_path = cli.db.unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".skyhaven")
            .join("skyhaven.db")
    });

    skyhaven_server::serve(
        cli.addr,
        ServerOptions {
            db_path,
            config,
            catalog,
        },
    )
    .await
}
