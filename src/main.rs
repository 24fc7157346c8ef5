#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use tiered_memory_core::Config;

/// Command-line overrides for the environment-driven configuration.
#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(name = "tiered-memory-server", about = "Tiered conversation memory core")]
struct Args {
    /// Override API_PORT.
    #[arg(long)]
    port: Option<u16>,

    /// Override DATABASE_PATH.
    #[arg(long)]
    database_path: Option<String>,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut cfg = Config::from_env()?;
    if let Some(port) = args.port {
        cfg.api_port = port;
    }
    if let Some(path) = args.database_path {
        cfg.database_path = path;
    }

    tiered_memory_core::run_server(cfg).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("cli feature not enabled. Enable with --features cli");
}
