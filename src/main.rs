use clap::{Parser, Subcommand};
use knowsync::sync::{SyncApi, SyncService};
use knowsync::{api, config, logging};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Knowledge ingestion and vector-index synchronization service.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (default).
    Serve,
    /// Run the bulk migration once and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    config::init_config();
    logging::init_tracing();

    let service = Arc::new(SyncService::from_config().await?);
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(service).await,
        Command::Migrate => {
            let report = service.run_migration().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.failures.is_empty() {
                anyhow::bail!("{} source(s) failed to migrate", report.failures.len());
            }
            Ok(())
        }
    }
}

async fn serve(service: Arc<SyncService>) -> anyhow::Result<()> {
    let app = api::create_router(service);
    let (listener, port) = bind_listener().await?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4300..=4399;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4300-4399",
    ))
}
