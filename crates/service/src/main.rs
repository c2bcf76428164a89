use anyhow::Result;
use clap::Parser;
use gateway_core::config::Settings;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod middleware;
mod routes;
mod sse;
mod state;
mod upstream;

use state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the service to
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gateway_service=info,tower_http=info"));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let args = Args::parse();
    let settings = Settings::from_env();

    info!(
        addr = %args.addr,
        native_tools_enabled = settings.native_tools_enabled,
        continuation_enabled = settings.continuation.enabled,
        routing_enabled = settings.routing.enabled,
        "starting gateway service"
    );

    let state = AppState::new(settings)?;
    let app = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
