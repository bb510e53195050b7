mod cli;
mod dispatch;
mod web;

use anyhow::Result;
use cli::Args;
use tracing_subscriber::EnvFilter;
use web::server::run_server;

const DEFAULT_LOG_FILTER: &str = "volley_detect=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // RUST_LOG overrides the default filter
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse_args();
    tracing::debug!(?args, "Parsed arguments");

    run_server(args).await
}
