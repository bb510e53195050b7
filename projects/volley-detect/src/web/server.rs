use crate::cli::Args;
use crate::dispatch::Dispatcher;
use crate::web::api::{
    cancel_analysis_handler, health_handler, job_status_handler, list_jobs_handler,
    start_analysis_handler,
};
use crate::web::assets::{index_handler, static_handler};
use crate::web::events::events_handler;
use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub fn router(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route(
            "/execute-python/:detection_target",
            post(start_analysis_handler),
        )
        .route("/cancel-analysis", post(cancel_analysis_handler))
        .route("/jobs", get(list_jobs_handler))
        .route("/jobs/:job_id", get(job_status_handler))
        .route("/events", get(events_handler))
        .route("/health", get(health_handler))
        .route("/*path", get(static_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

pub async fn run_server(args: Args) -> Result<()> {
    let addr = SocketAddr::new(args.host, args.port);
    let listener =
        TcpListener::bind(addr).with_context(|| format!("Failed to bind to {}", addr))?;
    // Tokio requires a non-blocking socket
    listener.set_nonblocking(true)?;

    let dispatcher = Dispatcher::new(args.dispatcher_config());

    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "Volley detect server running on http://{}",
        tokio_listener.local_addr()?
    );

    serve(tokio_listener, dispatcher, shutdown_signal()).await
}

/// Serves until `signal` resolves. Jobs are terminated before connections
/// drain, which also ends every open event stream.
async fn serve(
    listener: tokio::net::TcpListener,
    dispatcher: Dispatcher,
    signal: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = router(dispatcher.clone());
    let shutdown = async move {
        signal.await;
        dispatcher.shutdown().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
