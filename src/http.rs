use anyhow::Result;
use axum::routing::get;
use axum::Router;

async fn root() -> &'static str {
    "flow reporter running"
}

async fn healthz() -> &'static str {
    "ok"
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
}

/// Serve the liveness routes until the process shuts down.
pub async fn run(port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "health endpoint listening");
    axum::serve(listener, router()).await?;
    Ok(())
}
