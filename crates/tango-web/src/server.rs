//! Axum router: every path in the REST surface, wired to `tango_core::System`
//! through [`AppState`].

use crate::api;
use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/open/:key/:lab/", get(api::open_lab))
        .route("/upload/:key/:lab/", post(api::upload_file))
        .route("/addJob/:key/:lab/", post(api::add_job))
        .route("/poll/:key/:lab/:output", get(api::poll_job))
        .route("/getPartialOutput/:key/:jobid/", get(api::get_partial_output))
        .route("/info/:key/", get(api::info))
        .route("/jobs/:key/:dead_jobs/", get(api::list_jobs))
        .route("/pool/:key/:image/", get(api::get_pool))
        .route("/prealloc/:key/:image/:num/", post(api::set_pool))
        .route("/build/:key/", post(api::build_image))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "tango-web listening");
    axum::serve(listener, router).await?;
    Ok(())
}
