use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::crawler::Crawler;
use crate::db::KnowledgeStore;

pub mod error;
pub mod handlers;
pub mod models;

/// Shared handler state. `shutdown` is the parent of every crawl's
/// cancellation token, so stopping the service stops running crawls.
pub struct AppState<S> {
    pub crawler: Crawler,
    pub store: S,
    pub shutdown: CancellationToken,
}

impl<S: KnowledgeStore> AppState<S> {
    pub fn new(crawler: Crawler, store: S, shutdown: CancellationToken) -> Self {
        Self {
            crawler,
            store,
            shutdown,
        }
    }
}

pub fn create_router<S: KnowledgeStore>(state: Arc<AppState<S>>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/scrape", post(handlers::scrape_handler::<S>))
        .route("/knowledge/:id", get(handlers::knowledge_handler::<S>))
        .route(
            "/users/:user_id/knowledge",
            get(handlers::user_knowledge_handler::<S>),
        )
        .route("/health", get(handlers::health_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}
