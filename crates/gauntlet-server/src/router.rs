use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use gauntlet_protocol::endpoints;
use gauntlet_store::FsObjectStore;
use tower_http::trace::TraceLayer;

use crate::git::GitIndexer;
use crate::handler;

/// Everything a request handler may touch.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FsObjectStore>,
    pub git: Arc<dyn GitIndexer>,
}

impl AppState {
    pub fn new(store: FsObjectStore, git: impl GitIndexer + 'static) -> Self {
        Self {
            store: Arc::new(store),
            git: Arc::new(git),
        }
    }
}

/// Build the axum router with all object store endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::PUBLISH, post(handler::publish))
        .route(
            endpoints::GIT,
            post(handler::register_git).get(handler::git_not_found),
        )
        .route(
            endpoints::OBJECT,
            get(handler::get_object).head(handler::head_object),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
