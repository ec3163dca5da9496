mod dto;
pub mod generator;
pub mod handlers;
pub mod references;
pub mod repo;
pub mod repo_types;
pub mod sanitize;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::image_routes()
}
