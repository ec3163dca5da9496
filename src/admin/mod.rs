mod dto;
pub mod handlers;
pub mod repo;
pub mod services;

pub use services::AdminUser;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::admin_routes()
}
