mod dto;
pub mod handlers;
pub mod ledger;
pub mod repo;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::credit_routes()
}
