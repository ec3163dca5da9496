use axum::{extract::State, routing::get, Json, Router};
use tracing::{info, instrument, warn};

use super::{
    dto::{AdminUsersResponse, SuccessResponse, UpdateCreditsRequest},
    repo,
    services::{validate_update, AdminUser},
};
use crate::{error::AppError, state::AppState};

pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/admin/credits", get(list_users).patch(update_credits))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<AdminUsersResponse>, AppError> {
    let users = repo::list_users_with_counts(&state.db).await?;
    Ok(Json(AdminUsersResponse { users }))
}

#[instrument(skip(state, payload))]
pub async fn update_credits(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(payload): Json<UpdateCreditsRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    let (user_id, credits) = validate_update(&payload).map_err(|e| {
        warn!(admin_id = %admin.id, ?payload, "rejected credit update");
        e
    })?;

    if !repo::set_credits(&state.db, user_id, credits).await? {
        return Err(AppError::NotFound("User"));
    }

    info!(admin_id = %admin.id, admin_email = %admin.email, %user_id, credits, "credits set by admin");
    Ok(Json(SuccessResponse { success: true }))
}
