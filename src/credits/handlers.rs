use axum::{extract::State, routing::get, Json, Router};
use tracing::instrument;

use super::{dto::CreditsResponse, repo};
use crate::{auth::AuthUser, error::AppError, state::AppState};

pub fn credit_routes() -> Router<AppState> {
    Router::new().route("/credits", get(get_credits))
}

#[instrument(skip(state))]
pub async fn get_credits(
    State(state): State<AppState>,
    session: AuthUser,
) -> Result<Json<CreditsResponse>, AppError> {
    let account = repo::find_account(&state.db, session.id)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    let total_generated = repo::count_generated(&state.db, session.id).await?;

    Ok(Json(CreditsResponse {
        credits: account.credits,
        total_generated,
        is_admin: account.is_admin,
    }))
}
