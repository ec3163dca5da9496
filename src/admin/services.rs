use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::UpdateCreditsRequest;
use crate::{
    auth::{repo_types::User, AuthUser},
    error::AppError,
    state::AppState,
};

const INVALID_PAYLOAD: &str = "Invalid payload";

/// Caller that passed the admin gate.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub id: Uuid,
    pub email: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = AuthUser::from_request_parts(parts, state).await?;
        ensure_admin(state, session).await
    }
}

/// Admin flag wins; otherwise an allow-listed email is promoted on the spot.
pub async fn ensure_admin(state: &AppState, session: AuthUser) -> Result<AdminUser, AppError> {
    let Some(user) = User::find_by_id(&state.db, session.id).await? else {
        warn!(user_id = %session.id, "admin gate: session user no longer exists");
        return Err(AppError::Forbidden);
    };

    if !user.is_admin {
        if !state.config.is_admin_email(&session.email) {
            warn!(user_id = %user.id, "admin gate: access denied");
            return Err(AppError::Forbidden);
        }
        User::promote_to_admin(&state.db, user.id).await?;
        info!(user_id = %user.id, "allow-listed user promoted to admin");
    }

    Ok(AdminUser {
        id: user.id,
        email: user.email,
    })
}

/// Checks the PATCH body without touching the database.
pub fn validate_update(payload: &UpdateCreditsRequest) -> Result<(Uuid, i32), AppError> {
    let invalid = || AppError::BadRequest(INVALID_PAYLOAD.into());

    let user_id = match &payload.user_id {
        Some(Value::String(raw)) => Uuid::parse_str(raw.trim()).map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };

    let credits = match &payload.credits {
        Some(Value::Number(n)) => parse_credits(n).ok_or_else(invalid)?,
        _ => return Err(invalid()),
    };

    Ok((user_id, credits))
}

fn parse_credits(n: &serde_json::Number) -> Option<i32> {
    if let Some(i) = n.as_i64() {
        return i32::try_from(i).ok().filter(|c| *c >= 0);
    }
    if n.is_u64() {
        return None;
    }
    // `5.0` is whole; `2.5` is not.
    let f = n.as_f64()?;
    if f.fract() != 0.0 || f < 0.0 || f > i32::MAX as f64 {
        return None;
    }
    Some(f as i32)
}
