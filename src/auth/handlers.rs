use axum::{
    extract::{FromRef, State},
    http::header::SET_COOKIE,
    response::{AppendHeaders, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, PublicUser, RefreshRequest, RegisterRequest},
        repo::is_unique_violation,
        repo_types::User,
        services::{cookie_header, hash_password, is_valid_email, verify_password, AuthUser, JwtKeys},
    },
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn issue_session(keys: &JwtKeys, user: User) -> Result<impl IntoResponse, AppError> {
    let access_token = keys.sign_access(user.id, &user.email)?;
    let refresh_token = keys.sign_refresh(user.id, &user.email)?;
    let cookie = cookie_header(keys.session_cookie(&access_token))
        .ok_or_else(|| anyhow::anyhow!("session cookie is not a valid header value"))?;

    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(AuthResponse {
            access_token,
            refresh_token,
            user: PublicUser::from(user),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.email = payload.email.trim().to_lowercase();
    let name = match payload.name.trim() {
        "" => payload.email.split('@').next().unwrap_or_default().to_string(),
        n => n.to_string(),
    };

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(AppError::BadRequest("Invalid email".into()));
    }

    if payload.password.len() < 8 {
        warn!("password too short");
        return Err(AppError::BadRequest("Password too short".into()));
    }

    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(AppError::Conflict("Email already registered".into()));
    }

    let hash = hash_password(&payload.password)?;
    // A concurrent registration can still win the race to the UNIQUE index.
    let mut user = match User::create(
        &state.db,
        &name,
        &payload.email,
        &hash,
        state.config.default_credits,
    )
    .await
    {
        Ok(user) => user,
        Err(e) if is_unique_violation(&e) => {
            warn!(email = %payload.email, "email registered concurrently");
            return Err(AppError::Conflict("Email already registered".into()));
        }
        Err(e) => return Err(e.into()),
    };

    if state.config.is_admin_email(&user.email) {
        User::promote_to_admin(&state.db, user.id).await?;
        user.is_admin = true;
        info!(user_id = %user.id, "allow-listed user promoted to admin");
    }

    info!(user_id = %user.id, email = %user.email, credits = user.credits, "user registered");
    issue_session(&JwtKeys::from_ref(&state), user)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(AppError::BadRequest("Invalid email".into()));
    }

    let Some(mut user) = User::find_by_email(&state.db, &payload.email).await? else {
        warn!(email = %payload.email, "login unknown email");
        return Err(AppError::Unauthorized);
    };

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(email = %payload.email, user_id = %user.id, "login invalid password");
        return Err(AppError::Unauthorized);
    }

    // First qualifying login persists the flag.
    if !user.is_admin && state.config.is_admin_email(&user.email) {
        User::promote_to_admin(&state.db, user.id).await?;
        user.is_admin = true;
        info!(user_id = %user.id, "allow-listed user promoted to admin");
    }

    info!(user_id = %user.id, email = %user.email, "user logged in");
    issue_session(&JwtKeys::from_ref(&state), user)
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&payload.refresh_token).map_err(|e| {
        warn!(error = %e, "refresh rejected");
        AppError::Unauthorized
    })?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or(AppError::Unauthorized)?;
    issue_session(&keys, user)
}

pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    let keys = JwtKeys::from_ref(&state);
    let headers = cookie_header(keys.clear_session_cookie())
        .map(|cookie| vec![(SET_COOKIE, cookie)])
        .unwrap_or_default();
    (AppendHeaders(headers), Json(serde_json::json!({ "success": true })))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    session: AuthUser,
) -> Result<Json<PublicUser>, AppError> {
    let user = User::find_by_id(&state.db, session.id)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    Ok(Json(PublicUser::from(user)))
}


#[cfg(test)]
mod register_tests {
    use super::*;
    use crate::test_utils::{body_json, create_test_user_with_email};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use sqlx::PgPool;
    use tower::ServiceExt;

    fn register_request(email: &str) -> Request<Body> {
        Request::post("/auth/register")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "email": email, "password": "correct-horse" }).to_string(),
            ))
            .unwrap()
    }

    #[sqlx::test]
    async fn new_account_gets_default_credits(pool: PgPool) {
        let res = auth_routes()
            .with_state(AppState::with_pool(pool))
            .oneshot(register_request("Ana@Example.com"))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["user"]["email"], "ana@example.com");
        assert_eq!(body["user"]["name"], "ana");
        assert_eq!(body["user"]["credits"], 3);
        assert_eq!(body["user"]["isAdmin"], false);
    }

    #[sqlx::test]
    async fn duplicate_email_is_a_conflict(pool: PgPool) {
        create_test_user_with_email(&pool, "ana@example.com", 3).await;

        let res = auth_routes()
            .with_state(AppState::with_pool(pool))
            .oneshot(register_request(" ANA@example.com "))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(res).await["error"], "Email already registered");
    }

    #[sqlx::test]
    async fn allow_listed_email_registers_as_admin(pool: PgPool) {
        let res = auth_routes()
            .with_state(AppState::with_pool(pool))
            .oneshot(register_request("boss@example.com"))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["user"]["isAdmin"], true);
    }
}
