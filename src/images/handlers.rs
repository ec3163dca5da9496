use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use super::{
    dto::{GenerateRequest, GenerateResponse, HistoryResponse, ImageDto},
    repo,
    services::{generate_and_charge, Studio},
};
use crate::{auth::AuthUser, credits, error::AppError, state::AppState};

/// Two base64 reference images plus the prompt fit comfortably.
const GENERATE_BODY_LIMIT: usize = 25 * 1024 * 1024;

pub fn image_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/images/generate",
            post(generate).layer(DefaultBodyLimit::max(GENERATE_BODY_LIMIT)),
        )
        .route("/images/history", get(history))
}

#[instrument(skip(state, payload), fields(user_id = %session.id))]
pub async fn generate(
    State(state): State<AppState>,
    session: AuthUser,
    Json(payload): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    let request = payload.into_generation()?;

    let Some(model) = state.generator.as_deref() else {
        error!("image engine API key is not configured");
        return Err(AppError::Misconfigured("Image engine API key is not configured"));
    };

    // Advisory only; the ledger re-checks the balance when it writes.
    let account = credits::repo::find_account(&state.db, session.id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    if account.credits < 1 {
        info!(credits = account.credits, "generation refused before engine call");
        return Err(AppError::InsufficientCredits);
    }

    let server_references = state.references.load().await;
    let studio = Studio {
        model,
        store: state.storage.as_ref(),
        ledger: state.ledger.as_ref(),
        folder_base: &state.config.imagekit.generated_folder,
    };

    let outcome = generate_and_charge(&studio, session.id, server_references, request).await?;

    Ok(Json(GenerateResponse {
        images: outcome.images.into_iter().map(ImageDto::from).collect(),
        description: outcome.description,
        model: outcome.model,
        credits: outcome.balance,
        total_generated: outcome.total_generated,
    }))
}

/// Anonymous callers get an empty list rather than a 401.
#[instrument(skip(state, session))]
pub async fn history(State(state): State<AppState>, session: Option<AuthUser>) -> Response {
    let Some(session) = session else {
        return Json(HistoryResponse::default()).into_response();
    };

    match repo::list_recent_by_user(&state.db, session.id).await {
        Ok(rows) => Json(HistoryResponse {
            images: rows.into_iter().map(ImageDto::from).collect(),
        })
        .into_response(),
        Err(e) => {
            warn!(error = %e, user_id = %session.id, "history lookup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(HistoryResponse::default())).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    fn app() -> Router {
        image_routes().with_state(AppState::fake())
    }

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn generate_without_session_is_unauthorized() {
        let res = app()
            .oneshot(
                Request::post("/images/generate")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"prompt":"Ully"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await["error"], "Unauthorized");
    }

    #[tokio::test]
    async fn blank_prompt_is_rejected_before_any_lookup() {
        let state = AppState::fake();
        let token = state.session_token_for(uuid::Uuid::new_v4(), "user@example.com");
        let res = image_routes()
            .with_state(state)
            .oneshot(
                Request::post("/images/generate")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::from(r#"{"prompt":"   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["error"], "Prompt is required");
    }

    #[tokio::test]
    async fn anonymous_history_is_empty() {
        let res = app()
            .oneshot(Request::get("/images/history").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await, serde_json::json!({ "images": [] }));
    }

    mod db {
        use super::*;
        use std::sync::Arc;

        use crate::images::generator::ImageModel;
        use crate::images::services::fakes::{png, ScriptedModel};
        use crate::test_utils::{balance_of, bearer, body_json as json_of, create_test_user, image_count};
        use sqlx::PgPool;

        fn generate_request(auth: &str) -> Request<Body> {
            Request::post("/images/generate")
                .header("content-type", "application/json")
                .header("authorization", auth)
                .body(Body::from(r#"{"prompt":"Ully waving","aspectRatio":"1:1"}"#))
                .unwrap()
        }

        fn with_model(pool: PgPool, model: Arc<ScriptedModel>) -> AppState {
            let mut state = AppState::with_pool(pool);
            state.generator = Some(model as Arc<dyn ImageModel>);
            state
        }

        #[sqlx::test]
        async fn zero_credits_is_refused_before_engine_call(pool: PgPool) {
            let model = Arc::new(ScriptedModel::new(vec![Ok(png(1))]));
            let state = with_model(pool.clone(), model.clone());
            let user = create_test_user(&pool, 0).await;

            let res = image_routes()
                .with_state(state.clone())
                .oneshot(generate_request(&bearer(&state, &user)))
                .await
                .unwrap();

            assert_eq!(res.status(), StatusCode::PAYMENT_REQUIRED);
            assert!(model.calls().is_empty());
            assert_eq!(balance_of(&pool, user.id).await, 0);
            assert_eq!(image_count(&pool, user.id).await, 0);
        }

        #[sqlx::test]
        async fn generation_charges_and_shows_in_history(pool: PgPool) {
            let model = Arc::new(ScriptedModel::new(vec![Ok(png(1))]));
            let state = with_model(pool.clone(), model.clone());
            let user = create_test_user(&pool, 3).await;
            let auth = bearer(&state, &user);

            let res = image_routes()
                .with_state(state.clone())
                .oneshot(generate_request(&auth))
                .await
                .unwrap();

            assert_eq!(res.status(), StatusCode::OK);
            let body = json_of(res).await;
            assert_eq!(body["credits"], 2);
            assert_eq!(body["totalGenerated"], 1);
            assert_eq!(body["model"], "Ultragaz Studio Engine");
            assert_eq!(body["images"][0]["aspectRatio"], "1:1");
            assert!(!body.to_string().to_lowercase().contains("gemini"));
            assert_eq!(balance_of(&pool, user.id).await, 2);

            let res = image_routes()
                .with_state(state)
                .oneshot(
                    Request::get("/images/history")
                        .header("authorization", auth)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            let history = json_of(res).await;
            assert_eq!(history["images"].as_array().unwrap().len(), 1);
            assert_eq!(history["images"][0]["id"], body["images"][0]["id"]);
        }

        #[sqlx::test]
        async fn missing_engine_key_is_a_server_error(pool: PgPool) {
            let state = AppState::with_pool(pool.clone());
            let user = create_test_user(&pool, 3).await;

            let res = image_routes()
                .with_state(state.clone())
                .oneshot(generate_request(&bearer(&state, &user)))
                .await
                .unwrap();

            assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(balance_of(&pool, user.id).await, 3);
        }
    }
}
