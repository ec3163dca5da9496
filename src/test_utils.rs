//! Fixtures for `#[sqlx::test]` suites.

use axum::{body::Body, response::Response};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::repo_types::User;
use crate::images::repo_types::NewImage;
use crate::state::AppState;

pub async fn create_test_user(pool: &PgPool, credits: i32) -> User {
    let email = format!("testuser_{}@example.com", Uuid::new_v4().simple());
    create_test_user_with_email(pool, &email, credits).await
}

pub async fn create_test_user_with_email(pool: &PgPool, email: &str, credits: i32) -> User {
    User::create(pool, "Test User", email, "not-a-real-hash", credits)
        .await
        .expect("Failed to create test user")
}

pub async fn create_test_admin_user(pool: &PgPool) -> User {
    let mut user = create_test_user(pool, 0).await;
    User::promote_to_admin(pool, user.id)
        .await
        .expect("Failed to promote test user");
    user.is_admin = true;
    user
}

pub fn bearer(state: &AppState, user: &User) -> String {
    format!("Bearer {}", state.session_token_for(user.id, &user.email))
}

pub fn new_image(prompt: &str) -> NewImage {
    let id = Uuid::new_v4();
    NewImage {
        id,
        prompt: prompt.to_string(),
        description: Some("A friendly mascot".into()),
        image_path: format!("https://cdn.test/ultragaz-generated/{id}.png"),
        storage_file_id: Some(format!("file-{id}")),
        model: "Ultragaz Studio Engine".into(),
        aspect_ratio: Some("1:1".into()),
        seed: None,
        share_url: None,
        background_removed_url: None,
        preview_url: None,
    }
}

pub async fn balance_of(pool: &PgPool, user_id: Uuid) -> i32 {
    sqlx::query_scalar("SELECT credits FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("Failed to read balance")
}

pub async fn image_count(pool: &PgPool, user_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT count(*) FROM generated_images WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("Failed to count images")
}

pub async fn body_json(res: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("body is not JSON")
}
