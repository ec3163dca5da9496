use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub credits: i32,
    pub is_admin: bool,
}

/// Current balance and admin flag, `None` when the row is gone.
pub async fn find_account(db: &PgPool, user_id: Uuid) -> anyhow::Result<Option<Account>> {
    let row = sqlx::query_as::<_, Account>(
        r#"
        SELECT credits, is_admin
          FROM users
         WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

pub async fn count_generated(db: &PgPool, user_id: Uuid) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM generated_images WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(db)
        .await?;
    Ok(count)
}
