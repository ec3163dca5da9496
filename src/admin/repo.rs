use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use super::dto::AdminUserRow;

/// Every user with their image count, oldest account first.
pub async fn list_users_with_counts(db: &PgPool) -> anyhow::Result<Vec<AdminUserRow>> {
    let rows = sqlx::query_as::<_, AdminUserRow>(
        r#"
        SELECT u.id, u.name, u.email, u.credits, u.is_admin,
               COALESCE(g.total, 0) AS total_generated
          FROM users u
          LEFT JOIN (
                SELECT user_id, count(*) AS total
                  FROM generated_images
                 GROUP BY user_id
               ) g ON g.user_id = u.id
         ORDER BY u.created_at
        "#,
    )
    .fetch_all(db)
    .await
    .context("list users with image counts")?;
    Ok(rows)
}

/// Direct set. Returns `false` when no such user exists.
pub async fn set_credits(db: &PgPool, user_id: Uuid, credits: i32) -> anyhow::Result<bool> {
    let result = sqlx::query("UPDATE users SET credits = $1 WHERE id = $2")
        .bind(credits)
        .bind(user_id)
        .execute(db)
        .await
        .context("set user credits")?;
    Ok(result.rows_affected() > 0)
}
