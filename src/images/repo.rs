use anyhow::Context;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::repo_types::{GeneratedImage, NewImage};

const IMAGE_COLUMNS: &str = "id, user_id, prompt, description, image_path, storage_file_id, model, \
     aspect_ratio, seed, share_url, background_removed_url, preview_url, created_at";

pub const HISTORY_LIMIT: i64 = 50;

/// Insert a generated image within the charging transaction.
pub async fn insert_image_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    image: &NewImage,
) -> anyhow::Result<GeneratedImage> {
    let row = sqlx::query_as::<_, GeneratedImage>(&format!(
        r#"
        INSERT INTO generated_images
            (id, user_id, prompt, description, image_path, storage_file_id, model,
             aspect_ratio, seed, share_url, background_removed_url, preview_url)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {IMAGE_COLUMNS}
        "#
    ))
    .bind(image.id)
    .bind(user_id)
    .bind(&image.prompt)
    .bind(&image.description)
    .bind(&image.image_path)
    .bind(&image.storage_file_id)
    .bind(&image.model)
    .bind(&image.aspect_ratio)
    .bind(image.seed)
    .bind(&image.share_url)
    .bind(&image.background_removed_url)
    .bind(&image.preview_url)
    .fetch_one(&mut **tx)
    .await
    .context("insert generated image")?;

    Ok(row)
}

/// Newest first, capped at [`HISTORY_LIMIT`].
pub async fn list_recent_by_user(db: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<GeneratedImage>> {
    let rows = sqlx::query_as::<_, GeneratedImage>(&format!(
        r#"
        SELECT {IMAGE_COLUMNS}
          FROM generated_images
         WHERE user_id = $1
         ORDER BY created_at DESC
         LIMIT $2
        "#
    ))
    .bind(user_id)
    .bind(HISTORY_LIMIT)
    .fetch_all(db)
    .await
    .context("list generated images")?;

    Ok(rows)
}
