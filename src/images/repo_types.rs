use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Row of `generated_images`.
#[derive(Debug, Clone, FromRow)]
pub struct GeneratedImage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub prompt: String,
    pub description: Option<String>,
    pub image_path: String,
    pub storage_file_id: Option<String>,
    pub model: String,
    pub aspect_ratio: Option<String>,
    pub seed: Option<i64>,
    pub share_url: Option<String>,
    pub background_removed_url: Option<String>,
    pub preview_url: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Row to insert once the asset is already on the CDN.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub id: Uuid,
    pub prompt: String,
    pub description: Option<String>,
    pub image_path: String,
    pub storage_file_id: Option<String>,
    pub model: String,
    pub aspect_ratio: Option<String>,
    pub seed: Option<i64>,
    pub share_url: Option<String>,
    pub background_removed_url: Option<String>,
    pub preview_url: Option<String>,
}
