use bytes::Bytes;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::generator::{generate_with_fallback, GenerationRequest, ImageData, ImageModel};
use super::references::MAX_REFERENCE_IMAGES;
use super::repo_types::{GeneratedImage, NewImage};
use super::sanitize::{sanitize_optional, sanitize_provider_text};
use crate::credits::ledger::{ChargeError, CreditLedger};
use crate::error::AppError;
use crate::http::UpstreamError;
use crate::storage::{ext_from_mime, user_folder, AssetStore, StoredAsset};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("insufficient credits")]
    InsufficientFunds,

    #[error("image engine returned no image")]
    NoImage { description: Option<String> },

    #[error("image engine request failed: {0:#}")]
    Provider(anyhow::Error),

    #[error("asset storage failed: {0:#}")]
    Storage(anyhow::Error),

    #[error("database failure: {0:#}")]
    Database(anyhow::Error),
}

impl From<GenerationError> for AppError {
    fn from(e: GenerationError) -> Self {
        match e {
            GenerationError::InsufficientFunds => AppError::InsufficientCredits,
            GenerationError::NoImage { description } => AppError::NoImage { description },
            GenerationError::Provider(e) => AppError::Provider(public_provider_message(&e)),
            GenerationError::Storage(e) => AppError::Other(e.context("store generated images")),
            GenerationError::Database(e) => AppError::Other(e.context("record generated images")),
        }
    }
}

const PROVIDER_FAILURE: &str = "Image generation failed";

/// Client-facing text for a failed engine call. Only the vendor's own
/// `error.message` may pass through, sanitized; hosts, URLs and raw bodies
/// stay in the logs.
pub fn public_provider_message(e: &anyhow::Error) -> String {
    let detail = e
        .chain()
        .find_map(|cause| cause.downcast_ref::<UpstreamError>())
        .and_then(UpstreamError::vendor_message)
        .map(|m| sanitize_provider_text(&m))
        .filter(|m| is_presentable(m));

    match detail {
        Some(detail) => format!("{PROVIDER_FAILURE}: {detail}"),
        None => PROVIDER_FAILURE.to_string(),
    }
}

fn is_presentable(message: &str) -> bool {
    let lower = message.to_lowercase();
    message.len() <= 300 && !lower.contains("google") && !lower.contains("://") && !lower.contains(".com")
}

/// Collaborators of one generation request.
pub struct Studio<'a> {
    pub model: &'a dyn ImageModel,
    pub store: &'a dyn AssetStore,
    pub ledger: &'a dyn CreditLedger,
    pub folder_base: &'a str,
}

#[derive(Debug)]
pub struct GenerationOutcome {
    pub images: Vec<GeneratedImage>,
    pub description: Option<String>,
    pub model: String,
    pub balance: i32,
    pub total_generated: i64,
}

/// Generate, upload, then charge. Nothing is charged unless every image is
/// on the CDN, and nothing stays on the CDN unless the charge commits.
pub async fn generate_and_charge(
    studio: &Studio<'_>,
    user_id: Uuid,
    server_references: &[String],
    request: GenerationRequest,
) -> Result<GenerationOutcome, GenerationError> {
    let mut primary = request.clone();
    primary.references = server_references
        .iter()
        .take(MAX_REFERENCE_IMAGES)
        .chain(request.references.iter())
        .cloned()
        .collect();

    let output = generate_with_fallback(studio.model, &primary).await?;
    let description = sanitize_optional(output.text.as_deref());
    let model = sanitize_provider_text(studio.model.model_id());

    let folder = user_folder(studio.folder_base, &user_id.to_string());
    let assets = upload_batch(studio.store, &folder, &output.images)
        .await
        .map_err(GenerationError::Storage)?;

    let rows = assets
        .iter()
        .map(|asset| {
            let variants = studio.store.variants(&asset.file_path);
            NewImage {
                id: Uuid::new_v4(),
                prompt: request.prompt.clone(),
                description: description.clone(),
                image_path: asset.url.clone(),
                storage_file_id: Some(asset.file_id.clone()),
                model: model.clone(),
                aspect_ratio: request.aspect_ratio.map(|a| a.as_str().to_string()),
                seed: request.seed,
                share_url: Some(variants.share_url),
                background_removed_url: Some(variants.background_removed_url),
                preview_url: Some(variants.preview_url),
            }
        })
        .collect();

    match studio.ledger.charge(user_id, rows).await {
        Ok(receipt) => {
            info!(%user_id, images = receipt.images.len(), balance = receipt.balance, "generation charged");
            Ok(GenerationOutcome {
                images: receipt.images,
                description,
                model,
                balance: receipt.balance,
                total_generated: receipt.total_generated,
            })
        }
        Err(e) => {
            discard_assets(studio.store, &assets).await;
            Err(match e {
                ChargeError::InsufficientFunds => GenerationError::InsufficientFunds,
                ChargeError::Empty => GenerationError::Database(anyhow::anyhow!("no images to record")),
                ChargeError::Database(e) => GenerationError::Database(e),
            })
        }
    }
}

/// Uploads every image; on a mid-batch failure removes what was already
/// uploaded before returning the error.
pub async fn upload_batch(
    store: &dyn AssetStore,
    folder: &str,
    images: &[ImageData],
) -> anyhow::Result<Vec<StoredAsset>> {
    let mut stored = Vec::with_capacity(images.len());
    for img in images {
        let ext = ext_from_mime(&img.mime_type).unwrap_or("png");
        let file_name = format!("{}.{}", Uuid::new_v4(), ext);
        match store.upload(folder, &file_name, Bytes::clone(&img.bytes)).await {
            Ok(asset) => stored.push(asset),
            Err(e) => {
                discard_assets(store, &stored).await;
                return Err(e);
            }
        }
    }
    Ok(stored)
}

/// Best effort: failures are logged and never replace the caller's error.
pub async fn discard_assets(store: &dyn AssetStore, assets: &[StoredAsset]) {
    for asset in assets {
        if let Err(e) = store.delete(&asset.file_id).await {
            warn!(error = %e, file_id = %asset.file_id, "failed to delete uploaded asset");
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use time::OffsetDateTime;
    use uuid::Uuid;

    use crate::credits::ledger::{ChargeError, ChargeReceipt, CreditLedger};
    use crate::images::generator::{GenerationRequest, ImageData, ImageModel, ModelOutput};
    use crate::images::repo_types::{GeneratedImage, NewImage};
    use crate::storage::{transformed_url, AssetStore, StoredAsset};

    pub fn png(n: usize) -> ModelOutput {
        ModelOutput {
            images: (0..n)
                .map(|i| ImageData {
                    bytes: Bytes::from(format!("image-{i}")),
                    mime_type: "image/png".into(),
                })
                .collect(),
            text: Some("Gemini drew Ully in the kitchen".into()),
        }
    }

    /// Replays scripted outcomes and records the references each call sent.
    pub struct ScriptedModel {
        script: Mutex<VecDeque<anyhow::Result<ModelOutput>>>,
        pub calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedModel {
        pub fn new(script: Vec<anyhow::Result<ModelOutput>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Reference count per call.
        pub fn calls(&self) -> Vec<usize> {
            self.calls.lock().unwrap().iter().map(Vec::len).collect()
        }

        pub fn sent_references(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ImageModel for ScriptedModel {
        fn model_id(&self) -> &str {
            "gemini-2.5-flash-image-preview"
        }

        async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<ModelOutput> {
            self.calls.lock().unwrap().push(request.references.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ModelOutput::default()))
        }
    }

    #[derive(Default)]
    pub struct MemoryStore {
        pub uploaded: Mutex<Vec<StoredAsset>>,
        /// Every delete attempted, including refused ones.
        pub deleted: Mutex<Vec<String>>,
        /// Zero-based index of the upload that fails.
        pub fail_upload_at: Option<usize>,
        pub fail_deletes: bool,
    }

    #[async_trait]
    impl AssetStore for MemoryStore {
        async fn upload(&self, folder: &str, file_name: &str, _body: Bytes) -> anyhow::Result<StoredAsset> {
            let mut uploaded = self.uploaded.lock().unwrap();
            if self.fail_upload_at == Some(uploaded.len()) {
                anyhow::bail!("cdn unavailable");
            }
            let asset = StoredAsset {
                file_id: format!("file-{}", uploaded.len()),
                file_path: format!("{folder}/{file_name}"),
                url: format!("https://cdn.test{folder}/{file_name}"),
            };
            uploaded.push(asset.clone());
            Ok(asset)
        }

        async fn delete(&self, file_id: &str) -> anyhow::Result<()> {
            self.deleted.lock().unwrap().push(file_id.to_string());
            if self.fail_deletes {
                anyhow::bail!("delete refused");
            }
            Ok(())
        }

        fn url(&self, path: &str, transformation: Option<&str>) -> String {
            transformed_url("https://cdn.test", path, transformation)
        }
    }

    /// Same contract as the Postgres ledger: decrement only when the balance
    /// covers the cost, checked under the lock at charge time.
    pub struct MemoryLedger {
        pub balance: Mutex<i32>,
        pub rows: Mutex<Vec<GeneratedImage>>,
        pub fail_with_database_error: bool,
    }

    impl MemoryLedger {
        pub fn with_balance(balance: i32) -> Self {
            Self {
                balance: Mutex::new(balance),
                rows: Mutex::new(Vec::new()),
                fail_with_database_error: false,
            }
        }

        pub fn balance(&self) -> i32 {
            *self.balance.lock().unwrap()
        }
    }

    #[async_trait]
    impl CreditLedger for MemoryLedger {
        async fn charge(&self, user_id: Uuid, images: Vec<NewImage>) -> Result<ChargeReceipt, ChargeError> {
            if images.is_empty() {
                return Err(ChargeError::Empty);
            }
            if self.fail_with_database_error {
                return Err(ChargeError::Database(anyhow::anyhow!("connection reset")));
            }
            let cost = images.len() as i32;
            let mut balance = self.balance.lock().unwrap();
            if *balance < cost {
                return Err(ChargeError::InsufficientFunds);
            }
            *balance -= cost;

            let mut rows = self.rows.lock().unwrap();
            let inserted: Vec<GeneratedImage> = images
                .into_iter()
                .map(|n| GeneratedImage {
                    id: n.id,
                    user_id,
                    prompt: n.prompt,
                    description: n.description,
                    image_path: n.image_path,
                    storage_file_id: n.storage_file_id,
                    model: n.model,
                    aspect_ratio: n.aspect_ratio,
                    seed: n.seed,
                    share_url: n.share_url,
                    background_removed_url: n.background_removed_url,
                    preview_url: n.preview_url,
                    created_at: OffsetDateTime::now_utc(),
                })
                .collect();
            rows.extend(inserted.iter().cloned());

            Ok(ChargeReceipt {
                balance: *balance,
                total_generated: rows.len() as i64,
                images: inserted,
            })
        }
    }
}
