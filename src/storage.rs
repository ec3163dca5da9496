use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use reqwest::{multipart::Form, Method};
use serde::Deserialize;

use crate::config::ImageKitConfig;
use crate::http::HttpClient;

pub const SHARE_TRANSFORMATION: &str = "w-1200,h-1200,c-at_max,f-jpg,q-90";
pub const PREVIEW_TRANSFORMATION: &str = "w-512,h-512,c-maintain_ratio,fo-center,f-jpg,q-80";
pub const BACKGROUND_REMOVED_TRANSFORMATION: &str = "e-bgremove,f-png";

/// A file the CDN accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub file_id: String,
    pub file_path: String,
    pub url: String,
}

/// URL variants derived from a stored path; nothing extra is uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetVariants {
    pub share_url: String,
    pub preview_url: String,
    pub background_removed_url: String,
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn upload(&self, folder: &str, file_name: &str, body: Bytes) -> anyhow::Result<StoredAsset>;
    async fn delete(&self, file_id: &str) -> anyhow::Result<()>;
    fn url(&self, path: &str, transformation: Option<&str>) -> String;

    fn variants(&self, path: &str) -> AssetVariants {
        AssetVariants {
            share_url: self.url(path, Some(SHARE_TRANSFORMATION)),
            preview_url: self.url(path, Some(PREVIEW_TRANSFORMATION)),
            background_removed_url: self.url(path, Some(BACKGROUND_REMOVED_TRANSFORMATION)),
        }
    }
}

#[derive(Clone)]
pub struct ImageKitStorage {
    http: HttpClient,
    private_key: String,
    url_endpoint: String,
    upload_base: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    file_id: String,
    file_path: String,
    url: String,
}

impl ImageKitStorage {
    pub fn new(cfg: &ImageKitConfig, http: HttpClient) -> Self {
        tracing::info!(
            public_key = %cfg.public_key,
            url_endpoint = %cfg.url_endpoint,
            "imagekit storage configured"
        );
        Self {
            http,
            private_key: cfg.private_key.clone(),
            url_endpoint: cfg.url_endpoint.clone(),
            upload_base: cfg.upload_base.clone(),
            api_base: cfg.api_base.clone(),
        }
    }
}

#[async_trait]
impl AssetStore for ImageKitStorage {
    async fn upload(&self, folder: &str, file_name: &str, body: Bytes) -> anyhow::Result<StoredAsset> {
        // Non-unique names: re-uploading the same name overwrites.
        let form = Form::new()
            .text("file", BASE64.encode(&body))
            .text("fileName", file_name.to_string())
            .text("folder", folder.to_string())
            .text("useUniqueFileName", "false");

        let url = format!("{}/api/v1/files/upload", self.upload_base);
        let response = self
            .http
            .send(
                self.http
                    .request(Method::POST, &url)
                    .basic_auth(&self.private_key, Some(""))
                    .multipart(form),
            )
            .await
            .with_context(|| format!("upload {}/{}", folder, file_name))?;

        let uploaded: UploadResponse = response.json().await.context("decode upload response")?;
        Ok(StoredAsset {
            file_id: uploaded.file_id,
            file_path: uploaded.file_path,
            url: uploaded.url,
        })
    }

    async fn delete(&self, file_id: &str) -> anyhow::Result<()> {
        let url = format!("{}/v1/files/{}", self.api_base, file_id);
        self.http
            .send(
                self.http
                    .request(Method::DELETE, &url)
                    .basic_auth(&self.private_key, Some("")),
            )
            .await
            .with_context(|| format!("delete file {}", file_id))?;
        Ok(())
    }

    fn url(&self, path: &str, transformation: Option<&str>) -> String {
        transformed_url(&self.url_endpoint, path, transformation)
    }
}

pub fn transformed_url(endpoint: &str, path: &str, transformation: Option<&str>) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    match transformation {
        Some(tr) if !tr.is_empty() => format!("{endpoint}/{path}?tr={tr}"),
        _ => format!("{endpoint}/{path}"),
    }
}

/// `{base}/{user_id}` with a single leading slash and no doubled separators.
pub fn user_folder(base: &str, user_id: &str) -> String {
    let base = base.trim_matches('/');
    if base.is_empty() {
        format!("/{user_id}")
    } else {
        format!("/{base}/{user_id}")
    }
}

pub fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}
