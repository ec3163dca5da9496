use std::path::{Path, PathBuf};

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::ReferenceConfig;

/// Caller-supplied and server-managed references are each capped at this.
pub const MAX_REFERENCE_IMAGES: usize = 2;

/// Strips a data-URL prefix and all whitespace. `None` when nothing is left.
pub fn normalize_base64(input: &str) -> Option<String> {
    let trimmed = input.trim();
    let data = match trimmed.rsplit_once(',') {
        Some((_, tail)) => tail,
        None => trimmed,
    };
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Normalizes every entry, drops empties, keeps the first [`MAX_REFERENCE_IMAGES`].
pub fn normalize_references<I, S>(inputs: I) -> Vec<String>
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    inputs
        .into_iter()
        .flatten()
        .filter_map(|s| normalize_base64(s.as_ref()))
        .take(MAX_REFERENCE_IMAGES)
        .collect()
}

/// Server-managed reference images (the character sheet plus extras),
/// read from disk once and shared by every request.
pub struct ReferenceLibrary {
    sheet_base64_path: PathBuf,
    sheet_image_path: PathBuf,
    extra_paths: Vec<PathBuf>,
    cache: OnceCell<Vec<String>>,
}

impl ReferenceLibrary {
    pub fn new(cfg: &ReferenceConfig) -> Self {
        Self {
            sheet_base64_path: cfg.sheet_base64_path.clone(),
            sheet_image_path: cfg.sheet_image_path.clone(),
            extra_paths: cfg.extra_paths.clone(),
            cache: OnceCell::new(),
        }
    }

    #[cfg(test)]
    pub fn preloaded(images: Vec<String>) -> Self {
        Self {
            sheet_base64_path: PathBuf::new(),
            sheet_image_path: PathBuf::new(),
            extra_paths: Vec::new(),
            cache: OnceCell::new_with(Some(images)),
        }
    }

    /// Concurrent first callers await a single disk read. A failed read is
    /// not cached; the next call tries again.
    pub async fn load(&self) -> &[String] {
        match self.cache.get_or_try_init(|| self.read_all()).await {
            Ok(images) => images.as_slice(),
            Err(e) => {
                warn!(error = %e, "reference images unavailable, generating without them");
                &[]
            }
        }
    }

    async fn read_all(&self) -> anyhow::Result<Vec<String>> {
        let mut images = Vec::new();
        match self.read_sheet().await {
            Ok(sheet) => images.push(sheet),
            Err(e) => warn!(error = %e, "character sheet not loaded"),
        }
        for path in &self.extra_paths {
            if images.len() >= MAX_REFERENCE_IMAGES {
                break;
            }
            match read_image_as_base64(path).await {
                Ok(img) => images.push(img),
                Err(e) => warn!(error = %e, path = %path.display(), "reference image not loaded"),
            }
        }

        let configured = 1 + self.extra_paths.len();
        anyhow::ensure!(
            !images.is_empty(),
            "none of the {configured} configured reference images could be read"
        );
        info!(count = images.len(), "reference images cached");
        Ok(images)
    }

    /// Prefers the pre-encoded text file, falls back to the image itself.
    async fn read_sheet(&self) -> anyhow::Result<String> {
        match tokio::fs::read_to_string(&self.sheet_base64_path).await {
            Ok(text) => {
                if let Some(normalized) = normalize_base64(&text) {
                    debug!(path = %self.sheet_base64_path.display(), "character sheet read from base64 file");
                    return Ok(normalized);
                }
            }
            Err(e) => debug!(error = %e, "base64 character sheet missing, reading image"),
        }
        read_image_as_base64(&self.sheet_image_path).await
    }
}

async fn read_image_as_base64(path: &Path) -> anyhow::Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    anyhow::ensure!(!bytes.is_empty(), "{} is empty", path.display());
    Ok(BASE64.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn normalizes_data_urls_and_whitespace() {
        assert_eq!(
            normalize_base64("data:image/png;base64,AB CD\nEF").as_deref(),
            Some("ABCDEF")
        );
        assert_eq!(normalize_base64("  QUJD  ").as_deref(), Some("QUJD"));
        assert_eq!(normalize_base64("data:image/png;base64,"), None);
        assert_eq!(normalize_base64("   "), None);
    }

    #[test]
    fn caps_references_after_normalization() {
        let refs = normalize_references(vec![
            Some("   "),
            None,
            Some("data:image/png;base64,AAA"),
            Some("BBB"),
            Some("CCC"),
        ]);
        assert_eq!(refs, vec!["AAA".to_string(), "BBB".to_string()]);
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mascot-studio-{tag}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn prefers_base64_file_and_caches() {
        let dir = temp_dir("refs");
        let txt = dir.join("sheet.base64.txt");
        let png = dir.join("sheet.png");
        std::fs::write(&txt, "data:image/png;base64,U0hFRVQ=\n").unwrap();
        std::fs::write(&png, b"raw-png").unwrap();

        let lib = ReferenceLibrary::new(&ReferenceConfig {
            sheet_base64_path: txt.clone(),
            sheet_image_path: png,
            extra_paths: vec![],
        });
        assert_eq!(lib.load().await, ["U0hFRVQ=".to_string()]);

        // Served from the cache even once the file is gone.
        std::fs::remove_file(&txt).unwrap();
        assert_eq!(lib.load().await, ["U0hFRVQ=".to_string()]);
    }

    #[tokio::test]
    async fn falls_back_to_image_and_adds_extras() {
        let dir = temp_dir("fallback");
        let png = dir.join("sheet.png");
        let extra = dir.join("extra.jpg");
        std::fs::write(&png, b"png").unwrap();
        std::fs::write(&extra, b"jpg").unwrap();

        let lib = ReferenceLibrary::new(&ReferenceConfig {
            sheet_base64_path: dir.join("missing.txt"),
            sheet_image_path: png,
            extra_paths: vec![extra.clone(), extra],
        });
        let loaded = lib.load().await;
        assert_eq!(loaded.len(), MAX_REFERENCE_IMAGES);
        assert_eq!(loaded[0], BASE64.encode(b"png"));
        assert_eq!(loaded[1], BASE64.encode(b"jpg"));
    }

    #[tokio::test]
    async fn failed_population_is_retried() {
        let dir = temp_dir("retry");
        let png = dir.join("sheet.png");
        let lib = Arc::new(ReferenceLibrary::new(&ReferenceConfig {
            sheet_base64_path: dir.join("missing.txt"),
            sheet_image_path: png.clone(),
            extra_paths: vec![],
        }));

        let (a, b) = tokio::join!(lib.load(), lib.load());
        assert!(a.is_empty() && b.is_empty());

        std::fs::write(&png, b"late").unwrap();
        assert_eq!(lib.load().await, [BASE64.encode(b"late")]);
    }
}
