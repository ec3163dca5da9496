use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
    pub cookie_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    /// `None` keeps the server up; generation then fails with a 500.
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageKitConfig {
    pub public_key: String,
    pub private_key: String,
    pub url_endpoint: String,
    pub generated_folder: String,
    pub upload_base: String,
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceConfig {
    pub sheet_base64_path: PathBuf,
    pub sheet_image_path: PathBuf,
    pub extra_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub generator: GeneratorConfig,
    pub imagekit: ImageKitConfig,
    pub references: ReferenceConfig,
    pub admin_emails: Vec<String>,
    pub default_credits: i32,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| get(key).with_context(|| format!("{key} must be set"));
        let parse_or = |key: &str, default: i64| {
            get(key)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(default)
        };

        let database_url = require("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: require("JWT_SECRET")?,
            issuer: get("JWT_ISSUER").unwrap_or_else(|| "mascot-studio".into()),
            audience: get("JWT_AUDIENCE").unwrap_or_else(|| "mascot-studio-users".into()),
            ttl_minutes: parse_or("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: parse_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
            cookie_name: get("SESSION_COOKIE").unwrap_or_else(|| "studio_session".into()),
        };

        // Legacy variable names, first match wins.
        let generator = GeneratorConfig {
            api_key: get("GOOGLE_GENERATIVE_AI_API_KEY")
                .or_else(|| get("GEMINI_API_KEY"))
                .or_else(|| get("GOOGLE_API_KEY")),
            model: get("GEMINI_IMAGE_MODEL")
                .or_else(|| get("GEMINI_MODEL"))
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.into()),
            api_base: get("GEMINI_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".into()),
        };

        let imagekit = ImageKitConfig {
            public_key: require("IMAGEKIT_PUBLIC_KEY")?,
            private_key: require("IMAGEKIT_PRIVATE_KEY")?,
            url_endpoint: require("IMAGEKIT_URL_ENDPOINT")?
                .trim_end_matches('/')
                .to_string(),
            generated_folder: get("IMAGEKIT_GENERATED_FOLDER")
                .unwrap_or_else(|| "/ultragaz-generated".into())
                .trim_end_matches('/')
                .to_string(),
            upload_base: get("IMAGEKIT_UPLOAD_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://upload.imagekit.io".into()),
            api_base: get("IMAGEKIT_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://api.imagekit.io".into()),
        };

        let references = ReferenceConfig {
            sheet_base64_path: get("CHARACTER_SHEET_BASE64_PATH")
                .unwrap_or_else(|| "public/ultragaz-character-sheet.base64.txt".into())
                .into(),
            sheet_image_path: get("CHARACTER_SHEET_PATH")
                .unwrap_or_else(|| "public/ultragaz-character-sheet.png".into())
                .into(),
            extra_paths: split_list(get("REFERENCE_IMAGES").as_deref().unwrap_or(""))
                .into_iter()
                .map(PathBuf::from)
                .collect(),
        };

        let admin_emails = split_list(get("ADMIN_EMAILS").as_deref().unwrap_or(""))
            .into_iter()
            .map(|e| e.to_lowercase())
            .collect();

        let default_credits = parse_or("DEFAULT_CREDITS", 3).clamp(0, i32::MAX as i64) as i32;

        Ok(Self {
            database_url,
            jwt,
            generator,
            imagekit,
            references,
            admin_emails,
            default_credits,
        })
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        !email.is_empty() && self.admin_emails.iter().any(|a| *a == email)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/studio"),
            ("JWT_SECRET", "secret"),
            ("IMAGEKIT_PUBLIC_KEY", "public_x"),
            ("IMAGEKIT_PRIVATE_KEY", "private_x"),
            ("IMAGEKIT_URL_ENDPOINT", "https://ik.imagekit.io/studio/"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> anyhow::Result<AppConfig> {
        AppConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = load(&base_env()).unwrap();
        assert_eq!(cfg.generator.model, DEFAULT_IMAGE_MODEL);
        assert!(cfg.generator.api_key.is_none());
        assert_eq!(cfg.imagekit.url_endpoint, "https://ik.imagekit.io/studio");
        assert_eq!(cfg.imagekit.generated_folder, "/ultragaz-generated");
        assert_eq!(cfg.jwt.cookie_name, "studio_session");
        assert_eq!(cfg.default_credits, 3);
        assert!(cfg.admin_emails.is_empty());
    }

    #[test]
    fn missing_cdn_keys_fail_fast() {
        let mut env = base_env();
        env.remove("IMAGEKIT_PRIVATE_KEY");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("IMAGEKIT_PRIVATE_KEY"));
    }

    #[test]
    fn api_key_checks_legacy_names_in_order() {
        let mut env = base_env();
        env.insert("GOOGLE_API_KEY", "third");
        assert_eq!(load(&env).unwrap().generator.api_key.as_deref(), Some("third"));
        env.insert("GEMINI_API_KEY", "second");
        assert_eq!(load(&env).unwrap().generator.api_key.as_deref(), Some("second"));
        env.insert("GOOGLE_GENERATIVE_AI_API_KEY", "first");
        assert_eq!(load(&env).unwrap().generator.api_key.as_deref(), Some("first"));
    }

    #[test]
    fn model_prefers_image_specific_variable() {
        let mut env = base_env();
        env.insert("GEMINI_MODEL", "fallback-model");
        assert_eq!(load(&env).unwrap().generator.model, "fallback-model");
        env.insert("GEMINI_IMAGE_MODEL", "image-model");
        assert_eq!(load(&env).unwrap().generator.model, "image-model");
    }

    #[test]
    fn admin_emails_are_normalized() {
        let mut env = base_env();
        env.insert("ADMIN_EMAILS", " Boss@Example.com, ,ops@example.com ");
        let cfg = load(&env).unwrap();
        assert_eq!(cfg.admin_emails, vec!["boss@example.com", "ops@example.com"]);
        assert!(cfg.is_admin_email("BOSS@example.com"));
        assert!(!cfg.is_admin_email("someone@example.com"));
        assert!(!cfg.is_admin_email(""));
    }
}
