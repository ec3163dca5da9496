use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use super::generator::{AspectRatio, GenerationRequest, PersonGeneration};
use super::references::normalize_references;
use super::repo_types::GeneratedImage;
use crate::error::AppError;

/// Seeds arrive either as JSON numbers or as numeric strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SeedInput {
    Number(f64),
    Text(String),
}

impl SeedInput {
    /// Blank, non-numeric and non-finite seeds are ignored.
    pub fn resolve(&self) -> Option<i64> {
        let value = match self {
            SeedInput::Number(n) => *n,
            SeedInput::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then(|| value.trunc() as i64)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub prompt: Option<String>,
    #[serde(default)]
    pub reference_images: Option<Vec<Option<String>>>,
    pub temperature: Option<f64>,
    pub seed: Option<SeedInput>,
    pub aspect_ratio: Option<String>,
    pub person_generation: Option<String>,
}

impl GenerateRequest {
    pub fn into_generation(self) -> Result<GenerationRequest, AppError> {
        let prompt = self
            .prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::BadRequest("Prompt is required".into()))?
            .to_string();

        let aspect_ratio = match self.aspect_ratio.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                parse_aspect_ratio(raw)
                    .ok_or_else(|| AppError::BadRequest(format!("Unsupported aspect ratio: {raw}")))?,
            ),
        };

        let person_generation = match self.person_generation.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                parse_person_generation(raw)
                    .ok_or_else(|| AppError::BadRequest(format!("Unsupported person generation: {raw}")))?,
            ),
        };

        Ok(GenerationRequest {
            prompt,
            references: normalize_references(self.reference_images.unwrap_or_default()),
            temperature: self
                .temperature
                .filter(|t| t.is_finite())
                .map(|t| t.clamp(0.0, 1.0)),
            seed: self.seed.as_ref().and_then(SeedInput::resolve),
            aspect_ratio,
            person_generation,
        })
    }
}

fn parse_aspect_ratio(raw: &str) -> Option<AspectRatio> {
    Some(match raw {
        "1:1" => AspectRatio::Square,
        "3:4" => AspectRatio::Portrait,
        "4:3" => AspectRatio::Landscape,
        "9:16" => AspectRatio::Tall,
        "16:9" => AspectRatio::Wide,
        _ => return None,
    })
}

fn parse_person_generation(raw: &str) -> Option<PersonGeneration> {
    Some(match raw {
        "dont_allow" => PersonGeneration::DontAllow,
        "allow_adult" => PersonGeneration::AllowAdult,
        "allow_all" => PersonGeneration::AllowAll,
        _ => return None,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDto {
    pub id: Uuid,
    pub prompt: String,
    pub description: Option<String>,
    pub image_path: String,
    pub model: String,
    pub aspect_ratio: Option<String>,
    pub seed: Option<i64>,
    pub share_url: Option<String>,
    pub background_removed_url: Option<String>,
    pub preview_url: Option<String>,
    pub created_at: String,
}

impl From<GeneratedImage> for ImageDto {
    fn from(img: GeneratedImage) -> Self {
        Self {
            id: img.id,
            prompt: img.prompt,
            description: img.description,
            image_path: img.image_path,
            model: img.model,
            aspect_ratio: img.aspect_ratio,
            seed: img.seed,
            share_url: img.share_url,
            background_removed_url: img.background_removed_url,
            preview_url: img.preview_url,
            created_at: img.created_at.format(&Rfc3339).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub images: Vec<ImageDto>,
    pub description: Option<String>,
    pub model: String,
    pub credits: i32,
    pub total_generated: i64,
}

#[derive(Debug, Default, Serialize)]
pub struct HistoryResponse {
    pub images: Vec<ImageDto>,
}
