use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::sanitize::sanitize_optional;
use super::services::GenerationError;
use crate::config::GeneratorConfig;
use crate::http::HttpClient;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are the lead visual designer for Ultragaz. Generate striking 3D character artwork that feels premium, welcoming, and brand-aligned. Always respect brand colours (Ultragaz blue #004B87, warm highlights) and return vivid, production-ready ideas.";
const DESCRIPTION_INSTRUCTION: &str =
    "Always return a detailed written description alongside the generated imagery.";
const REFERENCE_MIME: &str = "image/png";
const MAX_OUTPUT_TOKENS: u32 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "9:16")]
    Tall,
    #[serde(rename = "16:9")]
    Wide,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Tall => "9:16",
            AspectRatio::Wide => "16:9",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonGeneration {
    DontAllow,
    AllowAdult,
    AllowAll,
}

/// Normalized input for one model call. `references` are bare base64 strings.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub references: Vec<String>,
    pub temperature: Option<f64>,
    pub seed: Option<i64>,
    pub aspect_ratio: Option<AspectRatio>,
    pub person_generation: Option<PersonGeneration>,
}

impl GenerationRequest {
    pub fn without_references(&self) -> Self {
        Self {
            references: Vec::new(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageData {
    pub bytes: Bytes,
    pub mime_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct ModelOutput {
    pub images: Vec<ImageData>,
    pub text: Option<String>,
}

#[async_trait]
pub trait ImageModel: Send + Sync {
    /// Provider model id; only ever shown after sanitization.
    fn model_id(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<ModelOutput>;
}

/// Primary attempt with references, then exactly one attempt without them if
/// the first errored or returned no image.
pub async fn generate_with_fallback(
    model: &dyn ImageModel,
    request: &GenerationRequest,
) -> Result<ModelOutput, GenerationError> {
    let primary_text = match model.generate(request).await {
        Ok(out) if !out.images.is_empty() => return Ok(out),
        Ok(out) => {
            warn!(
                references = request.references.len(),
                "primary attempt returned no image, retrying without references"
            );
            out.text
        }
        Err(e) => {
            warn!(
                error = %e,
                references = request.references.len(),
                "primary attempt failed, retrying without references"
            );
            None
        }
    };

    match model.generate(&request.without_references()).await {
        Ok(out) if !out.images.is_empty() => Ok(out),
        Ok(out) => Err(GenerationError::NoImage {
            description: sanitize_optional(out.text.as_deref().or(primary_text.as_deref())),
        }),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "fallback attempt failed");
            Err(GenerationError::Provider(e))
        }
    }
}

pub struct GeminiClient {
    http: HttpClient,
    api_key: String,
    model: String,
    api_base: String,
}

impl GeminiClient {
    /// `None` when no API key is configured.
    pub fn from_config(cfg: &GeneratorConfig, http: HttpClient) -> Option<Self> {
        let api_key = cfg.api_key.clone()?;
        Some(Self {
            http,
            api_key,
            model: cfg.model.clone(),
            api_base: cfg.api_base.clone(),
        })
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

#[async_trait]
impl ImageModel for GeminiClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<ModelOutput> {
        let system = format!("{DEFAULT_SYSTEM_PROMPT}\n\n{DESCRIPTION_INSTRUCTION}");
        let payload = build_payload(&system, request);
        debug!(
            model = %self.model,
            references = request.references.len(),
            "requesting image generation"
        );

        let response = self
            .http
            .send(
                self.http
                    .request(Method::POST, &self.endpoint())
                    .header("x-goog-api-key", &self.api_key)
                    .json(&payload),
            )
            .await?;

        let body: GenerateContentResponse = response
            .json()
            .await
            .context("decode generateContent response")?;
        extract_output(body)
    }
}

// ---- wire types ----

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    max_output_tokens: u32,
    response_modalities: [&'a str; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    person_generation: Option<PersonGeneration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    #[serde(alias = "inline_data")]
    inline_data: Option<ResponseInline>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseInline {
    #[serde(alias = "mime_type")]
    mime_type: Option<String>,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

fn build_payload<'a>(system: &'a str, request: &'a GenerationRequest) -> GenerateContentRequest<'a> {
    let mut parts = vec![Part::Text {
        text: &request.prompt,
    }];
    parts.extend(request.references.iter().map(|data| Part::Inline {
        inline_data: InlineData {
            mime_type: REFERENCE_MIME,
            data,
        },
    }));

    let image_config = (request.aspect_ratio.is_some() || request.person_generation.is_some())
        .then(|| ImageConfig {
            aspect_ratio: request.aspect_ratio.map(|a| a.as_str()),
            person_generation: request.person_generation,
        });

    GenerateContentRequest {
        system_instruction: Content {
            role: None,
            parts: vec![Part::Text { text: system }],
        },
        contents: vec![Content {
            role: Some("user"),
            parts,
        }],
        generation_config: GenerationConfig {
            temperature: request.temperature,
            seed: request.seed,
            max_output_tokens: MAX_OUTPUT_TOKENS,
            response_modalities: ["IMAGE", "TEXT"],
            image_config,
        },
    }
}

fn extract_output(body: GenerateContentResponse) -> anyhow::Result<ModelOutput> {
    let mut images = Vec::new();
    let mut texts = Vec::new();

    for part in body
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
    {
        if let Some(text) = part.text.filter(|t| !t.trim().is_empty()) {
            texts.push(text.trim().to_string());
        }
        let Some(inline) = part.inline_data else {
            continue;
        };
        let mime_type = inline.mime_type.unwrap_or_default();
        if !mime_type.starts_with("image/") || inline.data.is_empty() {
            continue;
        }
        let bytes = BASE64
            .decode(inline.data.as_bytes())
            .context("image part base64 decode failed")?;
        images.push(ImageData {
            bytes: Bytes::from(bytes),
            mime_type,
        });
    }

    if texts.is_empty() {
        if let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason) {
            texts.push(format!("Request blocked: {reason}"));
        }
    }

    Ok(ModelOutput {
        images,
        text: (!texts.is_empty()).then(|| texts.join("\n")),
    })
}
