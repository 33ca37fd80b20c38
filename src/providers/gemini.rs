use crate::{
    config::GeminiConfig,
    error::{MediaError, Result},
    models::{Capability, GenerationRequest, GenerationResult},
    providers::{ensure_success, sniff_image, MediaProvider, ProviderId},
};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(alias = "mime_type")]
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    candidate_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
}

#[derive(Deserialize)]
pub(crate) struct GeminiResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(alias = "inline_data", rename = "inlineData")]
    inline_data: Option<InlineData>,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, config: &GeminiConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &GeminiConfig) -> Option<Self> {
        config
            .api_key
            .as_ref()
            .map(|api_key| Self::new(api_key.clone(), config))
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn build_request(&self, request: &GenerationRequest) -> Result<GeminiRequest> {
        let mut parts = vec![Part::Text {
            text: request.prompt()?.to_string(),
        }];
        if request.capability == Capability::Edit {
            let source = request.source()?;
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: source.mime_type.clone(),
                    data: source.to_base64(),
                },
            });
        }

        Ok(GeminiRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
                candidate_count: request.options.candidate_count(),
                image_config: request
                    .options
                    .get_str("aspect_ratio")
                    .map(|ratio| ImageConfig {
                        aspect_ratio: ratio.to_string(),
                    }),
            },
        })
    }

    pub async fn generate_content(&self, request: &GenerationRequest) -> Result<Vec<Vec<u8>>> {
        let body = self.build_request(request)?;
        log::info!("Calling Gemini model: {}", self.model);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(ProviderId::Gemini, response).await?;

        let text = response.text().await?;
        log::debug!("Gemini API response received (length: {})", text.len());
        let parsed: GeminiResponse = serde_json::from_str(&text).map_err(|e| {
            MediaError::InvalidProviderResponse(format!("failed to parse Gemini JSON: {}", e))
        })?;

        extract_images(parsed)
    }
}

#[async_trait]
impl MediaProvider for GeminiClient {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    async fn execute(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        match request.capability {
            Capability::Generate | Capability::Edit => {
                let images = self.generate_content(request).await?;
                let (content_type, extension) =
                    sniff_image(&images[0]).unwrap_or(("image/png", "png"));
                let verb = if request.capability == Capability::Edit {
                    "Edited"
                } else {
                    "Generated"
                };
                let message = format!("{} {} image(s) with {}", verb, images.len(), self.model);
                Ok(GenerationResult::new(ProviderId::Gemini, images)
                    .with_content_type(content_type)
                    .with_extension(extension)
                    .with_message(message))
            }
            capability => Err(MediaError::CapabilityUnsupported {
                provider: ProviderId::Gemini.to_string(),
                capability,
            }),
        }
    }
}

/// Every image across all candidates, in order. Inline data is taken as is;
/// text parts count only when they decode to a recognizable image.
pub(crate) fn extract_images(response: GeminiResponse) -> Result<Vec<Vec<u8>>> {
    let mut images = Vec::new();
    let mut texts = Vec::new();

    let parts = response
        .candidates
        .unwrap_or_default()
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .filter_map(|content| content.parts)
        .flatten();

    for part in parts {
        if let Some(inline) = part.inline_data {
            images.push(general_purpose::STANDARD.decode(inline.data.trim())?);
            continue;
        }
        if let Some(text) = part.text {
            match general_purpose::STANDARD.decode(strip_base64_wrapping(&text)) {
                Ok(bytes) if sniff_image(&bytes).is_some() => images.push(bytes),
                _ => texts.push(text),
            }
        }
    }

    if images.is_empty() {
        let detail = if texts.is_empty() {
            "no candidates with image data".to_string()
        } else {
            format!("model returned text only: {}", texts.join(" "))
        };
        return Err(MediaError::InvalidProviderResponse(detail));
    }
    Ok(images)
}

/// Removes Markdown fences, a `data:` URI prefix and whitespace around base64 text.
pub(crate) fn strip_base64_wrapping(text: &str) -> String {
    let mut body = text.trim().to_string();
    for fence in ["```base64", "```png", "```text", "```"] {
        body = body.replace(fence, "");
    }
    let body = body.trim();
    let body = match body.find(";base64,") {
        Some(idx) if body.starts_with("data:") => &body[idx + ";base64,".len()..],
        _ => body,
    };
    body.chars().filter(|c| !c.is_whitespace()).collect()
}
