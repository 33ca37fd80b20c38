use crate::{
    config::HuggingFaceConfig,
    error::{MediaError, Result},
    models::{Capability, GenerationRequest, GenerationResult, SourceAsset},
    providers::{ensure_success, sniff_image, MediaProvider, ProviderId},
};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{header::CONTENT_TYPE, Client};
use serde_json::{json, Value};

#[derive(Clone)]
pub struct HuggingFaceClient {
    client: Client,
    token: String,
    base_url: String,
    image_model: String,
    background_model: String,
}

impl HuggingFaceClient {
    pub fn new(token: impl Into<String>, config: &HuggingFaceConfig) -> Self {
        Self {
            client: Client::new(),
            token: token.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            image_model: config.image_model.clone(),
            background_model: config.background_model.clone(),
        }
    }

    pub fn from_config(config: &HuggingFaceConfig) -> Option<Self> {
        config
            .token
            .as_ref()
            .map(|token| Self::new(token.clone(), config))
    }

    fn model_url(&self, model: &str) -> String {
        format!("{}/{}", self.base_url, model)
    }

    /// One call per candidate; the inference endpoint returns a single image.
    pub async fn text_to_image(&self, request: &GenerationRequest) -> Result<Vec<Vec<u8>>> {
        let count = request.options.candidate_count();
        let mut images = Vec::with_capacity(count as usize);

        for index in 0..count {
            let payload = text_to_image_payload(request, index)?;
            log::info!(
                "Hugging Face text-to-image with {} ({}/{})",
                self.image_model,
                index + 1,
                count
            );
            let response = self
                .client
                .post(self.model_url(&self.image_model))
                .bearer_auth(&self.token)
                .json(&payload)
                .send()
                .await?;
            let response = ensure_success(ProviderId::HuggingFace, response).await?;
            images.push(decode_image_response(response.bytes().await?.to_vec())?);
        }
        Ok(images)
    }

    pub async fn remove_background(&self, source: &SourceAsset) -> Result<Vec<u8>> {
        log::info!(
            "Hugging Face background removal with {} for {}",
            self.background_model,
            source.path.display()
        );
        let response = self
            .client
            .post(self.model_url(&self.background_model))
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, source.mime_type.as_str())
            .body(source.data.clone())
            .send()
            .await?;
        let response = ensure_success(ProviderId::HuggingFace, response).await?;
        decode_image_response(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl MediaProvider for HuggingFaceClient {
    fn id(&self) -> ProviderId {
        ProviderId::HuggingFace
    }

    async fn execute(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let (images, model) = match request.capability {
            Capability::Generate => (self.text_to_image(request).await?, &self.image_model),
            Capability::RemoveBackground => (
                vec![self.remove_background(request.source()?).await?],
                &self.background_model,
            ),
            capability => {
                return Err(MediaError::CapabilityUnsupported {
                    provider: ProviderId::HuggingFace.to_string(),
                    capability,
                })
            }
        };

        let (content_type, extension) = sniff_image(&images[0]).unwrap_or(("image/png", "png"));
        let message = format!(
            "{} produced {} image(s) via {}",
            request.capability,
            images.len(),
            model
        );
        Ok(GenerationResult::new(ProviderId::HuggingFace, images)
            .with_content_type(content_type)
            .with_extension(extension)
            .with_message(message))
    }
}

pub fn text_to_image_payload(request: &GenerationRequest, index: u32) -> Result<Value> {
    let options = &request.options;
    let mut parameters = serde_json::Map::new();

    if let Some(scale) = options.get_f64("guidance_scale") {
        parameters.insert("guidance_scale".into(), json!(scale));
    }
    if let Some(steps) = options.get_u32("num_inference_steps") {
        parameters.insert("num_inference_steps".into(), json!(steps));
    }
    for key in ["width", "height"] {
        if let Some(value) = options.get_u32(key) {
            parameters.insert(key.into(), json!(value));
        }
    }
    if let Some(negative) = options.get_str("negative_prompt") {
        parameters.insert("negative_prompt".into(), json!(negative));
    }
    if let Some(seed) = options.get_u64("seed") {
        parameters.insert("seed".into(), json!(seed.wrapping_add(u64::from(index))));
    }

    Ok(json!({
        "inputs": request.prompt()?,
        "parameters": parameters,
        "options": { "use_cache": false, "wait_for_model": true }
    }))
}

/// Raw image bytes, or the JSON forms the inference API uses instead: a
/// segmentation list whose first `mask` is base64, or an `error` object.
pub fn decode_image_response(body: Vec<u8>) -> Result<Vec<u8>> {
    if sniff_image(&body).is_some() {
        return Ok(body);
    }

    let value: Value = serde_json::from_slice(&body).map_err(|_| {
        MediaError::InvalidProviderResponse(format!(
            "expected image bytes, got {} unrecognized bytes",
            body.len()
        ))
    })?;

    if let Some(error) = value.get("error") {
        return Err(MediaError::InvalidProviderResponse(match error {
            Value::String(message) => message.clone(),
            other => other.to_string(),
        }));
    }

    let mask = value
        .as_array()
        .and_then(|segments| segments.first())
        .and_then(|segment| segment.get("mask"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            MediaError::InvalidProviderResponse("response contains no image or mask".into())
        })?;
    let data = mask.split_once(";base64,").map(|(_, d)| d).unwrap_or(mask);
    Ok(general_purpose::STANDARD.decode(data.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GenerationOptions;

    #[test]
    fn test_payload_maps_options() {
        let request = GenerationRequest::new(Capability::Generate)
            .with_prompt("an astronaut riding a horse")
            .with_options(
                GenerationOptions::new()
                    .with("guidance_scale", 3.5)
                    .with("width", 768)
                    .with("seed", 10),
            );
        let payload = text_to_image_payload(&request, 2).unwrap();
        assert_eq!(payload["inputs"], "an astronaut riding a horse");
        assert_eq!(payload["parameters"]["guidance_scale"], 3.5);
        assert_eq!(payload["parameters"]["width"], 768);
        assert!(payload["parameters"].get("height").is_none());
        assert_eq!(payload["parameters"]["seed"], 12);
        assert_eq!(payload["options"]["use_cache"], false);
    }

    #[test]
    fn test_payload_seed_wraps_at_max() {
        let request = GenerationRequest::new(Capability::Generate)
            .with_prompt("a lighthouse")
            .with_options(
                GenerationOptions::new()
                    .with("seed", u64::MAX)
                    .with("num_outputs", 2),
            );
        let first = text_to_image_payload(&request, 0).unwrap();
        let second = text_to_image_payload(&request, 1).unwrap();
        assert_eq!(first["parameters"]["seed"], u64::MAX);
        assert_eq!(second["parameters"]["seed"], 0);
    }

    #[test]
    fn test_payload_requires_prompt() {
        let request = GenerationRequest::new(Capability::Generate);
        assert!(matches!(
            text_to_image_payload(&request, 0),
            Err(MediaError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_decode_raw_image() {
        let png = vec![0x89, b'P', b'N', b'G', 1, 2, 3];
        assert_eq!(decode_image_response(png.clone()).unwrap(), png);
    }

    #[test]
    fn test_decode_segmentation_mask() {
        let mask = vec![0x89, b'P', b'N', b'G', 9, 9];
        let body = serde_json::to_vec(&json!([
            {"label": "foreground", "score": 0.99, "mask": general_purpose::STANDARD.encode(&mask)}
        ]))
        .unwrap();
        assert_eq!(decode_image_response(body).unwrap(), mask);
    }

    #[test]
    fn test_decode_error_body() {
        let body = br#"{"error":"Model briaai/RMBG-1.4 is currently loading"}"#.to_vec();
        match decode_image_response(body) {
            Err(MediaError::InvalidProviderResponse(message)) => {
                assert!(message.contains("currently loading"))
            }
            other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
        }

        assert!(matches!(
            decode_image_response(b"garbage".to_vec()),
            Err(MediaError::InvalidProviderResponse(_))
        ));
    }
}
