pub mod gemini;
pub mod huggingface;
pub mod replicate;
pub mod version_cache;

use crate::{
    config::{Config, HUGGING_FACE_TOKENS},
    error::{MediaError, Result},
    models::{Capability, GenerationRequest, GenerationResult},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use gemini::GeminiClient;
pub use huggingface::HuggingFaceClient;
pub use replicate::ReplicateClient;
pub use version_cache::VersionCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Gemini,
    Replicate,
    HuggingFace,
}

impl ProviderId {
    /// Default first, then the fixed fallback priority.
    pub const ALL: [ProviderId; 3] = [
        ProviderId::Gemini,
        ProviderId::Replicate,
        ProviderId::HuggingFace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "gemini",
            ProviderId::Replicate => "replicate",
            ProviderId::HuggingFace => "huggingface",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "Google Gemini",
            ProviderId::Replicate => "Replicate",
            ProviderId::HuggingFace => "Hugging Face",
        }
    }

    pub fn credential_vars(&self) -> &'static [&'static str] {
        match self {
            ProviderId::Gemini => &[crate::config::GEMINI_API_KEY],
            ProviderId::Replicate => &[crate::config::REPLICATE_API_TOKEN],
            ProviderId::HuggingFace => HUGGING_FACE_TOKENS,
        }
    }

    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            ProviderId::Gemini => &[Capability::Generate, Capability::Edit],
            ProviderId::Replicate => &[
                Capability::Generate,
                Capability::Edit,
                Capability::RemoveBackground,
                Capability::GenerateMesh,
                Capability::GenerateSound,
            ],
            ProviderId::HuggingFace => &[Capability::Generate, Capability::RemoveBackground],
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "gemini" | "google" => Ok(ProviderId::Gemini),
            "replicate" => Ok(ProviderId::Replicate),
            "huggingface" | "hf" => Ok(ProviderId::HuggingFace),
            _ => Err(MediaError::invalid_argument(
                "provider",
                format!("unknown provider '{}'", s),
            )),
        }
    }
}

#[async_trait]
pub trait MediaProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Runs one request to completion and returns every produced artifact.
    async fn execute(&self, request: &GenerationRequest) -> Result<GenerationResult>;
}

/// Credentialed provider clients, keyed by id.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderId, Arc<dyn MediaProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a client for every provider whose credential is configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        if let Some(client) = GeminiClient::from_config(&config.gemini) {
            registry.register(Arc::new(client));
        }
        if let Some(client) = ReplicateClient::from_config(&config.replicate) {
            registry.register(Arc::new(client));
        }
        if let Some(client) = HuggingFaceClient::from_config(&config.huggingface) {
            registry.register(Arc::new(client));
        }
        if registry.providers.is_empty() {
            return Err(MediaError::MissingCredential(
                ProviderId::ALL
                    .iter()
                    .flat_map(|p| p.credential_vars().iter().copied())
                    .collect::<Vec<_>>()
                    .join(", "),
            ));
        }
        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn MediaProvider>) {
        log::debug!("Registered provider: {}", provider.id());
        self.providers.insert(provider.id(), provider);
    }

    pub fn get(&self, id: ProviderId) -> Option<&Arc<dyn MediaProvider>> {
        self.providers.get(&id)
    }

    /// Registered providers in priority order.
    pub fn available(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .iter()
            .copied()
            .filter(|id| self.providers.contains_key(id))
            .collect()
    }
}

/// Content type and extension from an image's magic bytes.
pub fn sniff_image(bytes: &[u8]) -> Option<(&'static str, &'static str)> {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => Some(("image/png", "png")),
        [0xFF, 0xD8, 0xFF, ..] => Some(("image/jpeg", "jpg")),
        [b'G', b'I', b'F', b'8', ..] => Some(("image/gif", "gif")),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => {
            Some(("image/webp", "webp"))
        }
        _ => None,
    }
}

/// Turns a non-2xx response into [`MediaError::ProviderRequest`].
pub(crate) async fn ensure_success(
    provider: ProviderId,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    log::error!("{} API error: status {}, body: {}", provider, status, body);
    Err(MediaError::ProviderRequest {
        provider,
        status: status.as_u16(),
        body,
    })
}
