use std::env;
use std::path::PathBuf;

use crate::error::{MediaError, Result};
use crate::providers::ProviderId;

pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const REPLICATE_API_TOKEN: &str = "REPLICATE_API_TOKEN";
pub const HUGGING_FACE_TOKENS: &[&str] =
    &["HUGGING_FACE_TOKEN", "HF_TOKEN", "HUGGINGFACE_API_TOKEN"];

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct ReplicateConfig {
    pub api_token: Option<String>,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct HuggingFaceConfig {
    pub token: Option<String>,
    pub base_url: String,
    pub image_model: String,
    pub background_model: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub default_provider: ProviderId,
    pub provider_override: Option<ProviderId>,
    pub output_dir: PathBuf,
    pub gemini: GeminiConfig,
    pub replicate: ReplicateConfig,
    pub huggingface: HuggingFaceConfig,
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl Default for GeminiConfig {
    fn default() -> Self {
        GeminiConfig {
            api_key: None,
            model: "gemini-2.5-flash-image".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

impl GeminiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        GeminiConfig {
            api_key: non_empty_var(GEMINI_API_KEY),
            model: non_empty_var("GEMINI_MODEL").unwrap_or(defaults.model),
            base_url: non_empty_var("GEMINI_API_BASE").unwrap_or(defaults.base_url),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        ReplicateConfig {
            api_token: None,
            base_url: "https://api.replicate.com/v1".to_string(),
        }
    }
}

impl ReplicateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        ReplicateConfig {
            api_token: non_empty_var(REPLICATE_API_TOKEN),
            base_url: non_empty_var("REPLICATE_API_BASE")
                .unwrap_or_else(|| Self::default().base_url),
        }
    }

    pub fn with_api_token(mut self, api_token: impl Into<String>) -> Self {
        self.api_token = Some(api_token.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        HuggingFaceConfig {
            token: None,
            base_url: "https://router.huggingface.co/hf-inference/models".to_string(),
            image_model: "black-forest-labs/FLUX.1-schnell".to_string(),
            background_model: "briaai/RMBG-1.4".to_string(),
        }
    }
}

impl HuggingFaceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        HuggingFaceConfig {
            token: HUGGING_FACE_TOKENS.iter().find_map(|name| non_empty_var(name)),
            base_url: non_empty_var("HUGGING_FACE_API_BASE").unwrap_or(defaults.base_url),
            image_model: non_empty_var("HUGGING_FACE_IMAGE_MODEL")
                .unwrap_or(defaults.image_model),
            background_model: non_empty_var("HUGGING_FACE_BACKGROUND_MODEL")
                .unwrap_or(defaults.background_model),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_provider: ProviderId::Gemini,
            provider_override: None,
            output_dir: PathBuf::from("."),
            gemini: GeminiConfig::default(),
            replicate: ReplicateConfig::default(),
            huggingface: HuggingFaceConfig::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every provider section plus `MEDIA_PROVIDER` and `OUTPUT_DIR`.
    /// An unparseable `MEDIA_PROVIDER` is logged and ignored.
    pub fn from_env() -> Self {
        let provider_override = non_empty_var("MEDIA_PROVIDER").and_then(|name| {
            match name.parse::<ProviderId>() {
                Ok(provider) => Some(provider),
                Err(e) => {
                    log::warn!("Ignoring MEDIA_PROVIDER: {}", e);
                    None
                }
            }
        });

        Config {
            default_provider: ProviderId::Gemini,
            provider_override,
            output_dir: non_empty_var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            gemini: GeminiConfig::from_env(),
            replicate: ReplicateConfig::from_env(),
            huggingface: HuggingFaceConfig::from_env(),
        }
    }

    pub fn with_gemini(mut self, config: GeminiConfig) -> Self {
        self.gemini = config;
        self
    }

    pub fn with_replicate(mut self, config: ReplicateConfig) -> Self {
        self.replicate = config;
        self
    }

    pub fn with_huggingface(mut self, config: HuggingFaceConfig) -> Self {
        self.huggingface = config;
        self
    }

    pub fn with_provider_override(mut self, provider: ProviderId) -> Self {
        self.provider_override = Some(provider);
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn has_credential(&self, provider: ProviderId) -> bool {
        match provider {
            ProviderId::Gemini => self.gemini.api_key.is_some(),
            ProviderId::Replicate => self.replicate.api_token.is_some(),
            ProviderId::HuggingFace => self.huggingface.token.is_some(),
        }
    }

    /// Providers whose credential is present, in priority order.
    pub fn available_providers(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .iter()
            .copied()
            .filter(|provider| self.has_credential(*provider))
            .collect()
    }

    /// Fails when no provider can be reached at all.
    pub fn validate(&self) -> Result<()> {
        if self.available_providers().is_empty() {
            let expected: Vec<&str> = ProviderId::ALL
                .iter()
                .flat_map(|provider| provider.credential_vars().iter().copied())
                .collect();
            return Err(MediaError::MissingCredential(expected.join(", ")));
        }

        if let Some(provider) = self.provider_override {
            if !self.has_credential(provider) {
                log::warn!(
                    "MEDIA_PROVIDER={} is set but {} is missing; falling back to default order",
                    provider,
                    provider.credential_vars().join(" / ")
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_without_credentials_fails() {
        let err = Config::new().validate().unwrap_err();
        match err {
            MediaError::MissingCredential(names) => {
                assert!(names.contains(GEMINI_API_KEY));
                assert!(names.contains(REPLICATE_API_TOKEN));
                assert!(names.contains("HUGGING_FACE_TOKEN"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_available_providers_in_priority_order() {
        let config = Config::new()
            .with_huggingface(HuggingFaceConfig::new().with_token("hf"))
            .with_gemini(GeminiConfig::new().with_api_key("g"));
        assert!(config.validate().is_ok());
        assert_eq!(
            config.available_providers(),
            vec![ProviderId::Gemini, ProviderId::HuggingFace]
        );
    }

    #[test]
    fn test_builder_defaults() {
        let config = Config::new()
            .with_replicate(ReplicateConfig::new().with_api_token("r8_x"))
            .with_provider_override(ProviderId::Replicate)
            .with_output_dir("/tmp/out");
        assert_eq!(config.default_provider, ProviderId::Gemini);
        assert_eq!(config.provider_override, Some(ProviderId::Replicate));
        assert_eq!(config.replicate.base_url, "https://api.replicate.com/v1");
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
    }
}
