use serde::{Deserialize, Serialize};

use crate::providers::ProviderId;

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub outputs: Vec<Vec<u8>>,
    pub content_type: String,
    /// Extension (without dot) used when the caller gave no output path.
    pub extension: String,
    pub provider: ProviderId,
    pub message: String,
}

impl GenerationResult {
    pub fn new(provider: ProviderId, outputs: Vec<Vec<u8>>) -> Self {
        Self {
            outputs,
            content_type: "image/png".to_string(),
            extension: "png".to_string(),
            provider,
            message: String::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// JSON body returned to the MCP client for a successful tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEnvelope {
    pub success: bool,
    pub provider: ProviderId,
    pub paths: Vec<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_errors: Vec<String>,
}
