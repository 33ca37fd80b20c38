use thiserror::Error;

use crate::models::Capability;
use crate::providers::ProviderId;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Missing credential: set at least one of {0}")]
    MissingCredential(String),

    #[error("No provider credentials available for {0}")]
    NoCredentialsAvailable(Capability),

    #[error("Provider {provider} does not support {capability}")]
    CapabilityUnsupported {
        provider: String,
        capability: Capability,
    },

    #[error("Invalid argument '{field}': {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("Source file not found: {0}")]
    SourceNotFound(String),

    #[error("{provider} request failed with status {status}: {body}")]
    ProviderRequest {
        provider: ProviderId,
        status: u16,
        body: String,
    },

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Job timed out after {attempts} polls ({elapsed_seconds}s)")]
    JobTimeout { attempts: u32, elapsed_seconds: u64 },

    #[error("Invalid provider response: {0}")]
    InvalidProviderResponse(String),

    #[error("All providers failed: {}", .0.join("; "))]
    AllProvidersFailed(Vec<String>),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] base64::DecodeError),
}

impl MediaError {
    pub fn missing_argument(field: &str) -> Self {
        MediaError::InvalidArgument {
            field: field.to_string(),
            reason: "required argument is missing".to_string(),
        }
    }

    pub fn invalid_argument(field: &str, reason: impl Into<String>) -> Self {
        MediaError::InvalidArgument {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Caller input errors are reported as such and never trigger a provider fallback.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            MediaError::InvalidArgument { .. } | MediaError::SourceNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
