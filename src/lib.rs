//! Generative-media tools served over MCP.
//!
//! Image generation and editing, background removal, 3D mesh and sound
//! generation, proxied to Google Gemini, Replicate and Hugging Face.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logger;
pub mod models;
pub mod poller;
pub mod providers;
pub mod selector;
pub mod server;

pub use config::Config;
pub use dispatcher::ToolDispatcher;
pub use error::{MediaError, Result};
pub use models::*;
pub use poller::{run_job, JobBackend, PollPolicy, PollState};
pub use providers::{
    GeminiClient, HuggingFaceClient, MediaProvider, ProviderId, ProviderRegistry, ReplicateClient,
};
pub use selector::{ProviderSelector, RoutePlan};
pub use server::McpServer;
