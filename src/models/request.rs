use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{MediaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Generate,
    Edit,
    RemoveBackground,
    GenerateMesh,
    GenerateSound,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Generate => "generate",
            Capability::Edit => "edit",
            Capability::RemoveBackground => "remove_background",
            Capability::GenerateMesh => "generate_mesh",
            Capability::GenerateSound => "generate_sound",
        }
    }

    pub fn requires_prompt(&self) -> bool {
        !matches!(self, Capability::RemoveBackground)
    }

    pub fn requires_source(&self) -> bool {
        matches!(self, Capability::Edit | Capability::RemoveBackground)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An input file read from disk, with its MIME type inferred from the extension.
#[derive(Debug, Clone)]
pub struct SourceAsset {
    pub path: PathBuf,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl SourceAsset {
    pub fn new(path: impl Into<PathBuf>, data: Vec<u8>) -> Self {
        let path = path.into();
        let mime_type = mime_type_for_path(&path).to_string();
        Self {
            path,
            mime_type,
            data,
        }
    }

    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let is_file = tokio::fs::metadata(&path)
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(MediaError::SourceNotFound(path.display().to_string()));
        }
        let data = tokio::fs::read(&path).await?;
        Ok(Self::new(path, data))
    }

    pub fn to_base64(&self) -> String {
        use base64::{engine::general_purpose, Engine as _};
        general_purpose::STANDARD.encode(&self.data)
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

pub fn mime_type_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "obj" => "model/obj",
        "glb" => "model/gltf-binary",
        _ => "application/octet-stream",
    }
}

/// Provider-specific knobs, kept as the raw JSON arguments of the tool call.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions(Map<String, Value>);

impl GenerationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Accepts numbers and numeric strings, since MCP clients send either.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get_f64(key)
            .filter(|v| *v >= 0.0 && v.fract() == 0.0 && *v <= u32::MAX as f64)
            .map(|v| v as u32)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_f64(key)
            .filter(|v| *v >= 0.0 && v.fract() == 0.0)
            .map(|v| v as u64)
    }

    pub fn candidate_count(&self) -> u32 {
        self.get_u32("num_outputs")
            .or_else(|| self.get_u32("candidate_count"))
            .unwrap_or(1)
            .clamp(1, 4)
    }
}

impl From<Map<String, Value>> for GenerationOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub capability: Capability,
    pub prompt: Option<String>,
    pub source: Option<SourceAsset>,
    pub options: GenerationOptions,
    pub output_path: Option<PathBuf>,
}

impl GenerationRequest {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            prompt: None,
            source: None,
            options: GenerationOptions::new(),
            output_path: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_source(mut self, source: SourceAsset) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn prompt(&self) -> Result<&str> {
        self.prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| MediaError::missing_argument("prompt"))
    }

    pub fn source(&self) -> Result<&SourceAsset> {
        self.source
            .as_ref()
            .ok_or_else(|| MediaError::missing_argument("image_path"))
    }
}
