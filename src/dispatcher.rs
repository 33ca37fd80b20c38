//! Maps MCP tool calls onto provider requests and writes the results to disk.

use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

use crate::{
    config::Config,
    error::{MediaError, Result},
    logger,
    models::{
        Capability, GenerationOptions, GenerationRequest, GenerationResult, SourceAsset,
        ToolEnvelope,
    },
    providers::{replicate::SoundKind, ProviderId, ProviderRegistry},
    selector::{ProviderSelector, RoutePlan},
};

/// Argument keys consumed by the dispatcher; everything else is passed to the
/// provider as an option.
const RESERVED_ARGS: &[&str] = &[
    "prompt",
    "image_path",
    "source_path",
    "output_path",
    "provider",
];

pub struct ToolDispatcher {
    registry: ProviderRegistry,
    selector: ProviderSelector,
    output_dir: PathBuf,
}

impl ToolDispatcher {
    pub fn new(
        registry: ProviderRegistry,
        selector: ProviderSelector,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            selector,
            output_dir: output_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = ProviderRegistry::from_config(config)?;
        let selector = ProviderSelector::new(
            config.default_provider,
            config.provider_override,
            registry.available(),
        );
        Ok(Self::new(registry, selector, config.output_dir.clone()))
    }

    pub fn available_providers(&self) -> Vec<ProviderId> {
        self.registry.available()
    }

    pub async fn invoke(&self, tool_name: &str, args: &Value) -> Result<ToolEnvelope> {
        let capability = capability_for_tool(tool_name)?;
        let _timer = logger::timer(&format!("tool {}", tool_name));

        let args = match args {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => {
                return Err(MediaError::invalid_argument(
                    "arguments",
                    "expected a JSON object",
                ))
            }
        };

        let request = build_request(capability, &args).await?;
        let requested = match string_arg(&args, "provider")? {
            Some(name) => Some(name.parse::<ProviderId>()?),
            None => None,
        };

        let plan = self.selector.resolve(capability, requested)?;
        log::info!(
            "{} via {} (fallbacks: {:?})",
            tool_name,
            plan.primary,
            plan.fallbacks
        );

        let (result, fallback_errors) = self.run_plan(&plan, &request).await?;
        if result.outputs.is_empty() {
            return Err(MediaError::InvalidProviderResponse(format!(
                "{} returned no output",
                result.provider
            )));
        }

        let base = match &request.output_path {
            Some(path) => path.clone(),
            None => self.default_output_path(&request, &result.extension)?,
        };
        let paths = write_outputs(&base, &result.outputs).await?;
        let paths: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();

        let mut message = format!(
            "{} created {} file(s) with {}: {}",
            tool_name,
            paths.len(),
            result.provider.display_name(),
            paths.join(", ")
        );
        if !result.message.is_empty() {
            message.push_str(&format!(" ({})", result.message));
        }
        log::info!("✅ {}", message);

        Ok(ToolEnvelope {
            success: true,
            provider: result.provider,
            paths,
            message,
            fallback_errors,
        })
    }

    /// Tries each provider of the plan in turn. A plan without fallbacks
    /// surfaces the provider's error unchanged.
    async fn run_plan(
        &self,
        plan: &RoutePlan,
        request: &GenerationRequest,
    ) -> Result<(GenerationResult, Vec<String>)> {
        let mut failures = Vec::new();

        for provider_id in plan.providers() {
            let provider = self.registry.get(provider_id).ok_or_else(|| {
                MediaError::MissingCredential(provider_id.credential_vars().join(" / "))
            })?;

            match provider.execute(request).await {
                Ok(result) => return Ok((result, failures)),
                Err(err) if err.is_caller_error() || plan.fallbacks.is_empty() => return Err(err),
                Err(err) => {
                    log::warn!("{} failed for {}: {}", provider_id, request.capability, err);
                    failures.push(format!("{}: {}", provider_id, err));
                }
            }
        }

        Err(MediaError::AllProvidersFailed(failures))
    }

    fn default_output_path(&self, request: &GenerationRequest, extension: &str) -> Result<PathBuf> {
        let timestamp = chrono::Utc::now().timestamp();
        let name = match request.capability {
            Capability::Generate => format!("output.{}", extension),
            Capability::Edit => format!("output_edited.{}", extension),
            Capability::RemoveBackground => format!("output_no_bg.{}", extension),
            Capability::GenerateMesh => format!("output_mesh_{}.{}", timestamp, extension),
            Capability::GenerateSound => format!(
                "output_{}_{}.wav",
                SoundKind::from_options(request)?.as_str(),
                timestamp
            ),
        };
        Ok(self.output_dir.join(name))
    }
}

pub fn capability_for_tool(name: &str) -> Result<Capability> {
    match name {
        "generate_image" => Ok(Capability::Generate),
        "edit_image" => Ok(Capability::Edit),
        "remove_background" => Ok(Capability::RemoveBackground),
        "generate_mesh" => Ok(Capability::GenerateMesh),
        "generate_sound" => Ok(Capability::GenerateSound),
        other => Err(MediaError::invalid_argument(
            "name",
            format!("unknown tool '{}'", other),
        )),
    }
}

fn string_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(MediaError::invalid_argument(key, "expected a string")),
    }
}

/// Validates the arguments and loads the source file, in that order, so a bad
/// call never reaches the network.
async fn build_request(
    capability: Capability,
    args: &Map<String, Value>,
) -> Result<GenerationRequest> {
    let mut request = GenerationRequest::new(capability);

    match string_arg(args, "prompt")? {
        Some(prompt) => request = request.with_prompt(prompt),
        None if capability.requires_prompt() => return Err(MediaError::missing_argument("prompt")),
        None => {}
    }

    let source_path = match string_arg(args, "image_path")? {
        Some(path) => Some(path),
        None => string_arg(args, "source_path")?,
    };
    match source_path {
        Some(path) => request = request.with_source(SourceAsset::load(path).await?),
        None if capability.requires_source() => {
            return Err(MediaError::missing_argument("image_path"))
        }
        None => {}
    }

    if let Some(path) = string_arg(args, "output_path")? {
        request = request.with_output_path(path);
    }

    let options: Map<String, Value> = args
        .iter()
        .filter(|(key, _)| !RESERVED_ARGS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Ok(request.with_options(GenerationOptions::from(options)))
}

/// `base` for the first buffer, then `<stem>_<n>.<ext>` for n = 2, 3, ...
pub fn fan_out_paths(base: &Path, count: usize) -> Vec<PathBuf> {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let extension = base.extension().map(|e| e.to_string_lossy().into_owned());

    (0..count)
        .map(|index| {
            if index == 0 {
                return base.to_path_buf();
            }
            let name = match &extension {
                Some(ext) => format!("{}_{}.{}", stem, index + 1, ext),
                None => format!("{}_{}", stem, index + 1),
            };
            base.with_file_name(name)
        })
        .collect()
}

pub async fn write_outputs(base: &Path, outputs: &[Vec<u8>]) -> Result<Vec<PathBuf>> {
    let paths = fan_out_paths(base, outputs.len());
    for (path, data) in paths.iter().zip(outputs) {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        log::debug!("Wrote {} bytes to {}", data.len(), path.display());
    }
    Ok(paths)
}

fn output_path_schema() -> Value {
    json!({
        "type": "string",
        "description": "Where to write the result. Extra candidates get _2, _3, ... suffixes"
    })
}

fn provider_schema() -> Value {
    json!({
        "type": "string",
        "enum": ["gemini", "replicate", "huggingface"],
        "description": "Override the provider for this call"
    })
}

/// MCP tool descriptors for `tools/list`.
pub fn tools() -> Vec<Value> {
    vec![
        json!({
            "name": "generate_image",
            "description": "Generate an image from a text prompt",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "prompt": {"type": "string", "description": "What to draw"},
                    "aspect_ratio": {
                        "type": "string",
                        "description": "For example 1:1, 16:9 or 9:16"
                    },
                    "num_outputs": {"type": "integer", "minimum": 1, "maximum": 4},
                    "negative_prompt": {"type": "string"},
                    "seed": {"type": "integer"},
                    "output_path": output_path_schema(),
                    "provider": provider_schema()
                },
                "required": ["prompt"]
            }
        }),
        json!({
            "name": "edit_image",
            "description": "Edit an existing image following a text instruction",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "prompt": {"type": "string", "description": "The edit to apply"},
                    "image_path": {"type": "string", "description": "Image to edit"},
                    "num_outputs": {"type": "integer", "minimum": 1, "maximum": 4},
                    "output_path": output_path_schema(),
                    "provider": provider_schema()
                },
                "required": ["prompt", "image_path"]
            }
        }),
        json!({
            "name": "remove_background",
            "description": "Remove the background from an image",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "image_path": {"type": "string", "description": "Image to process"},
                    "output_path": output_path_schema(),
                    "provider": provider_schema()
                },
                "required": ["image_path"]
            }
        }),
        json!({
            "name": "generate_mesh",
            "description": "Generate a 3D mesh from a text prompt",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "prompt": {"type": "string", "description": "Object to model"},
                    "guidance_scale": {"type": "number"},
                    "output_path": output_path_schema(),
                    "provider": provider_schema()
                },
                "required": ["prompt"]
            }
        }),
        json!({
            "name": "generate_sound",
            "description": "Generate music or a sound effect from a text prompt",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "prompt": {"type": "string", "description": "Sound to generate"},
                    "kind": {"type": "string", "enum": ["music", "effect"]},
                    "duration": {"type": "integer", "description": "Length in seconds"},
                    "output_path": output_path_schema(),
                    "provider": provider_schema()
                },
                "required": ["prompt"]
            }
        }),
    ]
}
