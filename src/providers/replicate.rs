use std::path::Path;
use std::sync::Arc;

use crate::{
    config::ReplicateConfig,
    error::{MediaError, Result},
    models::{
        mime_type_for_path, url_extension, ArtifactSelection, Capability, GenerationRequest,
        GenerationResult, Job, JobStatus, AUDIO_EXTENSIONS, IMAGE_EXTENSIONS, MESH_EXTENSIONS,
    },
    poller::{run_job, Artifact, JobBackend, PollPolicy},
    providers::{ensure_success, sniff_image, MediaProvider, ProviderId, VersionCache},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

/// A community model pinned to a version that is known to work, used when
/// the latest version cannot be looked up.
#[derive(Debug, Clone, Copy)]
pub struct ReplicateModel {
    pub name: &'static str,
    pub fallback_version: &'static str,
    pub policy: PollPolicy,
}

pub const SDXL: ReplicateModel = ReplicateModel {
    name: "stability-ai/sdxl",
    fallback_version: "39ed52f2a78e934b3ba6e2a89f5b1c712de7dfea535525255b1aa35c5565e08b",
    policy: PollPolicy::image(),
};

pub const INSTRUCT_PIX2PIX: ReplicateModel = ReplicateModel {
    name: "timothybrooks/instruct-pix2pix",
    fallback_version: "30c1d0b916a6f8efce20493f5d61ee27491ab2a60437c13c588468b9810ec23f",
    policy: PollPolicy::image(),
};

pub const REMBG: ReplicateModel = ReplicateModel {
    name: "cjwbw/rembg",
    fallback_version: "fb8af171cfa1616ddcf1242c093f9c46bcada5ad4cf6f2fbe8b81b330ec5c003",
    policy: PollPolicy::image(),
};

pub const SHAP_E: ReplicateModel = ReplicateModel {
    name: "cjwbw/shap-e",
    fallback_version: "5957069d5c509126a73c7cb68abcddbb985aeefa4d318e7c63ec1352ce6da68c",
    policy: PollPolicy::mesh(),
};

pub const MUSICGEN: ReplicateModel = ReplicateModel {
    name: "meta/musicgen",
    fallback_version: "671ac645ce5e552cc63a54a2bbff63fcf798043055d2dac5fc9e36a837eedcfb",
    policy: PollPolicy::sound(),
};

pub const AUDIO_LDM: ReplicateModel = ReplicateModel {
    name: "haoheliu/audio-ldm",
    fallback_version: "b61392adecdd660326fc9cfc5398182437dbe5e97b5decfb36e1a36de68b5b95",
    policy: PollPolicy::sound(),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundKind {
    Music,
    Effect,
}

impl SoundKind {
    pub fn from_options(request: &GenerationRequest) -> Result<Self> {
        let raw = request
            .options
            .get_str("kind")
            .or_else(|| request.options.get_str("sound_type"));
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            None | Some("music") => Ok(SoundKind::Music),
            Some("effect") | Some("sfx") | Some("sound_effect") => Ok(SoundKind::Effect),
            Some(other) => Err(MediaError::invalid_argument(
                "kind",
                format!("expected 'music' or 'effect', got '{}'", other),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SoundKind::Music => "music",
            SoundKind::Effect => "effect",
        }
    }
}

#[derive(Deserialize)]
struct Prediction {
    id: String,
    status: JobStatus,
    urls: Option<PredictionUrls>,
    output: Option<Value>,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

#[derive(Deserialize)]
struct ModelInfo {
    latest_version: Option<ModelVersion>,
}

#[derive(Deserialize)]
struct ModelVersion {
    id: String,
}

impl Prediction {
    fn into_job(self, default_poll_url: String) -> Job {
        let poll_url = self
            .urls
            .and_then(|urls| urls.get)
            .unwrap_or(default_poll_url);
        let mut job = Job::new(self.id, self.status, poll_url);
        job.output = self.output.filter(|output| !output.is_null());
        job.error = self.error.and_then(|error| match error {
            Value::Null => None,
            Value::String(message) => Some(message),
            other => Some(other.to_string()),
        });
        job
    }
}

#[derive(Clone)]
pub struct ReplicateClient {
    client: Client,
    api_token: String,
    base_url: String,
    versions: Arc<VersionCache>,
}

impl ReplicateClient {
    pub fn new(api_token: impl Into<String>, config: &ReplicateConfig) -> Self {
        Self {
            client: Client::new(),
            api_token: api_token.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            versions: Arc::new(VersionCache::new()),
        }
    }

    pub fn from_config(config: &ReplicateConfig) -> Option<Self> {
        config
            .api_token
            .as_ref()
            .map(|token| Self::new(token.clone(), config))
    }

    pub fn version_cache(&self) -> &VersionCache {
        &self.versions
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.api_token)
    }

    async fn lookup_version(&self, model: &str) -> Result<String> {
        let response = self
            .auth(self.client.get(format!("{}/models/{}", self.base_url, model)))
            .send()
            .await?;
        let response = ensure_success(ProviderId::Replicate, response).await?;
        let info: ModelInfo = response.json().await?;
        info.latest_version.map(|v| v.id).ok_or_else(|| {
            MediaError::InvalidProviderResponse(format!("model {} has no latest_version", model))
        })
    }

    /// Latest version of `model`. A successful lookup is cached for the life
    /// of the client; a failed one falls back to the pinned version and is
    /// retried on the next call.
    pub async fn resolve_version(&self, model: &ReplicateModel) -> String {
        if let Some(version) = self.versions.get(model.name) {
            return version;
        }
        match self.lookup_version(model.name).await {
            Ok(version) => {
                log::info!("Resolved {} to version {}", model.name, version);
                self.versions.insert(model.name, &version);
                version
            }
            Err(e) => {
                log::warn!(
                    "Version lookup for {} failed ({}); using pinned version",
                    model.name,
                    e
                );
                model.fallback_version.to_string()
            }
        }
    }

    async fn create_prediction(&self, version: &str, input: Value) -> Result<Job> {
        if let Some(fields) = input.as_object() {
            log::debug!(
                "Replicate prediction input fields: {:?}",
                fields.keys().collect::<Vec<_>>()
            );
        }
        let response = self
            .auth(self.client.post(format!("{}/predictions", self.base_url)))
            .json(&json!({ "version": version, "input": input }))
            .send()
            .await?;
        let response = ensure_success(ProviderId::Replicate, response).await?;
        let prediction: Prediction = response.json().await?;
        let default_poll_url = format!("{}/predictions/{}", self.base_url, prediction.id);
        Ok(prediction.into_job(default_poll_url))
    }

    async fn predict(
        &self,
        model: &ReplicateModel,
        input: Value,
        selection: ArtifactSelection<'_>,
    ) -> Result<Vec<Artifact>> {
        let version = self.resolve_version(model).await;
        log::info!("Running {} on Replicate", model.name);
        run_job(
            self,
            &model.policy,
            selection,
            self.create_prediction(&version, input),
        )
        .await
    }
}

#[async_trait]
impl JobBackend for ReplicateClient {
    async fn fetch_status(&self, job: &Job) -> Result<Job> {
        let response = self.auth(self.client.get(&job.poll_url)).send().await?;
        let response = ensure_success(ProviderId::Replicate, response).await?;
        let prediction: Prediction = response.json().await?;
        Ok(prediction.into_job(job.poll_url.clone()))
    }

    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>> {
        let mut builder = self.client.get(url);
        // Delivery CDN URLs are public; file URLs under the API need the token.
        if url.starts_with(&self.base_url) {
            builder = self.auth(builder);
        }
        let response = ensure_success(ProviderId::Replicate, builder.send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl MediaProvider for ReplicateClient {
    fn id(&self) -> ProviderId {
        ProviderId::Replicate
    }

    async fn execute(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let (model, selection, default_ext) = match request.capability {
            Capability::Generate => (SDXL, ArtifactSelection::All, "png"),
            Capability::Edit => (INSTRUCT_PIX2PIX, ArtifactSelection::All, "png"),
            Capability::RemoveBackground => (
                REMBG,
                ArtifactSelection::Preferred(IMAGE_EXTENSIONS),
                "png",
            ),
            Capability::GenerateMesh => (
                SHAP_E,
                ArtifactSelection::Preferred(MESH_EXTENSIONS),
                "obj",
            ),
            Capability::GenerateSound => match SoundKind::from_options(request)? {
                SoundKind::Music => (
                    MUSICGEN,
                    ArtifactSelection::Preferred(AUDIO_EXTENSIONS),
                    "wav",
                ),
                SoundKind::Effect => (
                    AUDIO_LDM,
                    ArtifactSelection::Preferred(AUDIO_EXTENSIONS),
                    "wav",
                ),
            },
        };

        let input = build_input(request)?;
        let artifacts = self.predict(&model, input, selection).await?;
        let extension = artifact_extension(&artifacts[0], default_ext);
        let content_type = sniff_image(&artifacts[0].data)
            .map(|(content_type, _)| content_type)
            .unwrap_or_else(|| mime_type_for_path(Path::new(&format!("output.{}", extension))));
        let message = format!(
            "{} produced {} file(s) via {}",
            request.capability,
            artifacts.len(),
            model.name
        );

        Ok(GenerationResult::new(
            ProviderId::Replicate,
            artifacts.into_iter().map(|a| a.data).collect(),
        )
        .with_content_type(content_type)
        .with_extension(extension)
        .with_message(message))
    }
}

fn artifact_extension(artifact: &Artifact, default_ext: &str) -> String {
    url_extension(&artifact.url)
        .or_else(|| sniff_image(&artifact.data).map(|(_, ext)| ext.to_string()))
        .unwrap_or_else(|| default_ext.to_string())
}

/// SDXL-friendly width/height for an aspect ratio like `16:9`, long side 1024
/// and both sides multiples of 64.
pub fn dimensions_for_aspect_ratio(ratio: &str) -> Option<(u32, u32)> {
    let (w, h) = ratio.split_once(':')?;
    let w: f64 = w.trim().parse().ok()?;
    let h: f64 = h.trim().parse().ok()?;
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    let scale = 1024.0 / w.max(h);
    let snap = |side: f64| (((side * scale) / 64.0).round().max(1.0) as u32) * 64;
    Some((snap(w), snap(h)))
}

/// Maps a request onto the input schema of the model chosen for its capability.
pub fn build_input(request: &GenerationRequest) -> Result<Value> {
    let options = &request.options;
    let mut input = serde_json::Map::new();

    match request.capability {
        Capability::Generate => {
            let (width, height) = options
                .get_str("aspect_ratio")
                .and_then(dimensions_for_aspect_ratio)
                .unwrap_or((1024, 1024));
            input.insert("prompt".into(), json!(request.prompt()?));
            input.insert("num_outputs".into(), json!(options.candidate_count()));
            input.insert("width".into(), json!(options.get_u32("width").unwrap_or(width)));
            input.insert("height".into(), json!(options.get_u32("height").unwrap_or(height)));
            input.insert(
                "guidance_scale".into(),
                json!(options.get_f64("guidance_scale").unwrap_or(7.5)),
            );
        }
        Capability::Edit => {
            input.insert("prompt".into(), json!(request.prompt()?));
            input.insert("image".into(), json!(request.source()?.to_data_uri()));
            input.insert("num_outputs".into(), json!(options.candidate_count()));
            input.insert(
                "guidance_scale".into(),
                json!(options.get_f64("guidance_scale").unwrap_or(7.5)),
            );
            input.insert(
                "image_guidance_scale".into(),
                json!(options.get_f64("image_guidance_scale").unwrap_or(1.5)),
            );
        }
        Capability::RemoveBackground => {
            input.insert("image".into(), json!(request.source()?.to_data_uri()));
        }
        Capability::GenerateMesh => {
            input.insert("prompt".into(), json!(request.prompt()?));
            if let Some(source) = &request.source {
                input.insert("image".into(), json!(source.to_data_uri()));
            }
            input.insert("save_mesh".into(), json!(true));
            input.insert("batch_size".into(), json!(1));
            input.insert(
                "guidance_scale".into(),
                json!(options.get_f64("guidance_scale").unwrap_or(15.0)),
            );
        }
        Capability::GenerateSound => match SoundKind::from_options(request)? {
            SoundKind::Music => {
                input.insert("prompt".into(), json!(request.prompt()?));
                input.insert(
                    "duration".into(),
                    json!(options.get_u32("duration").unwrap_or(8)),
                );
                input.insert("model_version".into(), json!("stereo-melody-large"));
                input.insert("output_format".into(), json!("wav"));
                input.insert("normalization_strategy".into(), json!("peak"));
            }
            SoundKind::Effect => {
                input.insert("text".into(), json!(request.prompt()?));
                // audio-ldm takes its duration as a string
                input.insert(
                    "duration".into(),
                    json!(format!("{:.1}", options.get_f64("duration").unwrap_or(5.0))),
                );
                input.insert(
                    "guidance_scale".into(),
                    json!(options.get_f64("guidance_scale").unwrap_or(2.5)),
                );
            }
        },
    }

    if let Some(negative) = options.get_str("negative_prompt") {
        if matches!(request.capability, Capability::Generate | Capability::Edit) {
            input.insert("negative_prompt".into(), json!(negative));
        }
    }
    if let Some(seed) = options.get_u64("seed") {
        input.insert("seed".into(), json!(seed));
    }

    Ok(Value::Object(input))
}
