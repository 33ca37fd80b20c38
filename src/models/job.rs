use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MediaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[serde(alias = "starting", alias = "queued")]
    Pending,
    #[serde(alias = "processing")]
    Running,
    #[serde(alias = "completed")]
    Succeeded,
    #[serde(alias = "canceled", alias = "cancelled", alias = "error")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// Backend-agnostic view of an asynchronous job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub poll_url: String,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(id: impl Into<String>, status: JobStatus, poll_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            poll_url: poll_url.into(),
            output: None,
            error: None,
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Shape of a succeeded job's `output` field.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputRef {
    Url(String),
    List(Vec<String>),
    Object(Map<String, Value>),
}

/// How artifact URLs are picked out of an [`OutputRef`].
#[derive(Debug, Clone, Copy)]
pub enum ArtifactSelection<'a> {
    /// Every URL, in order. Used for multi-candidate image output.
    All,
    /// A single URL, preferring one whose extension is in the list.
    Preferred(&'a [&'a str]),
}

impl OutputRef {
    pub fn classify(value: &Value) -> Result<OutputRef> {
        match value {
            Value::String(url) if !url.is_empty() => Ok(OutputRef::Url(url.clone())),
            Value::Array(items) => {
                let urls: Vec<String> = items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .filter(|url| !url.is_empty())
                    .map(String::from)
                    .collect();
                if urls.is_empty() {
                    Err(MediaError::InvalidProviderResponse(
                        "output list contains no URLs".into(),
                    ))
                } else {
                    Ok(OutputRef::List(urls))
                }
            }
            Value::Object(map) => Ok(OutputRef::Object(map.clone())),
            Value::Null => Err(MediaError::InvalidProviderResponse(
                "job succeeded without output".into(),
            )),
            other => Err(MediaError::InvalidProviderResponse(format!(
                "unrecognized output shape: {}",
                other
            ))),
        }
    }

    pub fn artifact_urls(&self, selection: ArtifactSelection<'_>) -> Result<Vec<String>> {
        match (self, selection) {
            (OutputRef::Url(url), _) => Ok(vec![url.clone()]),
            (OutputRef::List(urls), ArtifactSelection::All) => Ok(urls.clone()),
            (OutputRef::List(urls), ArtifactSelection::Preferred(extensions)) => {
                let picked = urls
                    .iter()
                    .find(|url| has_extension(url, extensions))
                    .or_else(|| urls.first())
                    .cloned();
                picked.map(|url| vec![url]).ok_or_else(|| {
                    MediaError::InvalidProviderResponse("output list is empty".into())
                })
            }
            (OutputRef::Object(map), selection) => {
                if let Some(mesh) = map.get("mesh").and_then(Value::as_str) {
                    return Ok(vec![mesh.to_string()]);
                }
                let extensions = match selection {
                    ArtifactSelection::Preferred(extensions) => extensions,
                    ArtifactSelection::All => IMAGE_EXTENSIONS,
                };
                map.values()
                    .filter_map(Value::as_str)
                    .find(|url| has_extension(url, extensions))
                    .map(|url| vec![url.to_string()])
                    .ok_or_else(|| {
                        MediaError::InvalidProviderResponse(format!(
                            "no recognized output field among [{}]",
                            map.keys().cloned().collect::<Vec<_>>().join(", ")
                        ))
                    })
            }
        }
    }
}

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];
pub const MESH_EXTENSIONS: &[&str] = &["obj", "glb", "gltf", "ply", "stl"];
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "ogg"];

/// Lowercase extension of a URL path, ignoring any query string.
pub fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file_name = path.rsplit('/').next()?;
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

fn has_extension(url: &str, extensions: &[&str]) -> bool {
    url_extension(url)
        .map(|ext| extensions.contains(&ext.as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_aliases() {
        let parse = |s: &str| serde_json::from_value::<JobStatus>(json!(s)).unwrap();
        assert_eq!(parse("starting"), JobStatus::Pending);
        assert_eq!(parse("processing"), JobStatus::Running);
        assert_eq!(parse("succeeded"), JobStatus::Succeeded);
        assert_eq!(parse("canceled"), JobStatus::Failed);
        assert!(parse("failed").is_terminal());
        assert!(!parse("running").is_terminal());
    }

    #[test]
    fn test_classify_shapes() {
        assert_eq!(
            OutputRef::classify(&json!("https://x/a.png")).unwrap(),
            OutputRef::Url("https://x/a.png".into())
        );
        assert!(matches!(
            OutputRef::classify(&json!(["https://x/a.png", "https://x/b.png"])).unwrap(),
            OutputRef::List(urls) if urls.len() == 2
        ));
        assert!(matches!(
            OutputRef::classify(&json!({"mesh": "https://x/m.glb"})).unwrap(),
            OutputRef::Object(_)
        ));
        assert!(OutputRef::classify(&Value::Null).is_err());
        assert!(OutputRef::classify(&json!([])).is_err());
        assert!(OutputRef::classify(&json!(42)).is_err());
    }

    #[test]
    fn test_preferred_extension_beats_first_element() {
        let output = OutputRef::classify(&json!([
            "https://replicate.delivery/out/0.gif",
            "https://replicate.delivery/out/1.gif",
            "https://replicate.delivery/out/mesh.obj",
        ]))
        .unwrap();
        let urls = output
            .artifact_urls(ArtifactSelection::Preferred(MESH_EXTENSIONS))
            .unwrap();
        assert_eq!(urls, vec!["https://replicate.delivery/out/mesh.obj"]);
    }

    #[test]
    fn test_preferred_falls_back_to_first_element() {
        let output = OutputRef::List(vec!["https://x/0.gif".into(), "https://x/1.gif".into()]);
        let urls = output
            .artifact_urls(ArtifactSelection::Preferred(MESH_EXTENSIONS))
            .unwrap();
        assert_eq!(urls, vec!["https://x/0.gif"]);
    }

    #[test]
    fn test_all_keeps_order() {
        let output = OutputRef::List(vec!["https://x/0.png".into(), "https://x/1.png".into()]);
        assert_eq!(
            output.artifact_urls(ArtifactSelection::All).unwrap(),
            vec!["https://x/0.png", "https://x/1.png"]
        );
    }

    #[test]
    fn test_object_mesh_field_then_extension_scan() {
        let with_mesh = OutputRef::classify(&json!({
            "mesh": "https://x/model.glb",
            "video": "https://x/preview.mp4"
        }))
        .unwrap();
        assert_eq!(
            with_mesh
                .artifact_urls(ArtifactSelection::Preferred(MESH_EXTENSIONS))
                .unwrap(),
            vec!["https://x/model.glb"]
        );

        let scanned = OutputRef::classify(&json!({
            "preview": "https://x/preview.mp4",
            "model_file": "https://x/model.ply"
        }))
        .unwrap();
        assert_eq!(
            scanned
                .artifact_urls(ArtifactSelection::Preferred(MESH_EXTENSIONS))
                .unwrap(),
            vec!["https://x/model.ply"]
        );

        let unknown = OutputRef::classify(&json!({"preview": "https://x/p.mp4"})).unwrap();
        assert!(matches!(
            unknown.artifact_urls(ArtifactSelection::Preferred(MESH_EXTENSIONS)),
            Err(MediaError::InvalidProviderResponse(_))
        ));
    }

    #[test]
    fn test_url_extension_ignores_query() {
        assert_eq!(
            url_extension("https://x/out.WAV?sig=abc").as_deref(),
            Some("wav")
        );
        assert_eq!(url_extension("https://x/files/abc"), None);
    }
}
