//! Drives asynchronous "create job → poll status → fetch artifact" workflows.
//!
//! The loop in [`run_job`] is a thin shell around [`PollState::observe`], a pure
//! transition function, so the stop/timeout rules can be checked without a
//! network or a clock.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use crate::error::{MediaError, Result};
use crate::models::{ArtifactSelection, Job, JobStatus, OutputRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    pub const fn image() -> Self {
        Self::new(Duration::from_secs(1), 120)
    }

    pub const fn sound() -> Self {
        Self::new(Duration::from_secs(2), 150)
    }

    pub const fn mesh() -> Self {
        Self::new(Duration::from_secs(5), 120)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Created,
    Polling { attempts: u32 },
    Succeeded,
    Failed(String),
    TimedOut { attempts: u32 },
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Succeeded | PollState::Failed(_) | PollState::TimedOut { .. }
        )
    }

    /// Next state after observing `job`. From `Created` the observation is the
    /// creation response; from `Polling { attempts }` it is status poll number
    /// `attempts + 1`. Terminal states never change.
    pub fn observe(&self, job: &Job, policy: &PollPolicy) -> PollState {
        let attempts = match self {
            PollState::Created => 0,
            PollState::Polling { attempts } => attempts + 1,
            terminal => return terminal.clone(),
        };

        match job.status {
            JobStatus::Succeeded => PollState::Succeeded,
            JobStatus::Failed => PollState::Failed(
                job.error
                    .clone()
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| format!("job {} failed without an error message", job.id)),
            ),
            JobStatus::Pending | JobStatus::Running if attempts >= policy.max_attempts => {
                PollState::TimedOut { attempts }
            }
            JobStatus::Pending | JobStatus::Running => PollState::Polling { attempts },
        }
    }
}

/// The two network calls a backend must provide after a job exists.
#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn fetch_status(&self, job: &Job) -> Result<Job>;

    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub url: String,
    pub data: Vec<u8>,
}

pub async fn run_job<B, F>(
    backend: &B,
    policy: &PollPolicy,
    selection: ArtifactSelection<'_>,
    create: F,
) -> Result<Vec<Artifact>>
where
    B: JobBackend + ?Sized,
    F: Future<Output = Result<Job>>,
{
    let started = Instant::now();
    let mut job = create.await?;
    log::info!("Created job {} (status: {:?})", job.id, job.status);

    let mut state = PollState::Created.observe(&job, policy);
    loop {
        match state {
            PollState::Created | PollState::Polling { .. } => {
                sleep(policy.interval).await;
                job = backend.fetch_status(&job).await?;
                state = state.observe(&job, policy);
                log::debug!("Job {} status: {:?} -> {:?}", job.id, job.status, state);
            }
            PollState::Succeeded => break,
            PollState::Failed(message) => {
                log::error!("Job {} failed: {}", job.id, message);
                return Err(MediaError::JobFailed(message));
            }
            PollState::TimedOut { attempts } => {
                let elapsed_seconds = started.elapsed().as_secs();
                log::warn!(
                    "Job {} still {:?} after {} polls ({}s); abandoning",
                    job.id,
                    job.status,
                    attempts,
                    elapsed_seconds
                );
                return Err(MediaError::JobTimeout {
                    attempts,
                    elapsed_seconds,
                });
            }
        }
    }

    let output = job.output.as_ref().ok_or_else(|| {
        MediaError::InvalidProviderResponse(format!("job {} succeeded without output", job.id))
    })?;
    let urls = OutputRef::classify(output)?.artifact_urls(selection)?;

    let mut artifacts = Vec::with_capacity(urls.len());
    for url in urls {
        log::info!("Downloading artifact: {}", url);
        let data = backend.fetch_artifact(&url).await?;
        artifacts.push(Artifact { url, data });
    }
    log::info!(
        "Job {} finished in {:.1}s with {} artifact(s)",
        job.id,
        started.elapsed().as_secs_f64(),
        artifacts.len()
    );
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MESH_EXTENSIONS;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    const FAST: PollPolicy = PollPolicy::new(Duration::ZERO, 5);

    struct ScriptedBackend {
        statuses: Mutex<VecDeque<Job>>,
        status_calls: AtomicU32,
        artifact_calls: AtomicU32,
    }

    impl ScriptedBackend {
        fn new(statuses: Vec<Job>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                status_calls: AtomicU32::new(0),
                artifact_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl JobBackend for ScriptedBackend {
        async fn fetch_status(&self, job: &Job) -> Result<Job> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.statuses.lock().unwrap().pop_front();
            Ok(next.unwrap_or_else(|| job.clone()))
        }

        async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>> {
            self.artifact_calls.fetch_add(1, Ordering::SeqCst);
            Ok(url.as_bytes().to_vec())
        }
    }

    fn job(status: JobStatus) -> Job {
        Job::new("p-1", status, "https://api.test/v1/predictions/p-1")
    }

    #[test]
    fn test_observe_transitions() {
        let policy = PollPolicy::new(Duration::ZERO, 2);
        let created = PollState::Created;

        let polling = created.observe(&job(JobStatus::Pending), &policy);
        assert_eq!(polling, PollState::Polling { attempts: 0 });

        let polling = polling.observe(&job(JobStatus::Running), &policy);
        assert_eq!(polling, PollState::Polling { attempts: 1 });

        let timed_out = polling.observe(&job(JobStatus::Running), &policy);
        assert_eq!(timed_out, PollState::TimedOut { attempts: 2 });

        // terminal states are sticky
        assert_eq!(
            timed_out.observe(&job(JobStatus::Succeeded), &policy),
            timed_out
        );
    }

    #[test]
    fn test_observe_terminal_on_creation() {
        let done = PollState::Created.observe(&job(JobStatus::Succeeded), &FAST);
        assert_eq!(done, PollState::Succeeded);

        let failed = PollState::Created.observe(
            &job(JobStatus::Failed).with_error("NSFW content detected"),
            &FAST,
        );
        assert_eq!(failed, PollState::Failed("NSFW content detected".into()));
    }

    #[tokio::test]
    async fn test_one_poll_per_tick_until_success() {
        let backend = ScriptedBackend::new(vec![
            job(JobStatus::Running),
            job(JobStatus::Succeeded).with_output(json!("https://cdn.test/out.png")),
            job(JobStatus::Succeeded).with_output(json!("https://cdn.test/never.png")),
        ]);

        let artifacts = run_job(&backend, &FAST, ArtifactSelection::All, async {
            Ok(job(JobStatus::Pending))
        })
        .await
        .unwrap();

        assert_eq!(backend.status_calls.load(Ordering::SeqCst), 2);
        assert_eq!(backend.artifact_calls.load(Ordering::SeqCst), 1);
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].url, "https://cdn.test/out.png");
        assert_eq!(artifacts[0].data, b"https://cdn.test/out.png".to_vec());
    }

    #[tokio::test]
    async fn test_failed_job_stops_without_fetch() {
        let backend = ScriptedBackend::new(vec![
            job(JobStatus::Failed).with_error("CUDA out of memory"),
            job(JobStatus::Succeeded).with_output(json!("https://cdn.test/out.png")),
        ]);

        let err = run_job(&backend, &FAST, ArtifactSelection::All, async {
            Ok(job(JobStatus::Pending))
        })
        .await
        .unwrap_err();

        match err {
            MediaError::JobFailed(message) => assert_eq!(message, "CUDA out of memory"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(backend.status_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.artifact_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_after_exact_cap() {
        let backend = ScriptedBackend::new(Vec::new());

        let err = run_job(&backend, &FAST, ArtifactSelection::All, async {
            Ok(job(JobStatus::Running))
        })
        .await
        .unwrap_err();

        match err {
            MediaError::JobTimeout { attempts, .. } => assert_eq!(attempts, FAST.max_attempts),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            backend.status_calls.load(Ordering::SeqCst),
            FAST.max_attempts
        );
        assert_eq!(backend.artifact_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_creation_error_propagates() {
        let backend = ScriptedBackend::new(Vec::new());
        let err = run_job(&backend, &FAST, ArtifactSelection::All, async {
            Err(MediaError::ProviderRequest {
                provider: crate::providers::ProviderId::Replicate,
                status: 401,
                body: "Unauthenticated".into(),
            })
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            MediaError::ProviderRequest { status: 401, .. }
        ));
        assert_eq!(backend.status_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mesh_selection_fetches_single_artifact() {
        let backend = ScriptedBackend::new(vec![job(JobStatus::Succeeded).with_output(json!([
            "https://cdn.test/0.gif",
            "https://cdn.test/mesh.obj",
        ]))]);

        let artifacts = run_job(
            &backend,
            &FAST,
            ArtifactSelection::Preferred(MESH_EXTENSIONS),
            async { Ok(job(JobStatus::Pending)) },
        )
        .await
        .unwrap();

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].url, "https://cdn.test/mesh.obj");
    }

    #[tokio::test]
    async fn test_succeeded_without_output_is_invalid() {
        let backend = ScriptedBackend::new(vec![job(JobStatus::Succeeded)]);
        let err = run_job(&backend, &FAST, ArtifactSelection::All, async {
            Ok(job(JobStatus::Pending))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, MediaError::InvalidProviderResponse(_)));
    }
}
