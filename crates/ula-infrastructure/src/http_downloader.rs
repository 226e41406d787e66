//! Download subsystem: HTTP jobs running on tokio tasks.
//!
//! Each job gets a [`DownloadId`], streams its URL into a destination file and
//! announces itself on the completion channel when it ends, successful or not.
//! Jobs are recorded in `download_jobs.toml` so their outcome can still be
//! queried after a restart, and jobs cut short by a restart are started again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::storage::AtomicTomlFile;
use ula_core::download::DownloadId;
use ula_core::error::{Result, UlaError};

/// What the download subsystem knows about a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Pending,
    Succeeded,
    Failed(String),
    /// The id was never issued by this subsystem
    Unknown,
}

/// The seam between download book-keeping and the transport doing the work.
#[async_trait]
pub trait DownloadBackend: Send + Sync {
    async fn enqueue(&self, url: String, destination: PathBuf) -> Result<DownloadId>;

    async fn status(&self, id: DownloadId) -> DownloadStatus;

    async fn cancel(&self, ids: &[DownloadId]);

    /// Drops the records of finished jobs not listed in `keep`.
    async fn forget_finished(&self, keep: &[DownloadId]);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum JobState {
    Pending,
    Succeeded,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobRecord {
    id: u64,
    url: String,
    destination: PathBuf,
    state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobsDocument {
    next_id: u64,
    #[serde(default)]
    jobs: Vec<JobRecord>,
}

impl Default for JobsDocument {
    fn default() -> Self {
        Self {
            next_id: 1,
            jobs: Vec::new(),
        }
    }
}

struct JobTable {
    file: AtomicTomlFile<JobsDocument>,
    document: Mutex<JobsDocument>,
}

impl JobTable {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, JobsDocument>> {
        self.document
            .lock()
            .map_err(|_| UlaError::internal("download job table lock poisoned"))
    }

    fn modify<R>(&self, change: impl FnOnce(&mut JobsDocument) -> R) -> Result<R> {
        let mut document = self.lock()?;
        let result = change(&mut document);
        self.file.save(&document)?;
        Ok(result)
    }

    fn finish(&self, id: u64, state: JobState) -> Result<()> {
        self.modify(|document| {
            if let Some(job) = document.jobs.iter_mut().find(|job| job.id == id) {
                job.state = state;
                job.finished_at = Some(Utc::now());
            }
        })
    }
}

/// HTTP implementation of [`DownloadBackend`].
pub struct HttpDownloader {
    client: Client,
    table: Arc<JobTable>,
    completions: mpsc::UnboundedSender<DownloadId>,
    tasks: Mutex<HashMap<DownloadId, JoinHandle<()>>>,
}

impl HttpDownloader {
    /// Opens the job table at `jobs_file` and returns the completion channel.
    ///
    /// Jobs still pending from an earlier process are started again under
    /// their original ids, so this must run inside a Tokio runtime.
    pub fn open(
        jobs_file: impl Into<PathBuf>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<DownloadId>)> {
        let client = Client::builder()
            .user_agent(concat!("ula/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UlaError::network(format!("Failed to create HTTP client: {}", e)))?;
        Self::open_with_client(client, jobs_file)
    }

    pub fn open_with_client(
        client: Client,
        jobs_file: impl Into<PathBuf>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<DownloadId>)> {
        let file = AtomicTomlFile::<JobsDocument>::new(jobs_file);
        let document = file.load_or_default()?;
        let interrupted: Vec<JobRecord> = document
            .jobs
            .iter()
            .filter(|job| job.state == JobState::Pending)
            .cloned()
            .collect();

        let (completions, receiver) = mpsc::unbounded_channel();
        let downloader = Self {
            client,
            table: Arc::new(JobTable {
                file,
                document: Mutex::new(document),
            }),
            completions,
            tasks: Mutex::new(HashMap::new()),
        };

        if !interrupted.is_empty() {
            tracing::info!(count = interrupted.len(), "Restarting interrupted downloads");
        }
        for job in interrupted {
            downloader.spawn_job(job.id, job.url, job.destination);
        }
        Ok((downloader, receiver))
    }

    fn spawn_job(&self, id: u64, url: String, destination: PathBuf) {
        let download_id = DownloadId(id);
        let client = self.client.clone();
        let table = Arc::clone(&self.table);
        let completions = self.completions.clone();
        let task = tokio::spawn(async move {
            let state = match fetch(&client, &url, &destination).await {
                Ok(bytes) => {
                    tracing::info!(%download_id, bytes, "Download finished");
                    JobState::Succeeded
                }
                Err(reason) => {
                    tracing::error!(%download_id, %url, "Download failed: {}", reason);
                    JobState::Failed { reason }
                }
            };
            if let Err(err) = table.finish(id, state) {
                tracing::error!(%download_id, "Failed to record download outcome: {}", err);
            }
            let _ = completions.send(download_id);
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|_, task| !task.is_finished());
            tasks.insert(download_id, task);
        }
    }
}

#[async_trait]
impl DownloadBackend for HttpDownloader {
    async fn enqueue(&self, url: String, destination: PathBuf) -> Result<DownloadId> {
        let id = self.table.modify(|document| {
            let id = document.next_id;
            document.next_id += 1;
            document.jobs.push(JobRecord {
                id,
                url: url.clone(),
                destination: destination.clone(),
                state: JobState::Pending,
                finished_at: None,
            });
            id
        })?;
        let download_id = DownloadId(id);
        tracing::info!(%download_id, %url, "Download enqueued");
        self.spawn_job(id, url, destination);
        Ok(download_id)
    }

    async fn status(&self, id: DownloadId) -> DownloadStatus {
        let Ok(document) = self.table.lock() else {
            return DownloadStatus::Unknown;
        };
        match document.jobs.iter().find(|job| job.id == id.0) {
            Some(job) => match &job.state {
                JobState::Pending => DownloadStatus::Pending,
                JobState::Succeeded => DownloadStatus::Succeeded,
                JobState::Failed { reason } => DownloadStatus::Failed(reason.clone()),
            },
            None => DownloadStatus::Unknown,
        }
    }

    async fn cancel(&self, ids: &[DownloadId]) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for id in ids {
                if let Some(task) = tasks.remove(id) {
                    task.abort();
                }
            }
        }

        let cancelled = self.table.modify(|document| {
            let mut cancelled = 0;
            for job in document.jobs.iter_mut().filter(|job| {
                job.state == JobState::Pending && ids.contains(&DownloadId(job.id))
            }) {
                job.state = JobState::Failed {
                    reason: "Cancelled".to_string(),
                };
                job.finished_at = Some(Utc::now());
                cancelled += 1;
            }
            cancelled
        });
        match cancelled {
            Ok(count) => tracing::info!(count, "Cancelled downloads"),
            Err(err) => tracing::error!("Failed to record cancelled downloads: {}", err),
        }
    }

    async fn forget_finished(&self, keep: &[DownloadId]) {
        let forgotten = self.table.modify(|document| {
            let before = document.jobs.len();
            document
                .jobs
                .retain(|job| job.state == JobState::Pending || keep.contains(&DownloadId(job.id)));
            before - document.jobs.len()
        });
        match forgotten {
            Ok(count) => tracing::debug!(count, "Forgot finished download jobs"),
            Err(err) => tracing::error!("Failed to prune download jobs: {}", err),
        }
    }
}

/// Streams `url` into `destination`, returning the byte count.
async fn fetch(client: &Client, url: &str, destination: &Path) -> std::result::Result<u64, String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status()));
    }

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| e.to_string())?;
    }
    let mut file = tokio::fs::File::create(destination)
        .await
        .map_err(|e| e.to_string())?;

    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        file.write_all(&chunk).await.map_err(|e| e.to_string())?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| e.to_string())?;
    Ok(written)
}
