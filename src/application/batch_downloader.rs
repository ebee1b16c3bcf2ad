//! Bounded-concurrency batch downloads.
//!
//! A fixed pool of workers pops tasks from a shared pending queue. Every
//! worker owns its task end to end and reports state changes over a channel
//! to a single consumer, which keeps the aggregate view and drives the
//! [`BatchObserver`].

use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    path::Path,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use futures::StreamExt;
use tokio::{io::AsyncWriteExt, sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    api::{ApiClient, ApiError},
    domain::{
        AppError, BatchSummary, CompletedDownload, DownloadTask, Settings, TaskFailure, TaskId,
        TaskState, TransferError,
    },
};

/// Receives batch progress. Called from a single consumer, never concurrently.
pub trait BatchObserver {
    /// Called on every state change of a task. `overall` is the aggregate
    /// progress of the batch in `0.0..=1.0`.
    fn on_progress(&mut self, id: TaskId, state: &TaskState, overall: f32);

    /// Called exactly once, after every task reached a terminal state.
    fn on_batch_done(&mut self, summary: &BatchSummary);
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub max_concurrency: usize,
    /// Longest a single transfer may wait for the next chunk.
    pub read_timeout: Duration,
    /// Minimum spacing of byte-count updates for one task.
    pub progress_interval: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            read_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_millis(100),
        }
    }
}

impl From<&Settings> for BatchOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            max_concurrency: settings.concurrent_downloads,
            read_timeout: settings.transfer_timeout(),
            ..Self::default()
        }
    }
}

type StateEvent = (TaskId, TaskState);

/// Runs one batch of downloads. Cancelling is permanent for this instance.
#[derive(Clone)]
pub struct BatchDownloader {
    api_client: ApiClient,
    options: BatchOptions,
    cancel: CancellationToken,
}

impl BatchDownloader {
    pub fn new(api_client: ApiClient, options: BatchOptions) -> Self {
        Self {
            api_client,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        info!("Batch cancellation requested");
        self.cancel.cancel();
    }

    /// Downloads every task into `target_dir`.
    ///
    /// Per-task failures end up in the summary; only precondition violations
    /// (empty batch, zero concurrency, unwritable directory) return an error,
    /// and they do so before any transfer starts.
    pub async fn run<O: BatchObserver>(
        &self,
        tasks: Vec<DownloadTask>,
        target_dir: &Path,
        observer: &mut O,
    ) -> Result<BatchSummary, AppError> {
        validate(&tasks, target_dir, &self.options)?;
        ensure_writable(target_dir).await?;

        let names: BTreeMap<TaskId, String> = tasks
            .iter()
            .map(|task| (task.id, task.entry.name.clone()))
            .collect();
        let task_count = tasks.len();
        let worker_count = self.options.max_concurrency.min(task_count);

        info!(
            tasks = task_count,
            workers = worker_count,
            dir = %target_dir.display(),
            "Starting batch download"
        );

        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<StateEvent>();

        let mut workers = JoinSet::new();
        for index in 0..worker_count {
            let worker = Worker {
                index,
                queue: Arc::clone(&queue),
                events: events_tx.clone(),
                api_client: self.api_client.clone(),
                options: self.options.clone(),
                cancel: self.cancel.clone(),
            };
            workers.spawn(worker.run());
        }
        // The channel closes once the last worker is gone.
        drop(events_tx);

        let mut tracker = ProgressTracker::new(names.keys().copied());
        while let Some((id, state)) = events_rx.recv().await {
            tracker.update(id, &state);
            observer.on_progress(id, &state, tracker.overall());
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Download worker stopped unexpectedly");
            }
        }

        // Anything a crashed worker left behind.
        let abandoned: Vec<TaskId> = tracker.unfinished().collect();
        for id in abandoned {
            let state = TaskState::Failed(TransferError::Io("download worker stopped".to_string()));
            tracker.update(id, &state);
            observer.on_progress(id, &state, tracker.overall());
        }

        let summary = tracker.into_summary(&names, target_dir, self.cancel.is_cancelled());
        info!(
            succeeded = summary.succeeded_count(),
            failed = summary.failed_count(),
            cancelled = summary.was_cancelled,
            "Batch download finished"
        );
        observer.on_batch_done(&summary);

        Ok(summary)
    }
}

fn validate(tasks: &[DownloadTask], target_dir: &Path, options: &BatchOptions) -> Result<(), AppError> {
    if tasks.is_empty() {
        return Err(AppError::invalid_argument("no downloads selected"));
    }
    if options.max_concurrency == 0 {
        return Err(AppError::invalid_argument(
            "download concurrency must be at least 1",
        ));
    }
    if options.read_timeout.is_zero() {
        return Err(AppError::invalid_argument("transfer timeout must be positive"));
    }

    let mut ids = HashSet::new();
    let mut destinations = HashSet::new();
    for task in tasks {
        if !ids.insert(task.id) {
            return Err(AppError::invalid_argument(format!(
                "task {} appears twice",
                task.id
            )));
        }
        if !task.destination.starts_with(target_dir) {
            return Err(AppError::invalid_argument(format!(
                "{} would be written outside {}",
                task.destination.display(),
                target_dir.display()
            )));
        }
        if !destinations.insert(task.destination.clone()) {
            return Err(AppError::invalid_argument(format!(
                "{} is the destination of more than one task",
                task.destination.display()
            )));
        }
    }
    Ok(())
}

/// Fails with `AppError::Path` unless a file can be created in `dir`.
async fn ensure_writable(dir: &Path) -> Result<(), AppError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| AppError::path(dir, e))?;

    let probe = dir.join(".write_test.tmp");
    tokio::fs::write(&probe, b"test")
        .await
        .map_err(|e| AppError::path(dir, e))?;
    tokio::fs::remove_file(&probe)
        .await
        .map_err(|e| AppError::path(dir, e))?;

    Ok(())
}

struct Worker {
    index: usize,
    queue: Arc<Mutex<VecDeque<DownloadTask>>>,
    events: mpsc::UnboundedSender<StateEvent>,
    api_client: ApiClient,
    options: BatchOptions,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.index, "Worker started");

        while let Some(task) = self.next_task() {
            let state = if self.cancel.is_cancelled() {
                TaskState::Failed(TransferError::Cancelled)
            } else {
                self.transfer(&task).await
            };

            match &state {
                TaskState::Succeeded { bytes, .. } => {
                    info!(task = %task.id, name = %task.entry.name, bytes, "Download completed")
                }
                TaskState::Failed(reason) => {
                    warn!(task = %task.id, name = %task.entry.name, %reason, "Download failed")
                }
                _ => {}
            }
            self.emit(task.id, state);
        }

        debug!(worker = self.index, "Worker finished");
    }

    fn next_task(&self) -> Option<DownloadTask> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn emit(&self, id: TaskId, state: TaskState) {
        // The consumer only goes away when `run` is dropped mid-batch.
        let _ = self.events.send((id, state));
    }

    #[tracing::instrument(
        name = "transfer",
        level = "debug",
        skip(self, task),
        fields(task = %task.id, url = %task.entry.url)
    )]
    async fn transfer(&self, task: &DownloadTask) -> TaskState {
        self.emit(
            task.id,
            TaskState::InProgress {
                bytes_done: 0,
                bytes_total: None,
            },
        );

        let partial = task.partial_path();
        let result = match self.stream_to_file(task, &partial).await {
            Ok(bytes) => tokio::fs::rename(&partial, &task.destination)
                .await
                .map(|_| bytes)
                .map_err(|e| TransferError::Io(e.to_string())),
            Err(e) => Err(e),
        };

        match result {
            Ok(bytes) => TaskState::Succeeded {
                path: task.destination.clone(),
                bytes,
            },
            Err(reason) => {
                if let Err(e) = tokio::fs::remove_file(&partial).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %partial.display(), error = %e, "Failed to remove partial file");
                    }
                }
                TaskState::Failed(reason)
            }
        }
    }

    async fn stream_to_file(&self, task: &DownloadTask, partial: &Path) -> Result<u64, TransferError> {
        let read_timeout = self.options.read_timeout;

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            response = tokio::time::timeout(
                read_timeout,
                self.api_client.download_file_stream(&task.entry.url),
            ) => response,
        };
        let (total, stream) = response
            .map_err(|_| TransferError::Timeout(read_timeout))?
            .map_err(transfer_error)?;
        let mut stream = stream.boxed();

        let mut file = tokio::fs::File::create(partial)
            .await
            .map_err(|e| TransferError::Io(format!("Failed to create file: {}", e)))?;

        let mut downloaded = 0u64;
        self.emit(
            task.id,
            TaskState::InProgress {
                bytes_done: downloaded,
                bytes_total: total,
            },
        );
        let mut last_report = Instant::now();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                next = tokio::time::timeout(read_timeout, stream.next()) => next,
            };

            match next {
                Err(_) => return Err(TransferError::Timeout(read_timeout)),
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(transfer_error(e)),
                Ok(Some(Ok(chunk))) => {
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| TransferError::Io(e.to_string()))?;
                    downloaded += chunk.len() as u64;

                    if last_report.elapsed() >= self.options.progress_interval {
                        self.emit(
                            task.id,
                            TaskState::InProgress {
                                bytes_done: downloaded,
                                bytes_total: total,
                            },
                        );
                        last_report = Instant::now();
                    }
                }
            }
        }

        if let Some(expected) = total {
            if downloaded < expected {
                return Err(TransferError::Network(format!(
                    "connection closed after {} of {} bytes",
                    downloaded, expected
                )));
            }
        }

        file.flush()
            .await
            .map_err(|e| TransferError::Io(e.to_string()))?;
        file.sync_all()
            .await
            .map_err(|e| TransferError::Io(format!("Failed to sync file: {}", e)))?;

        Ok(downloaded)
    }
}

fn transfer_error(error: ApiError) -> TransferError {
    match error {
        ApiError::Status(status) => TransferError::Status(status.as_u16()),
        other => TransferError::Network(other.reason()),
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    state: TaskState,
    bytes_done: u64,
    bytes_total: Option<u64>,
}

impl Snapshot {
    fn fraction(&self) -> f64 {
        if self.state.is_terminal() {
            return 1.0;
        }
        match self.bytes_total {
            Some(total) if total > 0 => (self.bytes_done as f64 / total as f64).min(1.0),
            _ => 0.0,
        }
    }
}

/// Aggregate view of a batch, owned by the single event consumer.
struct ProgressTracker {
    tasks: BTreeMap<TaskId, Snapshot>,
}

impl ProgressTracker {
    fn new(ids: impl IntoIterator<Item = TaskId>) -> Self {
        let tasks = ids
            .into_iter()
            .map(|id| {
                (
                    id,
                    Snapshot {
                        state: TaskState::Pending,
                        bytes_done: 0,
                        bytes_total: None,
                    },
                )
            })
            .collect();
        Self { tasks }
    }

    fn update(&mut self, id: TaskId, state: &TaskState) {
        let Some(snapshot) = self.tasks.get_mut(&id) else {
            return;
        };
        if snapshot.state.is_terminal() {
            return;
        }

        match state {
            TaskState::Pending => {}
            TaskState::InProgress {
                bytes_done,
                bytes_total,
            } => {
                snapshot.bytes_done = snapshot.bytes_done.max(*bytes_done);
                if bytes_total.is_some() {
                    snapshot.bytes_total = *bytes_total;
                }
            }
            TaskState::Succeeded { bytes, .. } => {
                snapshot.bytes_done = *bytes;
                snapshot.bytes_total = Some(snapshot.bytes_total.unwrap_or(*bytes).max(*bytes));
            }
            TaskState::Failed(_) => {}
        }
        snapshot.state = state.clone();
    }

    /// Mean of per-task fractions. A finished task counts as 1, a running
    /// task of known size as its byte ratio, anything else as 0. Each term
    /// only grows, so the mean never moves backwards.
    fn overall(&self) -> f32 {
        if self.tasks.is_empty() {
            return 1.0;
        }

        let sum: f64 = self.tasks.values().map(Snapshot::fraction).sum();
        (sum / self.tasks.len() as f64).min(1.0) as f32
    }

    fn unfinished(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks
            .iter()
            .filter(|(_, s)| !s.state.is_terminal())
            .map(|(id, _)| *id)
    }

    fn into_summary(
        self,
        names: &BTreeMap<TaskId, String>,
        target_dir: &Path,
        was_cancelled: bool,
    ) -> BatchSummary {
        let mut summary = BatchSummary {
            target_dir: target_dir.to_path_buf(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            was_cancelled,
        };

        for (id, snapshot) in self.tasks {
            let name = names.get(&id).cloned().unwrap_or_default();
            match snapshot.state {
                TaskState::Succeeded { path, bytes } => {
                    summary.succeeded.push(CompletedDownload { name, path, bytes })
                }
                TaskState::Failed(reason) => summary.failed.push(TaskFailure { name, reason }),
                _ => summary.failed.push(TaskFailure {
                    name,
                    reason: TransferError::Cancelled,
                }),
            }
        }

        summary
    }
}
