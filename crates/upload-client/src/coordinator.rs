//! Client-side upload coordinator.
//!
//! Each task runs in attempts. An attempt negotiates the chunk size, opens
//! (or reopens) the server session, asks the server which chunks it already
//! holds, and pushes only the missing ones through a fixed-width worker
//! pool before finalizing. Pausing cancels the attempt; resuming starts a
//! new one that re-derives the missing set from the server.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use stowage_protocol::{FileRecord, InitUploadRequest, UploadChunkRequest};
use stowage_transfer::{AttemptMeter, ChunkLayout, checksum_bytes, validate_file_name};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::api::SessionApi;
use crate::error::ClientError;
use crate::pool::{PoolOutcome, run_pool};
use crate::source::UploadSource;
use crate::types::{CoordinatorOptions, TaskSnapshot, TaskStatus, UploadEvent};

const EVENT_BUFFER: usize = 256;

struct TaskEntry {
    snapshot: TaskSnapshot,
    source: UploadSource,
    folder_id: Option<String>,
    chunk_size: Option<u64>,
    /// Bumped on every resume; results of older attempts are discarded.
    attempt: u64,
    token: CancellationToken,
    /// Set once finalize has been requested for the current attempt.
    finalizing: bool,
    watch: watch::Sender<TaskSnapshot>,
}

impl TaskEntry {
    fn set_status(&mut self, status: TaskStatus) {
        self.snapshot.status = status;
        if status != TaskStatus::Uploading {
            self.snapshot.speed = 0.0;
        }
        if status != TaskStatus::Failed {
            self.snapshot.error = None;
        }
    }

    fn publish(&self) {
        self.watch.send_replace(self.snapshot.clone());
    }
}

struct Inner {
    api: Arc<dyn SessionApi>,
    owner_id: String,
    options: CoordinatorOptions,
    tasks: Mutex<Vec<TaskEntry>>,
    events_tx: mpsc::Sender<UploadEvent>,
}

/// Drives resumable uploads against a [`SessionApi`].
pub struct UploadCoordinator {
    inner: Arc<Inner>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
}

impl UploadCoordinator {
    /// Creates a coordinator uploading on behalf of `owner_id`.
    pub fn new(
        api: Arc<dyn SessionApi>,
        owner_id: impl Into<String>,
        options: CoordinatorOptions,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                api,
                owner_id: owner_id.into(),
                options,
                tasks: Mutex::new(Vec::new()),
                events_tx,
            }),
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.inner.options
    }

    /// Queues an upload and starts it in the background.
    ///
    /// Returns the local task id.
    pub async fn upload(
        &self,
        source: UploadSource,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        folder_id: Option<String>,
    ) -> Result<String, ClientError> {
        let name = name.into();
        validate_file_name(&name)?;
        let size = source.len().await?;

        let id = uuid::Uuid::new_v4().to_string();
        let snapshot = TaskSnapshot {
            id: id.clone(),
            name,
            size,
            mime_type: mime_type.into(),
            progress: 0.0,
            speed: 0.0,
            status: TaskStatus::Pending,
            uploaded_bytes: 0,
            error: None,
            upload_id: None,
            record: None,
        };
        let token = CancellationToken::new();
        let (watch, _) = watch::channel(snapshot.clone());
        info!(task = %id, file = %snapshot.name, size, "upload queued");

        self.inner.lock().push(TaskEntry {
            snapshot,
            source,
            folder_id,
            chunk_size: None,
            attempt: 0,
            token: token.clone(),
            finalizing: false,
            watch,
        });
        self.inner.emit(UploadEvent::StatusChanged {
            task_id: id.clone(),
            status: TaskStatus::Pending,
        });
        self.inner.spawn_attempt(id.clone(), 0, token);
        Ok(id)
    }

    /// Stops issuing chunk requests and aborts those in flight.
    ///
    /// Pausing a paused task is a no-op. A task that is already finalizing
    /// cannot be paused.
    pub fn pause(&self, task_id: &str) -> Result<(), ClientError> {
        let mut tasks = self.inner.lock();
        let entry = find_mut(&mut tasks, task_id)?;
        match entry.snapshot.status {
            TaskStatus::Paused => return Ok(()),
            TaskStatus::Pending | TaskStatus::Uploading if !entry.finalizing => {}
            status => return Err(invalid_state(task_id, "pause", status)),
        }
        entry.token.cancel();
        entry.set_status(TaskStatus::Paused);
        entry.publish();
        drop(tasks);

        info!(task = task_id, "upload paused");
        self.inner.emit(UploadEvent::StatusChanged {
            task_id: task_id.to_string(),
            status: TaskStatus::Paused,
        });
        Ok(())
    }

    /// Starts a new attempt for a paused or failed task.
    ///
    /// Resuming an active task is a no-op.
    pub fn resume(&self, task_id: &str) -> Result<(), ClientError> {
        let mut tasks = self.inner.lock();
        let entry = find_mut(&mut tasks, task_id)?;
        match entry.snapshot.status {
            TaskStatus::Pending | TaskStatus::Uploading => return Ok(()),
            TaskStatus::Paused | TaskStatus::Failed => {}
            status => return Err(invalid_state(task_id, "resume", status)),
        }
        entry.attempt += 1;
        entry.token = CancellationToken::new();
        entry.finalizing = false;
        entry.set_status(TaskStatus::Pending);
        entry.publish();
        let (attempt, token) = (entry.attempt, entry.token.clone());
        drop(tasks);

        info!(task = task_id, attempt, "upload resumed");
        self.inner.emit(UploadEvent::StatusChanged {
            task_id: task_id.to_string(),
            status: TaskStatus::Pending,
        });
        self.inner.spawn_attempt(task_id.to_string(), attempt, token);
        Ok(())
    }

    /// Aborts the task, asks the server to discard its session, and removes
    /// the task from the list.
    ///
    /// A failure to reach the server is logged; the session then expires
    /// server-side.
    pub async fn cancel(&self, task_id: &str) -> Result<(), ClientError> {
        let upload_id = {
            let mut tasks = self.inner.lock();
            let pos = position(&tasks, task_id)?;
            let entry = &mut tasks[pos];
            if entry.snapshot.status == TaskStatus::Completed {
                return Err(invalid_state(task_id, "cancel", TaskStatus::Completed));
            }
            entry.token.cancel();
            entry.set_status(TaskStatus::Cancelled);
            entry.publish();
            tasks.remove(pos).snapshot.upload_id
        };
        info!(task = task_id, "upload cancelled");
        self.inner.emit(UploadEvent::StatusChanged {
            task_id: task_id.to_string(),
            status: TaskStatus::Cancelled,
        });

        if let Some(upload_id) = upload_id
            && let Err(e) = self.inner.api.cancel(&self.inner.owner_id, &upload_id).await
        {
            warn!(task = task_id, upload_id = %upload_id, "server cancel failed: {e}");
        }
        Ok(())
    }

    /// Snapshots of every task, in the order they were queued.
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        self.inner.lock().iter().map(|e| e.snapshot.clone()).collect()
    }

    pub fn task(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.inner
            .lock()
            .iter()
            .find(|e| e.snapshot.id == task_id)
            .map(|e| e.snapshot.clone())
    }

    /// Removes completed and failed tasks from the list.
    pub fn clear_finished(&self) {
        self.inner.lock().retain(|e| {
            !matches!(
                e.snapshot.status,
                TaskStatus::Completed | TaskStatus::Failed
            )
        });
    }

    /// Waits until the task is no longer pending or uploading and returns
    /// its snapshot at that point.
    pub async fn wait(&self, task_id: &str) -> Result<TaskSnapshot, ClientError> {
        let mut rx = {
            let mut tasks = self.inner.lock();
            find_mut(&mut tasks, task_id)?.watch.subscribe()
        };
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if !snapshot.status.is_active() {
                    return Ok(snapshot.clone());
                }
            }
            if rx.changed().await.is_err() {
                return Ok(rx.borrow().clone());
            }
        }
    }
}

/// Everything a chunk worker needs, shared across the pool.
#[derive(Clone)]
struct ChunkJob {
    api: Arc<dyn SessionApi>,
    events_tx: mpsc::Sender<UploadEvent>,
    task_id: String,
    template: UploadChunkRequest,
    source: UploadSource,
    layout: ChunkLayout,
    options: CoordinatorOptions,
    token: CancellationToken,
}

impl ChunkJob {
    /// Uploads chunk `index`, retrying transient failures with backoff.
    /// Returns the chunk length.
    async fn run(&self, index: u32) -> Result<u64, ClientError> {
        let data = self.source.read_chunk(self.layout, index).await?;
        let len = data.len() as u64;
        let req = UploadChunkRequest {
            index,
            checksum: checksum_bytes(&data),
            data,
            ..self.template.clone()
        };
        let timeout = self.options.chunk_timeout_for(self.layout.chunk_size());

        let mut retry = 0;
        loop {
            let call = tokio::time::timeout(timeout, self.api.upload_chunk(req.clone()));
            let result = tokio::select! {
                _ = self.token.cancelled() => return Err(ClientError::Cancelled),
                r = call => r.unwrap_or_else(|_| Err(ClientError::Timeout)),
            };

            match result {
                Ok(_) => {
                    trace!(task = %self.task_id, index, "chunk stored");
                    return Ok(len);
                }
                Err(e) if e.is_transient() && retry + 1 < self.options.max_retries => {
                    retry += 1;
                    let delay = self.options.backoff(retry);
                    warn!(task = %self.task_id, index, retry, ?delay, "chunk upload failed, retrying: {e}");
                    let _ = self.events_tx.try_send(UploadEvent::Retrying {
                        task_id: self.task_id.clone(),
                        index,
                        retry,
                        error: e.to_string(),
                    });
                    tokio::select! {
                        _ = self.token.cancelled() => return Err(ClientError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Vec<TaskEntry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: UploadEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            trace!("upload event dropped: {e}");
        }
    }

    /// Applies `f` to the task if `attempt` is still its current attempt.
    fn update<R>(
        &self,
        task_id: &str,
        attempt: u64,
        f: impl FnOnce(&mut TaskEntry) -> R,
    ) -> Option<R> {
        let mut tasks = self.lock();
        let entry = tasks
            .iter_mut()
            .find(|e| e.snapshot.id == task_id && e.attempt == attempt)?;
        let result = f(entry);
        entry.publish();
        Some(result)
    }

    fn spawn_attempt(self: &Arc<Self>, task_id: String, attempt: u64, token: CancellationToken) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = inner.drive(&task_id, attempt, &token).await;
            inner.settle(&task_id, attempt, &token, result);
        });
    }

    /// Records the outcome of an attempt.
    fn settle(
        &self,
        task_id: &str,
        attempt: u64,
        token: &CancellationToken,
        result: Result<FileRecord, ClientError>,
    ) {
        match result {
            Ok(record) => {
                let updated = self.update(task_id, attempt, |e| {
                    e.snapshot.uploaded_bytes = e.snapshot.size;
                    e.snapshot.progress = 100.0;
                    e.snapshot.record = Some(record.clone());
                    e.set_status(TaskStatus::Completed);
                });
                if updated.is_some() {
                    info!(task = task_id, path = %record.path, size = record.size, "upload completed");
                    self.emit(UploadEvent::StatusChanged {
                        task_id: task_id.to_string(),
                        status: TaskStatus::Completed,
                    });
                    self.emit(UploadEvent::Completed {
                        task_id: task_id.to_string(),
                        record,
                    });
                }
            }
            // Paused or cancelled; whoever cancelled set the status.
            Err(_) if token.is_cancelled() => debug!(task = task_id, attempt, "attempt stopped"),
            Err(e) => {
                let message = e.to_string();
                let updated = self.update(task_id, attempt, |entry| {
                    entry.set_status(TaskStatus::Failed);
                    entry.snapshot.error = Some(message.clone());
                });
                if updated.is_some() {
                    error!(task = task_id, "upload failed: {message}");
                    self.emit(UploadEvent::StatusChanged {
                        task_id: task_id.to_string(),
                        status: TaskStatus::Failed,
                    });
                    self.emit(UploadEvent::Failed {
                        task_id: task_id.to_string(),
                        error: message,
                    });
                }
            }
        }
    }

    /// Runs one attempt from session setup to finalize.
    async fn drive(
        &self,
        task_id: &str,
        attempt: u64,
        token: &CancellationToken,
    ) -> Result<FileRecord, ClientError> {
        let (snapshot, source, folder_id, known_chunk_size) = self
            .update(task_id, attempt, |e| {
                if e.token.is_cancelled() {
                    return None;
                }
                e.set_status(TaskStatus::Uploading);
                Some((e.snapshot.clone(), e.source.clone(), e.folder_id.clone(), e.chunk_size))
            })
            .flatten()
            .ok_or(ClientError::Cancelled)?;
        self.emit(UploadEvent::StatusChanged {
            task_id: task_id.to_string(),
            status: TaskStatus::Uploading,
        });

        let chunk_size = match known_chunk_size {
            Some(size) => size,
            None => {
                let size = cancellable(token, self.api.get_chunk_size()).await?;
                self.update(task_id, attempt, |e| e.chunk_size = Some(size));
                size
            }
        };
        let layout = ChunkLayout::new(snapshot.size, chunk_size)?;

        // Reuse the server session when it still exists.
        let mut status = None;
        if let Some(upload_id) = &snapshot.upload_id {
            status = cancellable(token, self.api.get_status(&self.owner_id, upload_id)).await?;
            if status.is_none() {
                info!(task = task_id, upload_id = %upload_id, "server session gone, starting over");
            }
        }
        let upload_id = match (&status, snapshot.upload_id) {
            (Some(_), Some(upload_id)) => upload_id,
            _ => {
                let req = InitUploadRequest {
                    owner_id: self.owner_id.clone(),
                    file_name: snapshot.name.clone(),
                    mime_type: snapshot.mime_type.clone(),
                    total_size: snapshot.size,
                    total_chunks: layout.total_chunks(),
                    folder_id: folder_id.clone(),
                };
                let resp = cancellable(token, self.api.initialize(req)).await?;
                if resp.chunk_size != chunk_size {
                    return Err(ClientError::UnexpectedResponse(format!(
                        "server chunk size changed from {chunk_size} to {}",
                        resp.chunk_size
                    )));
                }
                let upload_id = resp.upload_id;
                self.update(task_id, attempt, |e| {
                    e.snapshot.upload_id = Some(upload_id.clone())
                });
                debug!(task = task_id, upload_id = %upload_id, "server session opened");
                upload_id
            }
        };

        let status = match status {
            Some(status) => status,
            None => cancellable(token, self.api.get_status(&self.owner_id, &upload_id))
                .await?
                .ok_or_else(|| {
                    ClientError::UnexpectedResponse(format!("session {upload_id} vanished"))
                })?,
        };

        let missing = status.missing();
        let size = snapshot.size;
        let mut uploaded = layout.bytes_in(&status.chunks_received).min(size);
        let meter = AttemptMeter::start(uploaded);
        self.record_progress(task_id, attempt, uploaded, size, 0.0);
        info!(
            task = task_id,
            upload_id = %upload_id,
            received = status.chunks_received.len(),
            missing = missing.len(),
            total_chunks = layout.total_chunks(),
            "uploading chunks"
        );

        let job = ChunkJob {
            api: self.api.clone(),
            events_tx: self.events_tx.clone(),
            task_id: task_id.to_string(),
            template: UploadChunkRequest {
                owner_id: self.owner_id.clone(),
                upload_id: upload_id.clone(),
                index: 0,
                total_chunks: layout.total_chunks(),
                file_name: snapshot.name.clone(),
                mime_type: snapshot.mime_type.clone(),
                total_size: size,
                folder_id,
                checksum: String::new(),
                data: Vec::new(),
            },
            source,
            layout,
            options: self.options.clone(),
            token: token.clone(),
        };
        let outcome = run_pool(
            missing,
            self.options.concurrency,
            token,
            move |index| {
                let job = job.clone();
                async move { job.run(index).await }
            },
            |_, len| {
                uploaded = (uploaded + len).min(size);
                self.record_progress(task_id, attempt, uploaded, size, meter.speed(uploaded));
            },
        )
        .await;

        match outcome {
            PoolOutcome::Drained => {}
            PoolOutcome::Stopped => return Err(ClientError::Cancelled),
            PoolOutcome::Failed { index, error } => {
                debug!(task = task_id, index, "chunk failed: {error}");
                return Err(error);
            }
        }

        // Once requested, finalize runs to completion; pause is refused.
        let proceed = self.update(task_id, attempt, |e| {
            if e.token.is_cancelled() {
                false
            } else {
                e.finalizing = true;
                true
            }
        });
        if proceed != Some(true) {
            return Err(ClientError::Cancelled);
        }
        debug!(task = task_id, upload_id = %upload_id, "finalizing");
        self.api.finalize(&self.owner_id, &upload_id).await
    }

    fn record_progress(&self, task_id: &str, attempt: u64, uploaded: u64, size: u64, speed: f64) {
        let progress = percent(uploaded, size);
        let updated = self.update(task_id, attempt, |e| {
            e.snapshot.uploaded_bytes = uploaded;
            e.snapshot.progress = progress;
            if e.snapshot.status == TaskStatus::Uploading {
                e.snapshot.speed = speed;
            }
        });
        if updated.is_some() {
            self.emit(UploadEvent::Progress {
                task_id: task_id.to_string(),
                uploaded_bytes: uploaded,
                total_bytes: size,
                progress,
                speed,
            });
        }
    }
}

async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, ClientError> {
    tokio::select! {
        _ = token.cancelled() => Err(ClientError::Cancelled),
        r = fut => r,
    }
}

fn percent(uploaded: u64, size: u64) -> f64 {
    if size == 0 {
        0.0
    } else {
        uploaded as f64 * 100.0 / size as f64
    }
}

fn position(tasks: &[TaskEntry], task_id: &str) -> Result<usize, ClientError> {
    tasks
        .iter()
        .position(|e| e.snapshot.id == task_id)
        .ok_or_else(|| ClientError::UnknownTask(task_id.to_string()))
}

fn find_mut<'a>(tasks: &'a mut [TaskEntry], task_id: &str) -> Result<&'a mut TaskEntry, ClientError> {
    let pos = position(tasks, task_id)?;
    Ok(&mut tasks[pos])
}

fn invalid_state(task_id: &str, action: &'static str, status: TaskStatus) -> ClientError {
    ClientError::InvalidState {
        id: task_id.to_string(),
        action,
        status: status.to_string(),
    }
}
