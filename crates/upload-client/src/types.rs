//! Task state, options and events of the upload coordinator.

use std::fmt;
use std::time::Duration;

use stowage_protocol::FileRecord;

/// Lifecycle state of an upload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Uploading,
    Paused,
    Completed,
    /// Resumable with [`crate::UploadCoordinator::resume`].
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Completed and cancelled tasks never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether an attempt is running or about to run.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Uploading)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of an upload task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    /// Percentage in `0.0..=100.0`.
    pub progress: f64,
    /// Bytes per second over the current attempt.
    pub speed: f64,
    pub status: TaskStatus,
    pub uploaded_bytes: u64,
    /// Set only while `status` is [`TaskStatus::Failed`].
    pub error: Option<String>,
    /// Server session id, once initialized.
    pub upload_id: Option<String>,
    /// File record, once completed.
    pub record: Option<FileRecord>,
}

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Chunk uploads in flight per task.
    pub concurrency: usize,
    /// Attempts per chunk, the first one included. Zero behaves like one.
    pub max_retries: u32,
    /// Backoff before retry `n` (one-based) is `retry_base_delay * 2^n`.
    pub retry_base_delay: Duration,
    /// Timeout of one chunk attempt; derived from the chunk size when `None`.
    ///
    /// The transport may time out first: [`crate::WsSessionApi`] waits
    /// [`stowage_protocol::constants::WS_BINARY_REQUEST_TIMEOUT`] unless
    /// raised with [`crate::WsSessionApi::with_chunk_timeout`].
    pub chunk_timeout: Option<Duration>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            chunk_timeout: None,
        }
    }
}

/// Slowest throughput a chunk attempt is allowed before it times out.
pub const MIN_THROUGHPUT: u64 = 64 * 1024;

/// Floor of the derived chunk timeout.
pub const MIN_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

impl CoordinatorOptions {
    /// Timeout of one chunk attempt for chunks of `chunk_size` bytes.
    pub fn chunk_timeout_for(&self, chunk_size: u64) -> Duration {
        self.chunk_timeout.unwrap_or_else(|| {
            Duration::from_secs(chunk_size.div_ceil(MIN_THROUGHPUT)).max(MIN_CHUNK_TIMEOUT)
        })
    }

    /// Backoff before retry number `retry` (one-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(retry))
    }
}

/// Event published by the coordinator.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    StatusChanged {
        task_id: String,
        status: TaskStatus,
    },
    Progress {
        task_id: String,
        uploaded_bytes: u64,
        total_bytes: u64,
        progress: f64,
        speed: f64,
    },
    /// A chunk attempt failed transiently and will be retried.
    Retrying {
        task_id: String,
        index: u32,
        retry: u32,
        error: String,
    },
    Completed {
        task_id: String,
        record: FileRecord,
    },
    Failed {
        task_id: String,
        error: String,
    },
}
