use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a server-side upload session.
///
/// `chunks_received` is always sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub upload_id: String,
    pub chunks_received: Vec<u32>,
    pub total_chunks: u32,
    pub file_name: String,
    pub total_size: u64,
}

impl SessionStatus {
    /// Indices in `[0, total_chunks)` not yet received, ascending.
    pub fn missing(&self) -> Vec<u32> {
        let mut received = self.chunks_received.iter().peekable();
        let mut missing = Vec::new();
        for index in 0..self.total_chunks {
            while received.peek().is_some_and(|&&r| r < index) {
                received.next();
            }
            if received.peek() == Some(&&index) {
                continue;
            }
            missing.push(index);
        }
        missing
    }

    /// Returns `true` once every index has been received.
    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

/// Metadata record of a finished file, as created by the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    /// Full path, `/<name>` at root or `<folder path>/<name>`.
    pub path: String,
    pub mime_type: String,
    pub size: u64,
    pub storage_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
