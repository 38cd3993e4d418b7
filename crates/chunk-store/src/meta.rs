use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stowage_protocol::FileRecord;

/// Persisted state of one upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub upload_id: String,
    pub owner_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub total_size: u64,
    pub total_chunks: u32,
    /// Chunk size the session was created with.
    pub chunk_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Set once finalize has verified completeness; no chunk writes after.
    #[serde(default)]
    pub sealed: bool,
    #[serde(default)]
    pub finalize: FinalizeProgress,
}

/// Steps of a finalize already carried out.
///
/// Each field is persisted as soon as its step succeeds so an interrupted
/// finalize resumes from the first unfinished step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    #[serde(default)]
    pub blob_written: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<FileRecord>,
    #[serde(default)]
    pub quota_applied: bool,
}

impl FinalizeProgress {
    /// Returns `true` once every step has succeeded.
    pub fn is_done(&self) -> bool {
        self.blob_written && self.record.is_some() && self.quota_applied
    }
}
