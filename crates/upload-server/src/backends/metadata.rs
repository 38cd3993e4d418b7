use std::collections::HashMap;

use chrono::Utc;
use stowage_protocol::FileRecord;
use tokio::sync::Mutex;

use crate::collaborators::{BackendFuture, MetadataStore, NewFileRecord};

/// In-memory file and folder metadata.
#[derive(Default)]
pub struct MemoryMetadataStore {
    /// (owner, folder id) -> folder path
    folders: Mutex<HashMap<(String, String), String>>,
    records: Mutex<Vec<FileRecord>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a folder. `path` is absolute without a trailing slash,
    /// e.g. `/photos/2024`.
    pub async fn add_folder(&self, owner_id: &str, folder_id: &str, path: &str) {
        self.folders.lock().await.insert(
            (owner_id.to_string(), folder_id.to_string()),
            path.trim_end_matches('/').to_string(),
        );
    }

    pub async fn records(&self) -> Vec<FileRecord> {
        self.records.lock().await.clone()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn folder_path<'a>(
        &'a self,
        owner_id: &'a str,
        folder_id: &'a str,
    ) -> BackendFuture<'a, Option<String>> {
        Box::pin(async move {
            let folders = self.folders.lock().await;
            Ok(folders
                .get(&(owner_id.to_string(), folder_id.to_string()))
                .cloned())
        })
    }

    fn create_file_record(&self, fields: NewFileRecord) -> BackendFuture<'_, FileRecord> {
        Box::pin(async move {
            let mut records = self.records.lock().await;
            if let Some(existing) = records
                .iter()
                .find(|r| r.storage_key == fields.storage_key)
            {
                return Ok(existing.clone());
            }
            let record = FileRecord {
                id: uuid::Uuid::new_v4().to_string(),
                owner_id: fields.owner_id,
                name: fields.name,
                path: fields.path,
                mime_type: fields.mime_type,
                size: fields.size,
                storage_key: fields.storage_key,
                folder_id: fields.folder_id,
                created_at: Utc::now(),
            };
            records.push(record.clone());
            Ok(record)
        })
    }
}
