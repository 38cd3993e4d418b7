use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Starts a new upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub owner_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub total_size: u64,
    pub total_chunks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
}

/// Sends one chunk of upload data over a text frame.
///
/// The `data` field is base64-encoded. Binary frames carry the same fields
/// in a [`crate::binary::ChunkHeader`] and are preferred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkRequest {
    pub owner_id: String,
    pub upload_id: String,
    pub index: u32,
    pub total_chunks: u32,
    pub file_name: String,
    pub mime_type: String,
    pub total_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    /// SHA-256 hex of `data`; verified when non-empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Addresses an existing session on behalf of its owner.
///
/// Used by `get_upload_status`, `finalize_upload` and `cancel_upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub owner_id: String,
    pub upload_id: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSizeResponse {
    pub chunk_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub upload_id: String,
    pub chunk_size: u64,
}

/// Generic acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_chunk_base64_roundtrip() {
        let req = UploadChunkRequest {
            owner_id: "alice".into(),
            upload_id: "u1".into(),
            index: 0,
            total_chunks: 1,
            file_name: "hello.txt".into(),
            mime_type: "text/plain".into(),
            total_size: 5,
            folder_id: None,
            checksum: String::new(),
            data: b"Hello".to_vec(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("SGVsbG8="));
        assert!(!json.contains("folderId"));
        assert!(!json.contains("checksum"));
        let parsed: UploadChunkRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn upload_chunk_rejects_bad_base64() {
        let json = r#"{"ownerId":"a","uploadId":"u","index":0,"totalChunks":1,
            "fileName":"f","mimeType":"m","totalSize":1,"data":"!!"}"#;
        assert!(serde_json::from_str::<UploadChunkRequest>(json).is_err());
    }

    #[test]
    fn init_upload_folder_optional() {
        let json = r#"{"ownerId":"alice","fileName":"a.bin","mimeType":"application/octet-stream",
            "totalSize":12,"totalChunks":3}"#;
        let req: InitUploadRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.folder_id, None);
        assert_eq!(req.total_chunks, 3);

        let json = r#"{"ownerId":"alice","fileName":"a.bin","mimeType":"x","totalSize":1,
            "totalChunks":1,"folderId":"docs"}"#;
        let req: InitUploadRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.folder_id.as_deref(), Some("docs"));
    }

    #[test]
    fn operation_result_omits_empty_message() {
        let json = serde_json::to_string(&OperationResult {
            success: true,
            message: String::new(),
        })
        .unwrap();
        assert_eq!(json, r#"{"success":true}"#);
    }
}
