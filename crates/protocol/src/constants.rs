use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default server chunk size (5 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Time allowed to write a WebSocket message.
pub const WS_WRITE_WAIT: Duration = Duration::from_secs(30);

/// Read deadline: if nothing arrives within this window (no pong, no
/// response, no request) the peer is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send keepalive pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Maximum message size in bytes (64 MB). Must exceed the chunk size plus
/// the binary frame header.
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Timeout for request/response operations (text messages).
pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for binary chunk uploads.
pub const WS_BINARY_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for finalize, which reads every chunk and writes the blob.
pub const WS_FINALIZE_TIMEOUT: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Error codes carried in `ErrorBody::code`
// ---------------------------------------------------------------------------

pub const ERR_INVALID_INPUT: i32 = 400;
pub const ERR_FORBIDDEN: i32 = 403;
pub const ERR_UPLOAD_NOT_FOUND: i32 = 404;
pub const ERR_SESSION_SEALED: i32 = 409;
pub const ERR_INCOMPLETE_UPLOAD: i32 = 412;
pub const ERR_QUOTA_EXCEEDED: i32 = 413;
pub const ERR_INVALID_CHUNK_INDEX: i32 = 416;
pub const ERR_METADATA_MISSING: i32 = 422;
pub const ERR_INTERNAL: i32 = 500;
pub const ERR_NOT_IMPLEMENTED: i32 = 501;

/// Returns `true` if an error code denotes a failure worth retrying.
///
/// Server-side storage hiccups (5xx) are transient; every 4xx is a
/// permanent verdict on the request itself.
pub fn is_transient_code(code: i32) -> bool {
    code >= 500 && code != ERR_NOT_IMPLEMENTED
}

/// WebSocket message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from client to server
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "get_chunk_size")]
    GetChunkSize,
    #[serde(rename = "init_upload")]
    InitUpload,
    #[serde(rename = "upload_chunk")]
    UploadChunk,
    #[serde(rename = "get_upload_status")]
    GetUploadStatus,
    #[serde(rename = "finalize_upload")]
    FinalizeUpload,
    #[serde(rename = "cancel_upload")]
    CancelUpload,

    // Responses from server to client
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "chunk_size_response")]
    ChunkSizeResponse,
    #[serde(rename = "upload_init_response")]
    UploadInitResponse,
    #[serde(rename = "upload_chunk_response")]
    UploadChunkResponse,
    #[serde(rename = "upload_status_response")]
    UploadStatusResponse,
    #[serde(rename = "finalize_response")]
    FinalizeResponse,
    #[serde(rename = "operation_result")]
    OperationResult,
    #[serde(rename = "error")]
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&MessageType::InitUpload).unwrap(),
            "\"init_upload\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::UploadStatusResponse).unwrap(),
            "\"upload_status_response\""
        );
        let parsed: MessageType = serde_json::from_str("\"finalize_upload\"").unwrap();
        assert_eq!(parsed, MessageType::FinalizeUpload);
    }

    #[test]
    fn transient_codes() {
        assert!(is_transient_code(ERR_INTERNAL));
        assert!(is_transient_code(503));
        assert!(!is_transient_code(ERR_NOT_IMPLEMENTED));
        assert!(!is_transient_code(ERR_INCOMPLETE_UPLOAD));
        assert!(!is_transient_code(ERR_QUOTA_EXCEEDED));
        assert!(!is_transient_code(ERR_FORBIDDEN));
    }

    #[test]
    fn chunk_frame_fits_in_message_limit() {
        assert!((DEFAULT_CHUNK_SIZE as usize) < WS_MAX_MESSAGE_SIZE);
    }
}
