//! Binary chunk frames: 4-byte big-endian header length + JSON header + raw chunk bytes.

use serde::{Deserialize, Serialize};

use crate::messages::UploadChunkRequest;

/// Header for binary upload chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHeader {
    pub id: String,
    pub owner_id: String,
    pub upload_id: String,
    pub index: u32,
    pub total_chunks: u32,
    pub file_name: String,
    pub mime_type: String,
    pub total_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

impl ChunkHeader {
    /// Builds the header for `req`, tagged with request id `id`.
    pub fn for_request(id: impl Into<String>, req: &UploadChunkRequest) -> Self {
        Self {
            id: id.into(),
            owner_id: req.owner_id.clone(),
            upload_id: req.upload_id.clone(),
            index: req.index,
            total_chunks: req.total_chunks,
            file_name: req.file_name.clone(),
            mime_type: req.mime_type.clone(),
            total_size: req.total_size,
            folder_id: req.folder_id.clone(),
            checksum: req.checksum.clone(),
        }
    }

    /// Joins the header with its payload, yielding the request id and the
    /// same request a text frame would have carried.
    pub fn into_request(self, data: Vec<u8>) -> (String, UploadChunkRequest) {
        let req = UploadChunkRequest {
            owner_id: self.owner_id,
            upload_id: self.upload_id,
            index: self.index,
            total_chunks: self.total_chunks,
            file_name: self.file_name,
            mime_type: self.mime_type,
            total_size: self.total_size,
            folder_id: self.folder_id,
            checksum: self.checksum,
            data,
        };
        (self.id, req)
    }
}

/// Parses a raw binary WebSocket frame into its header and chunk bytes.
///
/// Wire format: `[4 bytes: header_len (big-endian)][header_len bytes: JSON][rest: payload]`
pub fn parse_chunk_frame(data: &[u8]) -> Result<(ChunkHeader, Vec<u8>), ParseError> {
    if data.len() < 4 {
        return Err(ParseError::TooShort);
    }

    let header_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if data.len() - 4 < header_len {
        return Err(ParseError::HeaderTruncated {
            expected: header_len,
            got: data.len() - 4,
        });
    }

    let header: ChunkHeader = serde_json::from_slice(&data[4..4 + header_len])
        .map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    Ok((header, data[4 + header_len..].to_vec()))
}

/// Encodes a chunk frame for sending over WebSocket.
pub fn encode_chunk_frame(header: &ChunkHeader, payload: &[u8]) -> Result<Vec<u8>, serde_json::Error> {
    let header_json = serde_json::to_vec(header)?;
    let header_len = header_json.len() as u32;

    let mut buf = Vec::with_capacity(4 + header_json.len() + payload.len());
    buf.extend_from_slice(&header_len.to_be_bytes());
    buf.extend_from_slice(&header_json);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Errors from binary frame parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("message too short (need at least 4 bytes)")]
    TooShort,

    #[error("header truncated: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("invalid header JSON: {0}")]
    InvalidJson(String),
}
