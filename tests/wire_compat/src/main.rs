fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use stowage_protocol::constants::MessageType;
    use stowage_protocol::{
        ChunkHeader, ChunkSizeResponse, FileRecord, InitUploadRequest, InitUploadResponse,
        Message, OperationResult, SessionRequest, SessionStatus, UploadChunkRequest,
        encode_chunk_frame, parse_chunk_frame,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Parses a fixture into `T`, re-serializes it and compares the JSON
    /// values (key order independent).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let text = load_fixture(name);
        let fixture: serde_json::Value = serde_json::from_str(&text)
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"));
        let parsed: T = serde_json::from_str(&text)
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
        parsed
    }

    // --- Envelope ---

    #[test]
    fn fixture_message_envelope() {
        let msg = roundtrip_test::<Message>("message_envelope.json");
        assert_eq!(msg.msg_type, MessageType::InitUpload);
        let req: InitUploadRequest = msg.parse_payload().unwrap().unwrap();
        assert_eq!(req.total_chunks, 3);
        assert!(req.folder_id.is_none());
    }

    #[test]
    fn fixture_error_envelope() {
        let msg = roundtrip_test::<Message>("error_envelope.json");
        assert!(msg.payload.is_none());
        let err = msg.error.unwrap();
        assert_eq!(err.code, 412);
        assert_eq!(err.kind, "incomplete_upload");
    }

    // --- Requests ---

    #[test]
    fn fixture_init_upload_request() {
        let req = roundtrip_test::<InitUploadRequest>("init_upload_request.json");
        assert_eq!(req.folder_id.as_deref(), Some("f-docs"));
    }

    #[test]
    fn fixture_upload_chunk_request() {
        let req = roundtrip_test::<UploadChunkRequest>("upload_chunk_request.json");
        assert_eq!(req.data, b"hello");
        assert_eq!(req.index, 2);
    }

    #[test]
    fn fixture_session_request() {
        roundtrip_test::<SessionRequest>("session_request.json");
    }

    // --- Responses ---

    #[test]
    fn fixture_chunk_size_response() {
        let resp = roundtrip_test::<ChunkSizeResponse>("chunk_size_response.json");
        assert_eq!(resp.chunk_size, 5 * 1024 * 1024);
    }

    #[test]
    fn fixture_init_upload_response() {
        roundtrip_test::<InitUploadResponse>("init_upload_response.json");
    }

    #[test]
    fn fixture_session_status() {
        let status = roundtrip_test::<SessionStatus>("session_status.json");
        assert_eq!(status.missing(), vec![1]);
        assert!(!status.is_complete());
    }

    #[test]
    fn fixture_file_record() {
        let record = roundtrip_test::<FileRecord>("file_record.json");
        assert_eq!(record.created_at.timestamp(), 1_773_480_413);
    }

    #[test]
    fn fixture_operation_result() {
        let result = roundtrip_test::<OperationResult>("operation_result.json");
        assert!(result.success);
        assert!(result.message.is_empty());
    }

    // --- Binary frames ---

    #[test]
    fn fixture_chunk_header() {
        roundtrip_test::<ChunkHeader>("chunk_header.json");
    }

    #[test]
    fn binary_frame_layout() {
        let header: ChunkHeader = serde_json::from_str(&load_fixture("chunk_header.json")).unwrap();
        let frame = encode_chunk_frame(&header, b"hello").unwrap();

        let header_len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        let header_json: serde_json::Value =
            serde_json::from_slice(&frame[4..4 + header_len]).unwrap();
        assert_eq!(header_json, serde_json::to_value(&header).unwrap());
        assert_eq!(&frame[4 + header_len..], b"hello");

        let (parsed, data) = parse_chunk_frame(&frame).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(data, b"hello");
    }

    #[test]
    fn message_type_names() {
        let cases = [
            (MessageType::Ping, "ping"),
            (MessageType::GetChunkSize, "get_chunk_size"),
            (MessageType::InitUpload, "init_upload"),
            (MessageType::UploadChunk, "upload_chunk"),
            (MessageType::GetUploadStatus, "get_upload_status"),
            (MessageType::FinalizeUpload, "finalize_upload"),
            (MessageType::CancelUpload, "cancel_upload"),
            (MessageType::Pong, "pong"),
            (MessageType::ChunkSizeResponse, "chunk_size_response"),
            (MessageType::UploadInitResponse, "upload_init_response"),
            (MessageType::UploadChunkResponse, "upload_chunk_response"),
            (MessageType::UploadStatusResponse, "upload_status_response"),
            (MessageType::FinalizeResponse, "finalize_response"),
            (MessageType::OperationResult, "operation_result"),
            (MessageType::Error, "error"),
        ];
        for (msg_type, name) in cases {
            assert_eq!(serde_json::to_value(&msg_type).unwrap(), name);
        }
    }
}
