use serde::{Deserialize, Serialize};

use crate::constants::MessageType;

/// Error details in a WebSocket message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    /// Machine-readable error kind, e.g. `incomplete_upload`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub message: String,
}

impl std::fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.code, self.kind, self.message)
    }
}

/// Envelope for all WebSocket communication.
///
/// The `payload` field uses `serde_json::value::RawValue` to defer
/// deserialization until the receiver knows which type to expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<serde_json::value::RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Message {
    /// Creates a new message with the given type and payload.
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let raw = match payload {
            Some(p) => {
                let json = serde_json::to_string(p)?;
                Some(serde_json::value::RawValue::from_string(json)?)
            }
            None => None,
        };
        Ok(Self {
            id: id.into(),
            msg_type,
            payload: raw,
            error: None,
        })
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Creates an error message.
    pub fn error(
        id: impl Into<String>,
        code: i32,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            msg_type: MessageType::Error,
            payload: None,
            error: Some(ErrorBody {
                code,
                kind: kind.into(),
                message: message.into(),
            }),
        }
    }

    /// Creates a response message for this request.
    pub fn reply<T: Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Message::new(&self.id, msg_type, payload)
    }

    /// Splits a response into its success envelope or its error body.
    pub fn into_result(self) -> Result<Self, ErrorBody> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    /// Creates an error response for this request.
    pub fn reply_error(
        &self,
        code: i32,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Message::error(&self.id, code, kind, message)
    }
}
