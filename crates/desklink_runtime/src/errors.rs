use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a pending call was drained without a response.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DisconnectReason {
    TransportLost,
    Closed,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransportLost => f.write_str("transport lost"),
            Self::Closed => f.write_str("session closed"),
        }
    }
}

#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RuntimeError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("session is closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Per-call failure, always delivered to the caller that issued the call.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CallError {
    #[error("session is not connected")]
    NotConnected,
    #[error("call timed out")]
    Timeout,
    #[error("disconnected while call was pending: {0}")]
    Disconnected(DisconnectReason),
    #[error("call was cancelled")]
    Cancelled,
    #[error("remote error: {0}")]
    Remote(String),
    #[error("failed to encode request: {0}")]
    Encode(String),
    #[error("request id {0} is already pending")]
    DuplicateRequestId(u64),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame is not valid json: {0}")]
    Json(String),
    #[error("frame is not a json object")]
    NotAnObject,
    #[error("response frame has invalid messageId")]
    InvalidMessageId,
    #[error("response frame is missing success flag")]
    MissingSuccess,
    #[error("event frame is missing action")]
    MissingTopic,
}

/// Error returned by an event listener. Isolated by the router.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("listener failed: {message}")]
pub struct ListenerError {
    pub message: String,
}

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
