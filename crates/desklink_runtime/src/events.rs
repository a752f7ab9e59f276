use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reply to one request, correlated by `message_id`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFrame {
    pub message_id: u64,
    pub outcome: ResponseOutcome,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ResponseOutcome {
    Success(Value),
    Failure(String),
}

impl ResponseFrame {
    pub fn success(message_id: u64, data: Value) -> Self {
        Self {
            message_id,
            outcome: ResponseOutcome::Success(data),
        }
    }

    pub fn failure(message_id: u64, reason: impl Into<String>) -> Self {
        Self {
            message_id,
            outcome: ResponseOutcome::Failure(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Success(_))
    }
}

/// Server-initiated push, not correlated to any request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    pub topic: String,
    pub payload: Value,
}

impl EventFrame {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Decoded inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Response(ResponseFrame),
    Event(EventFrame),
}
