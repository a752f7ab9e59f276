use serde_json::{Map, Value};

use crate::errors::{CallError, DecodeError};
use crate::events::{EventFrame, Frame, ResponseFrame, ResponseOutcome};

/// Wire field names. Fixed by the remote runtime contract.
pub mod fields {
    pub const ACTION: &str = "action";
    pub const MESSAGE_ID: &str = "messageId";
    pub const PAYLOAD: &str = "payload";
    pub const SUCCESS: &str = "success";
    pub const DATA: &str = "data";
    pub const REASON: &str = "reason";
}

const UNKNOWN_REMOTE_ERROR: &str = "unknown remote error";

/// Encode one outbound request as `{"action", "messageId", "payload"}`.
/// Allocation: one byte vector. Complexity: O(payload size).
pub fn encode_request(action: &str, message_id: u64, payload: &Value) -> Result<Vec<u8>, CallError> {
    let mut message = Map::<String, Value>::new();
    message.insert(fields::ACTION.to_owned(), Value::String(action.to_owned()));
    message.insert(fields::MESSAGE_ID.to_owned(), Value::Number(message_id.into()));
    message.insert(fields::PAYLOAD.to_owned(), payload.clone());
    serde_json::to_vec(&Value::Object(message))
        .map_err(|err| CallError::Encode(format!("{action}: {err}")))
}

/// Encode a reply the way the remote runtime does. Used by in-process bridges.
pub fn encode_response(frame: &ResponseFrame) -> Vec<u8> {
    let mut message = Map::<String, Value>::new();
    message.insert(
        fields::MESSAGE_ID.to_owned(),
        Value::Number(frame.message_id.into()),
    );
    match &frame.outcome {
        ResponseOutcome::Success(data) => {
            message.insert(fields::SUCCESS.to_owned(), Value::Bool(true));
            message.insert(fields::DATA.to_owned(), data.clone());
        }
        ResponseOutcome::Failure(reason) => {
            message.insert(fields::SUCCESS.to_owned(), Value::Bool(false));
            message.insert(fields::REASON.to_owned(), Value::String(reason.clone()));
        }
    }
    Value::Object(message).to_string().into_bytes()
}

/// Encode a server push the way the remote runtime does. Used by in-process bridges.
pub fn encode_event(frame: &EventFrame) -> Vec<u8> {
    let mut message = Map::<String, Value>::new();
    message.insert(fields::ACTION.to_owned(), Value::String(frame.topic.clone()));
    message.insert(fields::PAYLOAD.to_owned(), frame.payload.clone());
    Value::Object(message).to_string().into_bytes()
}

/// Decode one inbound frame.
/// A frame carrying `messageId` is a response; anything else must carry an
/// `action` naming the event topic.
/// Allocation: parsed JSON tree. Complexity: O(frame size).
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, DecodeError> {
    let json: Value =
        serde_json::from_slice(bytes).map_err(|err| DecodeError::Json(err.to_string()))?;
    let Value::Object(mut obj) = json else {
        return Err(DecodeError::NotAnObject);
    };

    if let Some(raw_id) = obj.get(fields::MESSAGE_ID) {
        let message_id = parse_message_id(raw_id).ok_or(DecodeError::InvalidMessageId)?;
        let success = obj
            .get(fields::SUCCESS)
            .and_then(Value::as_bool)
            .ok_or(DecodeError::MissingSuccess)?;
        let outcome = if success {
            ResponseOutcome::Success(obj.remove(fields::DATA).unwrap_or(Value::Null))
        } else {
            ResponseOutcome::Failure(failure_reason(obj.remove(fields::REASON)))
        };
        return Ok(Frame::Response(ResponseFrame {
            message_id,
            outcome,
        }));
    }

    let topic = match obj.remove(fields::ACTION) {
        Some(Value::String(topic)) if !topic.is_empty() => topic,
        _ => return Err(DecodeError::MissingTopic),
    };
    let payload = obj.remove(fields::PAYLOAD).unwrap_or(Value::Null);
    Ok(Frame::Event(EventFrame { topic, payload }))
}

fn parse_message_id(raw: &Value) -> Option<u64> {
    match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn failure_reason(raw: Option<Value>) -> String {
    match raw {
        Some(Value::String(reason)) => reason,
        Some(Value::Null) | None => UNKNOWN_REMOTE_ERROR.to_owned(),
        Some(other) => other.to_string(),
    }
}
