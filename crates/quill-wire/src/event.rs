use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const ERROR_WITHOUT_MESSAGE: &str = "server reported an error without a message";
const TOP_LEVEL_RESULT_MEMBERS: [&str; 3] = ["pre_plan", "plan", "sections"];

/// Which stream an incremental unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialKind {
    Section,
    PrePlan,
    Plan,
}

impl PartialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Section => "section",
            Self::PrePlan => "pre_plan",
            Self::Plan => "plan",
        }
    }
}

impl fmt::Display for PartialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Partial { kind: PartialKind, unit: Value },
    /// Server-side view of the full result; `Value::Null` when the frame
    /// carried no payload.
    Complete { result: Value },
    Failed { message: String },
    Heartbeat { sequence: u64 },
    Unknown { reason: String },
}

impl InboundEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Partial { kind, .. } => kind.as_str(),
            Self::Complete { .. } => "complete",
            Self::Failed { .. } => "error",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Unknown { .. } => "unknown",
        }
    }

    fn unknown(reason: impl Into<String>) -> Self {
        Self::Unknown {
            reason: reason.into(),
        }
    }
}

/// Decodes one text frame. Never fails; unclassifiable input maps to
/// [`InboundEvent::Unknown`].
pub fn decode_event(raw: &str) -> InboundEvent {
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(error) => return InboundEvent::unknown(format!("invalid json frame: {error}")),
    };
    let Value::Object(frame) = value else {
        return InboundEvent::unknown("frame is not a json object");
    };
    let tag = match frame.get("type") {
        Some(Value::String(tag)) => tag.clone(),
        Some(_) => return InboundEvent::unknown("frame type is not a string"),
        None => return InboundEvent::unknown("frame has no type"),
    };

    match tag.as_str() {
        "section" => decode_partial(PartialKind::Section, frame),
        "pre_plan" => decode_partial(PartialKind::PrePlan, frame),
        "plan" => decode_partial(PartialKind::Plan, frame),
        "complete" => decode_complete(frame),
        "error" => decode_failure(&frame),
        "heartbeat" => decode_heartbeat(&frame),
        other => InboundEvent::unknown(format!("unrecognized frame type '{other}'")),
    }
}

/// Decodes one binary frame; payloads that are not UTF-8 are unknown.
pub fn decode_event_bytes(raw: &[u8]) -> InboundEvent {
    match std::str::from_utf8(raw) {
        Ok(text) => decode_event(text),
        Err(error) => InboundEvent::unknown(format!("invalid utf-8 frame: {error}")),
    }
}

fn decode_partial(kind: PartialKind, mut frame: Map<String, Value>) -> InboundEvent {
    match frame.shift_remove("data") {
        None | Some(Value::Null) => InboundEvent::unknown(format!("{kind} frame has no data")),
        Some(unit) => InboundEvent::Partial { kind, unit },
    }
}

fn decode_complete(mut frame: Map<String, Value>) -> InboundEvent {
    if let Some(data) = frame.shift_remove("data").filter(|data| !data.is_null()) {
        return InboundEvent::Complete { result: data };
    }
    // The planning endpoint sends `pre_plan` and `plan` beside `type`.
    // Other top-level members are metadata and never become the result.
    let lifted: Map<String, Value> = TOP_LEVEL_RESULT_MEMBERS
        .iter()
        .filter_map(|key| {
            frame
                .shift_remove(*key)
                .map(|value| ((*key).to_string(), value))
        })
        .collect();
    let result = if lifted.is_empty() {
        Value::Null
    } else {
        Value::Object(lifted)
    };
    InboundEvent::Complete { result }
}

fn decode_failure(frame: &Map<String, Value>) -> InboundEvent {
    let message = ["message", "data"]
        .iter()
        .filter_map(|key| frame.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|message| !message.is_empty())
        .unwrap_or(ERROR_WITHOUT_MESSAGE);
    InboundEvent::Failed {
        message: message.to_string(),
    }
}

fn decode_heartbeat(frame: &Map<String, Value>) -> InboundEvent {
    let counter = frame.get("sequence").or_else(|| frame.get("count"));
    match counter {
        None | Some(Value::Null) => InboundEvent::Heartbeat { sequence: 0 },
        Some(value) => match value.as_u64() {
            Some(sequence) => InboundEvent::Heartbeat { sequence },
            None => InboundEvent::unknown("heartbeat counter is not a non-negative integer"),
        },
    }
}
