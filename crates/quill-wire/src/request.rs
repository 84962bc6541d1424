use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

pub const STOP_FRAME_TYPE: &str = "stop";

/// Enumerates supported `WireError` values.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("job owner id cannot be empty")]
    EmptyOwnerId,
    #[error("failed to serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Opaque identifier of the template or proposal a job runs against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobOwnerId(String);

impl JobOwnerId {
    pub fn new(raw: impl Into<String>) -> Result<Self, WireError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(WireError::EmptyOwnerId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for JobOwnerId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl FromStr for JobOwnerId {
    type Err = WireError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::new(raw)
    }
}

impl fmt::Display for JobOwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller identity threaded explicitly into every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Option<String>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Self::anonymous();
        }
        Self {
            user_id: Some(user_id.trim().to_string()),
        }
    }
}

/// One job request. Fields are fixed at construction; the session takes
/// ownership when the job starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    job_owner_id: JobOwnerId,
    pitch: Option<String>,
    one_off_info: IndexMap<String, String>,
    context: RequestContext,
}

impl JobRequest {
    pub fn new(job_owner_id: JobOwnerId) -> Self {
        Self {
            job_owner_id,
            pitch: None,
            one_off_info: IndexMap::new(),
            context: RequestContext::anonymous(),
        }
    }

    pub fn with_pitch(mut self, pitch: impl Into<String>) -> Self {
        let pitch = pitch.into();
        self.pitch = if pitch.trim().is_empty() {
            None
        } else {
            Some(pitch)
        };
        self
    }

    /// Adds a one-off field; a repeated key replaces the earlier value.
    pub fn with_one_off(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.one_off_info.insert(key.into(), value.into());
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn job_owner_id(&self) -> &JobOwnerId {
        &self.job_owner_id
    }

    pub fn pitch(&self) -> Option<&str> {
        self.pitch.as_deref()
    }

    pub fn one_off_info(&self) -> &IndexMap<String, String> {
        &self.one_off_info
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }
}

/// Where the owner id travels in the initiation handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerIdPlacement {
    /// Encoded in the endpoint path; omitted from the frame body.
    Path,
    /// Sent as a named member of the frame body.
    BodyField(&'static str),
}

/// Encodes the initiation frame sent once, right after the channel opens.
pub fn encode_request(
    request: &JobRequest,
    placement: OwnerIdPlacement,
) -> Result<String, WireError> {
    let mut frame = Map::new();
    if let OwnerIdPlacement::BodyField(field) = placement {
        frame.insert(
            field.to_string(),
            Value::String(request.job_owner_id.as_str().to_string()),
        );
    }
    if let Some(pitch) = request.pitch() {
        frame.insert("pitch".to_string(), Value::String(pitch.to_string()));
    }
    frame.insert(
        "one_off_info".to_string(),
        serde_json::to_value(&request.one_off_info)?,
    );
    if let Some(user_id) = request.context.user_id.as_deref() {
        frame.insert("user_id".to_string(), Value::String(user_id.to_string()));
    }
    Ok(serde_json::to_string(&Value::Object(frame))?)
}

pub fn encode_stop() -> String {
    json!({ "type": STOP_FRAME_TYPE }).to_string()
}
