use std::fmt;

use serde::{Deserialize, Serialize};

/// Upper bound for the `Reason` field of a callback. The orchestrator rejects response
/// bodies above 4096 bytes, so the reason keeps well clear of that.
pub const MAX_REASON_BYTES: usize = 1024;

const TRUNCATION_MARKER: &str = "...";

/// Lifecycle actions the orchestrator can request for a custom resource.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum RequestType {
    Create,
    Update,
    Delete,
    /// Anything else, kept verbatim so it can be reported back.
    Unknown(String),
}

/// Matching is exact, as sent by the orchestrator.
impl From<&str> for RequestType {
    fn from(s: &str) -> Self {
        match s {
            "Create" => RequestType::Create,
            "Update" => RequestType::Update,
            "Delete" => RequestType::Delete,
            other => RequestType::Unknown(other.to_owned()),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RequestType::Create => write!(f, "Create"),
            RequestType::Update => write!(f, "Update"),
            RequestType::Delete => write!(f, "Delete"),
            RequestType::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

/// Result status reported back to the orchestrator.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResponseStatus::Success => write!(f, "SUCCESS"),
            ResponseStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// The body PUT to the pre-signed callback URL.
///
/// `physical_resource_id` always mirrors `logical_resource_id`: a changing physical id would
/// make the orchestrator treat an Update as a replacement and issue a Delete for the old one.
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct CallbackEnvelope {
    pub status: ResponseStatus,
    pub reason: String,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl CallbackEnvelope {
    pub fn new(
        status: ResponseStatus,
        reason: &str,
        stack_id: &str,
        request_id: &str,
        logical_resource_id: &str,
    ) -> Self {
        Self {
            status,
            reason: truncate_reason(reason, MAX_REASON_BYTES),
            physical_resource_id: logical_resource_id.to_owned(),
            stack_id: stack_id.to_owned(),
            request_id: request_id.to_owned(),
            logical_resource_id: logical_resource_id.to_owned(),
            data: serde_json::Map::new(),
        }
    }
}

/// Cut `reason` down to at most `max_bytes` bytes, never splitting a UTF-8 character.
/// A marker is appended when anything was dropped and it fits in the bound.
pub fn truncate_reason(reason: &str, max_bytes: usize) -> String {
    if reason.len() <= max_bytes {
        return reason.to_owned();
    }

    let marker = if max_bytes > TRUNCATION_MARKER.len() {
        TRUNCATION_MARKER
    } else {
        ""
    };

    let mut end = max_bytes - marker.len();
    while !reason.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}{}", &reason[..end], marker)
}
