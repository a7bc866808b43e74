//! Protocol envelopes.
//!
//! Every message on a channel is either a [`Request`] (caller to worker) or
//! a [`Reply`] (worker to caller, tagged with a [`Status`]). Exactly one
//! payload field is populated per status; constructors enforce this.

use crate::context::RequestContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Phase of a request's lifecycle, as carried on the wire.
///
/// The protocol historically interpreted ad hoc fields; the closed enum
/// forces exhaustive handling. `Unknown` absorbs statuses from foreign or
/// older peers on deserialization so they can be discarded instead of
/// failing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// A worker claimed the job; the caller cancels its response timeout.
    Received,
    /// The handler began executing.
    Started,
    /// Periodic liveness signal for the duration of the handler.
    KeepAlive,
    /// Intermediate progress payload.
    Progress,
    /// Terminal success.
    Finished,
    /// Terminal failure.
    Error,
    /// Any status string this revision does not know.
    #[serde(other)]
    Unknown,
}

/// Worker-to-caller protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Lifecycle phase this reply announces.
    pub status: Status,
    /// Correlation id, echoed from the request when present.
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<String>,
    /// Present iff `status == Progress`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub progress: Option<Value>,
    /// Present iff `status == Finished`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response: Option<Value>,
    /// Present iff `status == Error`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl Reply {
    fn bare(status: Status) -> Self {
        Self {
            status,
            request_id: None,
            progress: None,
            response: None,
            error: None,
        }
    }

    /// A worker claimed the job.
    pub fn received() -> Self {
        Self::bare(Status::Received)
    }

    /// The handler began executing.
    pub fn started() -> Self {
        Self::bare(Status::Started)
    }

    /// Liveness signal while the handler runs.
    pub fn keep_alive() -> Self {
        Self::bare(Status::KeepAlive)
    }

    /// Intermediate progress.
    pub fn progress(info: Value) -> Self {
        Self {
            progress: Some(info),
            ..Self::bare(Status::Progress)
        }
    }

    /// Terminal success with a response payload.
    pub fn finished(response: Value) -> Self {
        Self {
            response: Some(response),
            ..Self::bare(Status::Finished)
        }
    }

    /// Terminal failure with the error text.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::bare(Status::Error)
        }
    }

    /// Interpret a decoded payload as a reply.
    ///
    /// Returns `None` for bodies without a recognizable status (plain
    /// strings, objects missing `status`, unknown status strings); those
    /// are discarded by the requester rather than treated as errors.
    pub fn from_value(value: &Value) -> Option<Self> {
        let reply: Self = serde_json::from_value(value.clone()).ok()?;
        if reply.status == Status::Unknown {
            return None;
        }
        Some(reply)
    }
}

/// Caller-to-worker protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Request {
    /// Correlation id propagated from the caller's context.
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<String>,
    /// Application payload.
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub data: Value,
}

impl Request {
    /// Build a request carrying the context's correlation id.
    pub fn new(data: Value, context: &RequestContext) -> Self {
        Self {
            request_id: context.request_id().map(str::to_string),
            data,
        }
    }

    /// Interpret a decoded payload as a request.
    ///
    /// Non-object bodies yield a null payload; workers tolerate peers that
    /// do not follow the envelope convention.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value(value) {
            Ok(request) => request,
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn statuses_serialize_kebab_case() {
        let wire = serde_json::to_value(Reply::keep_alive()).unwrap();
        assert_eq!(wire, json!({"status": "keep-alive"}));
        let wire = serde_json::to_value(Reply::received()).unwrap();
        assert_eq!(wire, json!({"status": "received"}));
    }

    #[test]
    fn exactly_one_payload_field_per_status() {
        let progress = serde_json::to_value(Reply::progress(json!(40))).unwrap();
        assert_eq!(progress, json!({"status": "progress", "progress": 40}));

        let finished = serde_json::to_value(Reply::finished(json!("ok"))).unwrap();
        assert_eq!(finished, json!({"status": "finished", "response": "ok"}));

        let error = serde_json::to_value(Reply::error("boom")).unwrap();
        assert_eq!(error, json!({"status": "error", "error": "boom"}));
    }

    #[test]
    fn unknown_status_is_discarded() {
        let value = json!({"status": "no-existing-status", "progress": "x"});
        assert!(Reply::from_value(&value).is_none());
    }

    #[test]
    fn missing_status_is_discarded() {
        assert!(Reply::from_value(&json!({})).is_none());
        assert!(Reply::from_value(&json!("plain string")).is_none());
    }

    #[test]
    fn known_reply_parses() {
        let value = json!({"status": "finished", "response": "response"});
        let reply = Reply::from_value(&value).unwrap();
        assert_eq!(reply.status, Status::Finished);
        assert_eq!(reply.response, Some(json!("response")));
    }

    #[test]
    fn request_carries_context_id() {
        let ctx = RequestContext::with_request_id("requestId");
        let wire = serde_json::to_value(Request::new(json!({"field": "value"}), &ctx)).unwrap();
        assert_eq!(
            wire,
            json!({"requestId": "requestId", "data": {"field": "value"}})
        );
    }

    #[test]
    fn request_without_context_omits_id() {
        let wire =
            serde_json::to_value(Request::new(json!({}), &RequestContext::default())).unwrap();
        assert_eq!(wire, json!({"data": {}}));
    }

    #[test]
    fn non_object_request_yields_null_payload() {
        let request = Request::from_value(json!("not an object"));
        assert_eq!(request.data, Value::Null);
        assert!(request.request_id.is_none());
    }
}
