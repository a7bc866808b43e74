//! Explicit request context.
//!
//! The correlation id is propagated, never generated here: a caller that
//! already has one (from an HTTP request, a parent job, ...) threads it
//! through so every nested request and log line shares it. The context is
//! passed through call boundaries explicitly; there is no process-wide
//! ambient state.

/// Per-request context carried across call boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    request_id: Option<String>,
}

impl RequestContext {
    /// An empty context with no correlation id.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context carrying the given correlation id.
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
        }
    }

    /// Rebuild the context a request envelope was sent with.
    pub(crate) fn from_envelope(request_id: Option<String>) -> Self {
        Self { request_id }
    }

    /// The correlation id, when one is set.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}
