//! Error types for queue operations.

use thiserror::Error;
use transport::TransportError;

/// Error that can occur in queue operations.
///
/// Every terminal outcome of a request is a single settlement: success, or
/// exactly one of these rejections. There is no silent failure path.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Request data could not be serialized for transport.
    ///
    /// Raised synchronously by `request`/`publish`/`progress`; the offending
    /// payload is logged at the call site before this propagates.
    #[error("failed to convert request data to string: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },

    /// No worker acknowledged the request within the configured timeout.
    /// Recoverable by retrying the request.
    #[error("Timeout for queue request to channel: {channel}")]
    Timeout {
        /// Channel the request was sent on.
        channel: String,
    },

    /// A worker acknowledged the request but then went silent for twice the
    /// configured timeout. Signals a likely worker crash or hang;
    /// recoverable by retrying the request.
    #[error("Keep-alive expired for queue request to channel: {channel}")]
    KeepAliveExpired {
        /// Channel the request was sent on.
        channel: String,
    },

    /// A reply could not be interpreted as a valid envelope.
    #[error("queue: '{channel}' failed to parse response: '{raw}' as json")]
    Malformed {
        /// Channel the request was sent on.
        channel: String,
        /// Raw reply payload, for diagnosis.
        raw: String,
    },

    /// The handler explicitly failed the job. The message is the worker's
    /// error text verbatim, so callers can match on application-specific
    /// content.
    #[error("{0}")]
    App(String),

    /// Transport-level failure while sending.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid queue configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The request terminated without producing a result. Only reachable if
    /// the requester task is torn down mid-flight (runtime shutdown).
    #[error("request settled without a result")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_names_the_channel() {
        let err = QueueError::Timeout {
            channel: "myChannel".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Timeout for queue request to channel: myChannel"
        );
    }

    #[test]
    fn app_error_is_verbatim() {
        let err = QueueError::App("error message".to_string());
        assert_eq!(err.to_string(), "error message");
    }

    #[test]
    fn malformed_carries_raw_payload() {
        let err = QueueError::Malformed {
            channel: "myChannel".to_string(),
            raw: "not-base64!".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "queue: 'myChannel' failed to parse response: 'not-base64!' as json"
        );
    }
}
