use std::error::Error;

use http::StatusCode;
use thiserror::Error;

/// Enumeration of errors that end an invocation with a FAILED result.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("unsupported lifecycle action: {0}")]
    UnsupportedLifecycleAction(String),
    #[error("failed to subscribe any of {attempted} email addresses: {details}")]
    AllSubscriptionsFailed { attempted: usize, details: String },
}

/// Enumeration of errors that can occur while delivering a result to the callback URL.
/// Each variant names the cause, so it can be told apart in logs.
#[derive(Error, Debug)]
pub enum CallbackError {
    #[error("error parsing callback url: {0}")]
    ParseUrlError(#[from] url::ParseError),
    #[error("error serializing callback payload: {0}")]
    SerializeError(#[from] serde_json::Error),
    #[error("DNS resolution failed for callback url: {0}")]
    DnsError(reqwest::Error),
    #[error("connection failed to callback url: {0}")]
    ConnectionError(reqwest::Error),
    #[error("timeout sending callback: {0}")]
    TimeoutError(reqwest::Error),
    #[error("error sending callback: {0}")]
    RequestError(reqwest::Error),
    #[error("callback rejected with status {status}: {body}")]
    BadStatus { status: StatusCode, body: String },
}

impl From<reqwest::Error> for CallbackError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            CallbackError::TimeoutError(error)
        } else if error.is_connect() && is_dns_error(&error) {
            CallbackError::DnsError(error)
        } else if error.is_connect() {
            CallbackError::ConnectionError(error)
        } else {
            CallbackError::RequestError(error)
        }
    }
}

/// Check the error and its sources (recursively) for a name resolution failure.
/// The resolver error type is private to the connector, so it is recognized by its message.
pub fn is_dns_error(err: &(dyn Error + 'static)) -> bool {
    if err.to_string().starts_with("dns error") {
        return true;
    }
    match err.source() {
        None => false,
        Some(source) => is_dns_error(source),
    }
}
