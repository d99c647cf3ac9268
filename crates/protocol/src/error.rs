//! Error payloads carried in response frames, and codec errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Well-known values of [`ErrorPayload::code`].
pub mod codes {
    /// The requested method is not registered.
    pub const METHOD_NOT_FOUND: &str = "methodNotFound";
    /// The method needs credentials and none were presented.
    pub const AUTHENTICATION_REQUIRED: &str = "authenticationRequired";
    /// The presented credentials were rejected.
    pub const AUTHENTICATION_FAILED: &str = "authenticationFailed";
    /// The request frame could not be understood.
    pub const MALFORMED_FRAME: &str = "malformedFrame";
    /// The arguments did not fit the handler.
    pub const INVALID_ARGUMENTS: &str = "invalidArguments";
}

/// Error carried by a response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ErrorPayload {
    /// Human-readable message.
    pub message: String,
    /// Machine-readable code, see [`codes`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Arbitrary structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Classification of an [`ErrorPayload`] by its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown method.
    MethodNotFound,
    /// Credentials missing.
    AuthenticationRequired,
    /// Credentials rejected.
    AuthenticationFailed,
    /// Unparseable request.
    MalformedFrame,
    /// Arguments rejected by the handler.
    InvalidArguments,
    /// Anything raised by a handler.
    Application,
}

impl ErrorPayload {
    /// Payload with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            details: None,
        }
    }

    /// Set the code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// No method registered under `method`.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(format!("no such method: {method}")).with_code(codes::METHOD_NOT_FOUND)
    }

    /// `method` needs credentials that were never presented.
    pub fn authentication_required(method: &str) -> Self {
        Self::new(format!("authentication required for {method}"))
            .with_code(codes::AUTHENTICATION_REQUIRED)
    }

    /// Presented credentials do not grant `method`.
    pub fn authentication_failed(method: &str) -> Self {
        Self::new(format!("authentication failed for {method}"))
            .with_code(codes::AUTHENTICATION_FAILED)
    }

    /// Request could not be parsed.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::new(format!("malformed frame: {}", reason.into()))
            .with_code(codes::MALFORMED_FRAME)
    }

    /// Arguments did not fit.
    pub fn invalid_arguments(reason: impl Into<String>) -> Self {
        Self::new(format!("invalid arguments: {}", reason.into()))
            .with_code(codes::INVALID_ARGUMENTS)
    }

    /// Classify by code.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self.code.as_deref() {
            Some(codes::METHOD_NOT_FOUND) => ErrorKind::MethodNotFound,
            Some(codes::AUTHENTICATION_REQUIRED) => ErrorKind::AuthenticationRequired,
            Some(codes::AUTHENTICATION_FAILED) => ErrorKind::AuthenticationFailed,
            Some(codes::MALFORMED_FRAME) => ErrorKind::MalformedFrame,
            Some(codes::INVALID_ARGUMENTS) => ErrorKind::InvalidArguments,
            _ => ErrorKind::Application,
        }
    }
}

impl From<String> for ErrorPayload {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ErrorPayload {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Errors while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON or does not have the frame shape at all.
    #[error("Failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// Frame could not be serialized.
    #[error("Failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),

    /// Frame parsed but violates the request/response rules.
    #[error("Malformed frame: {reason}")]
    Malformed {
        /// Correlation id, when one could be read.
        id: Option<u64>,
        /// What was wrong.
        reason: String,
    },
}

impl ProtocolError {
    /// Correlation id of the offending frame, if known.
    #[must_use]
    pub const fn correlation_id(&self) -> Option<u64> {
        match self {
            Self::Malformed { id, .. } => *id,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_from_code() {
        assert_eq!(
            ErrorPayload::method_not_found("cube").kind(),
            ErrorKind::MethodNotFound
        );
        assert_eq!(
            ErrorPayload::new("boom").with_code("E_BOOM").kind(),
            ErrorKind::Application
        );
    }

    #[test]
    fn test_optional_fields_omitted() {
        let payload = ErrorPayload::new("boom");
        assert_eq!(serde_json::to_value(&payload).unwrap(), json!({ "message": "boom" }));
    }
}
