//! Wire-level types for the kite RPC protocol.
//!
//! Everything that crosses a transport is a [`CallFrame`]: either a request naming a
//! method with positional [`Args`], or a response carrying exactly one of a result or an
//! [`ErrorPayload`]. Frames are encoded as JSON objects:
//!
//! ```text
//! { "id": 7, "method": "square", "args": [5] }
//! { "id": 7, "result": 25 }
//! { "id": 8, "error": { "message": "no such method: cube", "code": "methodNotFound" } }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod args;
mod auth;
mod error;
mod frame;

pub use args::Args;
pub use auth::{AUTHENTICATE_METHOD, AuthStatus};
pub use error::{ErrorKind, ErrorPayload, ProtocolError, codes};
pub use frame::{CallFrame, CorrelationId, Request, Response};

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Re-export dependencies that are part of our public API
pub use bytes::Bytes;
pub use serde_json::{Value, json};
