//! Call frames and their JSON codec.

use crate::Result;
use crate::args::Args;
use crate::error::{ErrorPayload, ProtocolError};

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Identifier linking a request to its response.
pub type CorrelationId = u64;

/// A request naming a method.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id chosen by the caller.
    pub id: CorrelationId,
    /// Method name, never empty.
    pub method: String,
    /// Positional arguments.
    pub args: Args,
}

/// The outcome of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Correlation id of the request being answered.
    pub id: CorrelationId,
    /// Result or error.
    pub outcome: std::result::Result<Value, ErrorPayload>,
}

/// One transport-level message unit.
#[derive(Debug, Clone, PartialEq)]
pub enum CallFrame {
    /// Method invocation.
    Request(Request),
    /// Answer to an earlier request.
    Response(Response),
}

/// Shape on the wire. Every field is optional so that shape violations can be reported
/// together with the correlation id.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    args: Option<Args>,
    // `"result": null` is a result, not an absent field.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorPayload>,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Request {
    /// New request.
    pub fn new(id: CorrelationId, method: impl Into<String>, args: impl Into<Args>) -> Self {
        Self {
            id,
            method: method.into(),
            args: args.into(),
        }
    }
}

impl Response {
    /// Successful response.
    #[must_use]
    pub const fn ok(id: CorrelationId, result: Value) -> Self {
        Self {
            id,
            outcome: Ok(result),
        }
    }

    /// Failed response.
    #[must_use]
    pub const fn err(id: CorrelationId, error: ErrorPayload) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }
}

impl CallFrame {
    /// Correlation id of the frame.
    #[must_use]
    pub const fn id(&self) -> CorrelationId {
        match self {
            Self::Request(request) => request.id,
            Self::Response(response) => response.id,
        }
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be serialized.
    pub fn encode(&self) -> Result<Bytes> {
        let wire = match self {
            Self::Request(request) => WireFrame {
                id: Some(request.id),
                method: Some(request.method.clone()),
                args: Some(request.args.clone()),
                ..WireFrame::default()
            },
            Self::Response(response) => match &response.outcome {
                Ok(result) => WireFrame {
                    id: Some(response.id),
                    result: Some(result.clone()),
                    ..WireFrame::default()
                },
                Err(error) => WireFrame {
                    id: Some(response.id),
                    error: Some(error.clone()),
                    ..WireFrame::default()
                },
            },
        };

        serde_json::to_vec(&wire)
            .map(Bytes::from)
            .map_err(ProtocolError::Encode)
    }

    /// Parse JSON bytes into a frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Decode`] for input that is not a JSON object of the frame
    /// shape, and [`ProtocolError::Malformed`] (with the id when readable) for frames that
    /// are neither a valid request nor a valid response.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let wire: WireFrame = match serde_json::from_slice(data) {
            Ok(wire) => wire,
            Err(e) => {
                // Salvage the id so the peer can still be answered.
                let id = serde_json::from_slice::<Value>(data)
                    .ok()
                    .and_then(|value| value.get("id").and_then(Value::as_u64));
                return Err(match id {
                    Some(id) => ProtocolError::Malformed {
                        id: Some(id),
                        reason: e.to_string(),
                    },
                    None => ProtocolError::Decode(e),
                });
            }
        };

        let Some(id) = wire.id else {
            return Err(malformed(None, "missing id"));
        };

        match (wire.method, wire.result, wire.error) {
            (Some(method), None, None) => {
                if method.is_empty() {
                    return Err(malformed(Some(id), "empty method name"));
                }
                Ok(Self::Request(Request {
                    id,
                    method,
                    args: wire.args.unwrap_or_default(),
                }))
            }
            (Some(_), _, _) => Err(malformed(Some(id), "request carries a result or error")),
            (None, Some(result), None) => Ok(Self::Response(Response::ok(id, result))),
            (None, None, Some(error)) => Ok(Self::Response(Response::err(id, error))),
            (None, Some(_), Some(_)) => Err(malformed(Some(id), "both result and error")),
            (None, None, None) => Err(malformed(Some(id), "neither method nor outcome")),
        }
    }
}

impl From<Request> for CallFrame {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for CallFrame {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

fn malformed(id: Option<CorrelationId>, reason: &str) -> ProtocolError {
    ProtocolError::Malformed {
        id,
        reason: reason.to_string(),
    }
}
