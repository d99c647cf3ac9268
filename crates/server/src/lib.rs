//! Kite RPC server
//!
//! A [`KiteServer`] exposes a fixed set of named methods over one or more listeners. Each
//! accepted peer runs its own dispatch task:
//!
//! 1. unknown methods are answered with `methodNotFound`
//! 2. the method's [`AuthPolicy`] (or the server default) is checked against the
//!    credentials the peer presented with the `kite.authenticate` handshake
//! 3. the handler runs with the positional [`Args`] and a [`Responder`]
//!
//! ```no_run
//! use kite_server::{ErrorPayload, KiteServer, Method};
//!
//! # async fn run() -> kite_server::Result<()> {
//! let server = KiteServer::builder()
//!     .name("math")
//!     .method(
//!         "square",
//!         Method::sync(|args| {
//!             let x: i64 = args.arg(0)?;
//!             Ok::<_, ErrorPayload>(x * x)
//!         }),
//!     )
//!     .build()?;
//!
//! let url = server.listen(8080).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod auth;
mod config;
mod connection;
mod error;
mod registry;
mod responder;
mod server;

pub use auth::{AuthCaching, AuthNegotiator, AuthPolicy, AuthPredicate, AuthSession, CallContext};
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use registry::{HandlerFn, Method, MethodEntry, MethodRegistry};
pub use responder::Responder;
pub use server::{KiteServer, KiteServerBuilder};

// Re-export types handlers work with
pub use kite_protocol::{Args, ErrorPayload, Value, json};
