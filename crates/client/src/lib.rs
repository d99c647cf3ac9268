//! Kite RPC client
//!
//! A [`Kite`] keeps one connection to a server, reconnecting with backoff when the link
//! drops. Calls are multiplexed over the connection by correlation id and may complete in
//! any order; each [`Call`] resolves exactly once.
//!
//! ```no_run
//! use kite_client::{Kite, ReadyState, json};
//!
//! # async fn run() -> kite_client::Result<()> {
//! let kite = Kite::new("ws://localhost:8080/")?;
//! kite.wait_for(ReadyState::Open).await?;
//!
//! let squared: i64 = kite.tell("square", json!(5)).decode().await?;
//! assert_eq!(squared, 25);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod call;
mod config;
mod driver;
mod error;
mod kite;
mod multiplexer;
mod reconnect;
mod state;

pub use call::{Call, Finally};
pub use config::{ClientConfig, ReconnectPolicy};
pub use error::{Error, Result};
pub use kite::{ClientBuilder, Kite};
pub use state::{Event, ReadyState};

pub use kite_protocol::{Args, AuthStatus, ErrorKind, ErrorPayload, Value, json};
pub use kite_transport::CloseFrame;
