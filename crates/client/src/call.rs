//! Deferred call results.

use crate::driver::Command;
use crate::error::{Error, Result};

use kite_protocol::{CorrelationId, Value};
use pin_project::{pin_project, pinned_drop};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Sleep, sleep_until};

enum Outcome {
    Ready(Option<Result<Value>>),
    Waiting(oneshot::Receiver<Result<Value>>),
}

struct Deadline {
    at: Instant,
    timeout: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

/// The eventual outcome of [`Kite::tell`](crate::Kite::tell).
///
/// Resolves exactly once: with the server's result, or with an error. Dropping an unresolved
/// call removes it from the connection; a response arriving afterwards is discarded.
#[must_use = "a call does nothing useful unless awaited"]
pub struct Call {
    id: Option<CorrelationId>,
    outcome: Outcome,
    deadline: Option<Deadline>,
    commands: mpsc::UnboundedSender<Command>,
    settled: bool,
}

impl Call {
    pub(crate) fn ready(outcome: Result<Value>, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            id: None,
            outcome: Outcome::Ready(Some(outcome)),
            deadline: None,
            commands,
            settled: false,
        }
    }

    pub(crate) fn waiting(
        id: CorrelationId,
        completion: oneshot::Receiver<Result<Value>>,
        timeout: Option<Duration>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            id: Some(id),
            outcome: Outcome::Waiting(completion),
            deadline: timeout.map(|timeout| Deadline {
                at: Instant::now() + timeout,
                timeout,
                sleep: None,
            }),
            commands,
            settled: false,
        }
    }

    /// Correlation id, `None` for calls rejected before being issued.
    #[must_use]
    pub const fn id(&self) -> Option<CorrelationId> {
        self.id
    }

    /// Deserialize a successful result into `T`.
    ///
    /// # Errors
    ///
    /// Returns the call's error, or [`Error::Decode`] when the result does not fit `T`.
    pub async fn decode<T: DeserializeOwned>(self) -> Result<T> {
        let value = self.await?;
        serde_json::from_value(value).map_err(Error::Decode)
    }

    /// Run `hook` once when the call completes or is dropped, whichever comes first.
    pub fn finally<G: FnOnce()>(self, hook: G) -> Finally<Self, G> {
        Finally {
            future: self,
            hook: Some(hook),
        }
    }

    fn forget(&self) {
        if let Some(id) = self.id {
            let _ = self.commands.send(Command::Forget(id));
        }
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("timeout", &self.deadline.as_ref().map(|d| d.timeout))
            .field("settled", &self.settled)
            .finish_non_exhaustive()
    }
}

impl Future for Call {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if this.settled {
            return Poll::Pending;
        }

        let receiver = match &mut this.outcome {
            Outcome::Ready(outcome) => {
                return match outcome.take() {
                    Some(outcome) => {
                        this.settled = true;
                        Poll::Ready(outcome)
                    }
                    None => Poll::Pending,
                };
            }
            Outcome::Waiting(receiver) => receiver,
        };

        if let Poll::Ready(received) = Pin::new(receiver).poll(cx) {
            this.settled = true;
            // A dropped completion means the driver is gone.
            return Poll::Ready(received.unwrap_or(Err(Error::Shutdown)));
        }

        let timed_out = this.deadline.as_mut().and_then(|deadline| {
            let at = deadline.at;
            let sleep = deadline
                .sleep
                .get_or_insert_with(|| Box::pin(sleep_until(at)));
            sleep.as_mut().poll(cx).is_ready().then_some(deadline.timeout)
        });

        match timed_out {
            Some(timeout) => {
                this.settled = true;
                this.forget();
                Poll::Ready(Err(Error::Timeout(timeout)))
            }
            None => Poll::Pending,
        }
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        if !self.settled {
            self.forget();
        }
    }
}

/// Future returned by [`Call::finally`].
#[pin_project(PinnedDrop)]
pub struct Finally<F, G: FnOnce()> {
    #[pin]
    future: F,
    hook: Option<G>,
}

impl<F: Future, G: FnOnce()> Future for Finally<F, G> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let output = ready!(this.future.poll(cx));
        if let Some(hook) = this.hook.take() {
            hook();
        }
        Poll::Ready(output)
    }
}

#[pinned_drop]
impl<F, G: FnOnce()> PinnedDrop for Finally<F, G> {
    fn drop(self: Pin<&mut Self>) {
        if let Some(hook) = self.project().hook.take() {
            hook();
        }
    }
}
