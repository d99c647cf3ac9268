//! Reconnection timer owned by the connection driver. At most one attempt is scheduled.

use crate::config::ReconnectPolicy;

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Sleep, sleep};

#[derive(Debug)]
pub(crate) struct ReconnectSchedule {
    policy: ReconnectPolicy,
    attempts: u32,
    timer: Option<Pin<Box<Sleep>>>,
}

impl ReconnectSchedule {
    pub(crate) const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            timer: None,
        }
    }

    /// Arm the timer for the next attempt, replacing any armed one.
    ///
    /// Returns `None` once `max_attempts` is used up.
    pub(crate) fn schedule(&mut self) -> Option<Duration> {
        self.timer = None;

        if self
            .policy
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
        {
            return None;
        }

        self.attempts += 1;
        let delay = self.policy.backoff_for_attempt(self.attempts);
        self.timer = Some(Box::pin(sleep(delay)));
        Some(delay)
    }

    /// Disarm the timer. Returns whether one was armed.
    pub(crate) fn cancel(&mut self) -> bool {
        self.timer.take().is_some()
    }

    /// Start counting attempts from scratch.
    pub(crate) fn reset(&mut self) {
        self.attempts = 0;
    }

    pub(crate) const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) const fn is_scheduled(&self) -> bool {
        self.timer.is_some()
    }

    /// Resolves when the armed timer fires, never when none is armed.
    pub(crate) async fn fired(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => {
                timer.as_mut().await;
                self.timer = None;
            }
            None => pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: Option<u32>) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            multiplier: 2.0,
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_backoff() {
        let mut schedule = ReconnectSchedule::new(policy(None));

        assert_eq!(schedule.schedule(), Some(Duration::from_millis(10)));
        assert!(schedule.is_scheduled());

        schedule.fired().await;
        assert!(!schedule.is_scheduled());

        assert_eq!(schedule.schedule(), Some(Duration::from_millis(20)));
        assert_eq!(schedule.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let mut schedule = ReconnectSchedule::new(policy(Some(2)));

        assert!(schedule.schedule().is_some());
        assert!(schedule.schedule().is_some());
        assert_eq!(schedule.schedule(), None);
        assert!(!schedule.is_scheduled());

        schedule.reset();
        assert!(schedule.schedule().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let mut schedule = ReconnectSchedule::new(policy(None));

        assert!(!schedule.cancel());
        schedule.schedule();
        assert!(schedule.cancel());

        let fired = tokio::time::timeout(Duration::from_secs(1), schedule.fired()).await;
        assert!(fired.is_err());
    }
}
