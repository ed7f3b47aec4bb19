//! Clock abstraction for protocol deadlines
//!
//! Connect, handshake and quiet-period deadlines all go through [`Clock`]
//! so tests can drive time deterministically instead of sleeping.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic time source used by sessions and the key-share collector
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current monotonic instant
    fn now(&self) -> Instant;

    /// Resolve once `deadline` has passed
    async fn sleep_until(&self, deadline: Instant);

    /// Resolve after `duration`
    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }
}

/// Tokio timer-backed clock.
///
/// Under `#[tokio::test(start_paused = true)]` this clock auto-advances,
/// which is how the crate's timeout tests stay deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

#[async_trait]
impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        (**self).sleep_until(deadline).await;
    }
}

/// Race `future` against `duration` on `clock`; `None` means the deadline won
pub async fn with_deadline<C, F>(clock: &C, duration: Duration, future: F) -> Option<F::Output>
where
    C: Clock + ?Sized,
    F: Future,
{
    let deadline = clock.now() + duration;
    tokio::select! {
        output = future => Some(output),
        _ = clock.sleep_until(deadline) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_wins_over_pending_future() {
        let clock = TokioClock;
        let started = clock.now();
        let result = with_deadline(&clock, Duration::from_secs(10), std::future::pending::<()>()).await;
        assert!(result.is_none());
        assert!(clock.now() - started >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_future_beats_deadline() {
        let clock = TokioClock;
        let result = with_deadline(&clock, Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result, Some(7));
    }
}
