//! Tick-granular suspension for async lifecycle code.
//!
//! The machine resumes an in-flight lifecycle future once per
//! [`StateMachine::tick`](super::StateMachine::tick). A future that awaits
//! [`next_tick`] therefore yields back to the caller and continues on the
//! following tick.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future that stays pending for exactly one poll.
#[derive(Debug, Default)]
#[must_use = "futures do nothing unless awaited"]
pub struct NextTick {
    yielded: bool,
}

impl Future for NextTick {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Suspends until the next tick.
pub fn next_tick() -> NextTick {
    NextTick::default()
}

/// Suspends for `n` ticks. `wait_ticks(0)` completes immediately.
pub async fn wait_ticks(n: u32) {
    for _ in 0..n {
        next_tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_next_tick_pends_once() {
        let mut fut = task::spawn(next_tick());
        assert_pending!(fut.poll());
        assert!(fut.is_woken());
        assert_ready!(fut.poll());
    }

    #[test]
    fn test_wait_ticks_counts_polls() {
        let mut fut = task::spawn(wait_ticks(3));
        assert_pending!(fut.poll());
        assert_pending!(fut.poll());
        assert_pending!(fut.poll());
        assert_ready!(fut.poll());
    }

    #[test]
    fn test_wait_zero_ticks_is_ready() {
        let mut fut = task::spawn(wait_ticks(0));
        assert_ready!(fut.poll());
    }
}
