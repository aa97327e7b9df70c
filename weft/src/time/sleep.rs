use crate::context;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Suspend the current task for at least `duration`.
///
/// The actual wake-up happens on the reactor's next pass after the deadline
/// and is never early; scheduler latency may make it late.
pub fn sleep(duration: Duration) -> Sleep {
    sleep_until(Instant::now() + duration)
}

/// Suspend the current task until `deadline` has passed.
pub fn sleep_until(deadline: Instant) -> Sleep {
    Sleep {
        deadline,
        armed: false,
    }
}

/// Future returned by [`sleep`] and [`sleep_until`].
#[derive(Debug)]
pub struct Sleep {
    deadline: Instant,

    /// Whether a timer entry for this future already sits in the reactor
    /// heap. Armed entries stay valid until expiry, so a spurious poll must
    /// not arm a second one.
    armed: bool,
}

impl Sleep {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if Instant::now() >= self.deadline {
            return Poll::Ready(());
        }

        if !self.armed {
            let handle = context::expect_handle();
            handle.reactor().add_timer(self.deadline, cx.waker().clone());
            self.armed = true;
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as weft;

    #[weft::test(worker_threads = 2)]
    async fn sleep_lasts_at_least_the_duration() {
        let duration = Duration::from_millis(20);
        let start = Instant::now();
        sleep(duration).await;
        assert!(
            start.elapsed() >= duration,
            "woke early after {:?}",
            start.elapsed()
        );
    }

    #[weft::test(worker_threads = 2)]
    async fn zero_duration_completes_immediately() {
        sleep(Duration::ZERO).await;
    }

    #[weft::test(worker_threads = 2)]
    async fn sleep_until_a_past_deadline_is_ready() {
        sleep_until(Instant::now() - Duration::from_millis(5)).await;
    }
}
