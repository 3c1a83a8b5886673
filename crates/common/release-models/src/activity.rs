//! Idle tracking for long transfers

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::time::Instant;

/// Shared record of the last moment a transfer made progress. Clones observe
/// the same clock, so the side sending a body can `touch` it while another
/// side waits for the response.
#[derive(Debug, Clone)]
pub struct Activity {
    inner: Arc<ActivityInner>,
}

#[derive(Debug)]
struct ActivityInner {
    origin: Instant,
    last_millis: AtomicU64,
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

impl Activity {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ActivityInner {
                origin: Instant::now(),
                last_millis: AtomicU64::new(0),
            }),
        }
    }

    pub fn touch(&self) {
        let elapsed = self.inner.origin.elapsed().as_millis();
        self.inner
            .last_millis
            .fetch_max(u64::try_from(elapsed).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    pub fn last(&self) -> Instant {
        self.inner.origin + Duration::from_millis(self.inner.last_millis.load(Ordering::Relaxed))
    }

    /// Await `future`, giving up with `None` once `idle` passes without a
    /// `touch`.
    pub async fn bound<F: Future>(&self, idle: Duration, future: F) -> Option<F::Output> {
        let mut future = std::pin::pin!(future);
        loop {
            let deadline = self.last() + idle;
            match tokio::time::timeout_at(deadline, future.as_mut()).await {
                Ok(output) => return Some(output),
                Err(_) if self.last() + idle <= Instant::now() => return None,
                Err(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn silent_future_is_abandoned() {
        let activity = Activity::new();
        let started = Instant::now();
        let result = activity
            .bound(Duration::from_secs(5), std::future::pending::<()>())
            .await;
        assert!(result.is_none());
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn touches_extend_the_deadline() {
        let activity = Activity::new();
        let feeder = activity.clone();
        tokio::spawn(async move {
            for _ in 0..4 {
                tokio::time::sleep(Duration::from_secs(3)).await;
                feeder.touch();
            }
        });

        let started = Instant::now();
        let result = activity
            .bound(Duration::from_secs(5), std::future::pending::<()>())
            .await;
        assert!(result.is_none());
        assert_eq!(started.elapsed(), Duration::from_secs(17));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_future_wins() {
        let activity = Activity::new();
        let result = activity
            .bound(Duration::from_secs(5), async {
                tokio::time::sleep(Duration::from_secs(4)).await;
                "headers"
            })
            .await;
        assert_eq!(result, Some("headers"));
    }
}
