use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// Process-wide spacing gate for outbound API calls.
///
/// Every caller funnels through [`admit`](Self::admit), which serializes on
/// the reservation and then sleeps out its slot, so two requests are never
/// closer together than the configured spacing regardless of which task
/// issued them.
pub struct RequestGate {
    limiter: Mutex<IntervalLimiter>,
}

impl RequestGate {
    pub fn new(spacing: Duration) -> Self {
        Self {
            limiter: Mutex::new(IntervalLimiter::new(spacing)),
        }
    }

    pub async fn admit(&self) {
        let wait = { self.limiter.lock().await.reserve() };
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admissions_are_spaced_out() {
        let gate = RequestGate::new(Duration::from_millis(30));
        let started = Instant::now();
        gate.admit().await;
        gate.admit().await;
        gate.admit().await;
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn concurrent_admissions_serialize() {
        let gate = std::sync::Arc::new(RequestGate::new(Duration::from_millis(25)));
        let started = Instant::now();
        let mut tasks = Vec::new();
        for _ in 0..3 {
            let gate = std::sync::Arc::clone(&gate);
            tasks.push(tokio::spawn(async move { gate.admit().await }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
