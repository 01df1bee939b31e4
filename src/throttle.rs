//! Rate limiting for answer update deliveries.

use std::time::Duration;

use tokio::time::Instant;

/// Minimum spacing between consecutive update deliveries.
pub const UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Collapses a fast stream of answer snapshots into deliveries spaced at
/// least one interval apart.
///
/// The throttle never owns a timer. Callers `select!` on
/// [`UpdateThrottle::deadline`] and call [`UpdateThrottle::fire`] when it
/// elapses. At most one deferred delivery is pending at a time, and it
/// always carries the latest value offered.
#[derive(Debug)]
pub struct UpdateThrottle {
    interval: Duration,
    last_delivery: Option<Instant>,
    pending: Option<String>,
    deadline: Option<Instant>,
}

impl UpdateThrottle {
    /// Create a throttle with the given minimum delivery spacing.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_delivery: None,
            pending: None,
            deadline: None,
        }
    }

    /// Offer a new value for delivery.
    ///
    /// Returns the value back when it should be delivered right away.
    /// Otherwise retains it until the deadline elapses, superseding any
    /// earlier pending value.
    pub fn offer(&mut self, value: String) -> Option<String> {
        let now = Instant::now();
        match self.last_delivery {
            Some(last) if now < last + self.interval => {
                if self.deadline.is_none() {
                    self.deadline = Some(last + self.interval);
                }
                self.pending = Some(value);
                None
            }
            _ => {
                self.mark_delivered(now);
                Some(value)
            }
        }
    }

    /// Deadline of the pending deferred delivery, if one is scheduled.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Take the deferred value once its deadline has elapsed.
    pub fn fire(&mut self) -> Option<String> {
        self.deadline = None;
        let value = self.pending.take()?;
        self.last_delivery = Some(Instant::now());
        Some(value)
    }

    /// Drop any deferred delivery without delivering it.
    pub fn cancel_pending(&mut self) {
        self.pending = None;
        self.deadline = None;
    }

    fn mark_delivered(&mut self, at: Instant) {
        self.last_delivery = Some(at);
        self.pending = None;
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::time::advance;

    const INTERVAL: Duration = Duration::from_millis(100);

    #[tokio::test(start_paused = true)]
    async fn test_first_offer_delivers_immediately() {
        let mut throttle = UpdateThrottle::new(INTERVAL);
        assert_eq!(throttle.offer("a".to_string()), Some("a".to_string()));
        assert_eq!(throttle.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_offers_collapse_to_latest() {
        let mut throttle = UpdateThrottle::new(INTERVAL);
        let first_at = Instant::now();
        assert!(throttle.offer("a".to_string()).is_some());

        advance(Duration::from_millis(30)).await;
        assert_eq!(throttle.offer("ab".to_string()), None);

        advance(Duration::from_millis(30)).await;
        assert_eq!(throttle.offer("abc".to_string()), None);

        // One deferred delivery, due exactly one interval after the first.
        let deadline = throttle.deadline().unwrap();
        assert_eq!(deadline, first_at + INTERVAL);

        advance(deadline - Instant::now()).await;
        assert_eq!(throttle.fire(), Some("abc".to_string()));
        assert_eq!(throttle.deadline(), None);
        assert!(Instant::now() - first_at >= INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offer_after_interval_delivers_immediately() {
        let mut throttle = UpdateThrottle::new(INTERVAL);
        assert!(throttle.offer("a".to_string()).is_some());

        advance(INTERVAL).await;
        assert_eq!(throttle.offer("ab".to_string()), Some("ab".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_delivery_supersedes_pending() {
        let mut throttle = UpdateThrottle::new(INTERVAL);
        assert!(throttle.offer("a".to_string()).is_some());

        advance(Duration::from_millis(50)).await;
        assert_eq!(throttle.offer("ab".to_string()), None);

        // Past the interval, the newest value is delivered directly and the
        // stale pending one is dropped.
        advance(Duration::from_millis(60)).await;
        assert_eq!(throttle.offer("abc".to_string()), Some("abc".to_string()));
        assert_eq!(throttle.fire(), None);
        assert_eq!(throttle.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_discards_delivery() {
        let mut throttle = UpdateThrottle::new(INTERVAL);
        assert!(throttle.offer("a".to_string()).is_some());

        advance(Duration::from_millis(10)).await;
        assert_eq!(throttle.offer("ab".to_string()), None);

        throttle.cancel_pending();
        assert_eq!(throttle.deadline(), None);
        assert_eq!(throttle.fire(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_resets_spacing() {
        let mut throttle = UpdateThrottle::new(INTERVAL);
        assert!(throttle.offer("a".to_string()).is_some());

        advance(Duration::from_millis(40)).await;
        assert_eq!(throttle.offer("ab".to_string()), None);

        advance(Duration::from_millis(60)).await;
        assert_eq!(throttle.fire(), Some("ab".to_string()));

        // The fired delivery starts a fresh interval.
        advance(Duration::from_millis(10)).await;
        assert_eq!(throttle.offer("abc".to_string()), None);
        assert!(throttle.deadline().is_some());
    }
}
