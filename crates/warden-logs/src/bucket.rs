//! Token-bucket rate limiter with refill-on-read.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Mutable bucket state, serialized behind the mutex.
#[derive(Debug)]
struct BucketState {
    tokens: i64,
    last_refill: Instant,
}

/// Token bucket limiting how fast batches leave the shipper.
///
/// Refill is continuous (`elapsed × rate`) but truncated to whole tokens;
/// `last_refill` only advances when at least one token is added, so short
/// intervals do not lose their fractional remainder.
#[derive(Debug)]
pub struct LeakyBucket {
    capacity: i64,
    refill_rate: i64,
    state: Mutex<BucketState>,
}

impl LeakyBucket {
    /// Creates a bucket that starts full.
    #[must_use]
    pub fn new(capacity: i64, refill_rate: i64) -> Self {
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes `n` tokens if available. Returns false without consuming
    /// anything when the bucket holds fewer than `n`.
    pub fn allow(&self, n: i64) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);

        if state.tokens >= n {
            state.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Time until `n` tokens will be available (zero if they already are).
    pub fn wait_time(&self, n: i64) -> Duration {
        let mut state = self.state.lock();
        self.refill(&mut state);

        if state.tokens >= n {
            return Duration::ZERO;
        }

        let needed = n - state.tokens;
        Duration::from_secs_f64(needed as f64 / self.refill_rate as f64)
    }

    /// Tokens currently available after a lazy refill.
    pub fn available_tokens(&self) -> i64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> i64 {
        self.capacity
    }

    /// Configured refill rate in tokens per second.
    #[must_use]
    pub const fn refill_rate(&self) -> i64 {
        self.refill_rate
    }

    /// Adds `elapsed × rate` whole tokens, capped at capacity.
    ///
    /// `last_refill` advances only when tokens were actually added; otherwise
    /// sub-token elapsed time would be discarded on every call.
    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        let tokens_to_add = (elapsed.as_secs_f64() * self.refill_rate as f64) as i64;

        if tokens_to_add > 0 {
            state.tokens = self.capacity.min(state.tokens + tokens_to_add);
            state.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_bucket_starts_full() {
        let bucket = LeakyBucket::new(1000, 100);
        assert_eq!(bucket.available_tokens(), 1000);
        assert_eq!(bucket.capacity(), 1000);
        assert_eq!(bucket.refill_rate(), 100);
    }

    #[test]
    fn test_allow_consumes_tokens() {
        let bucket = LeakyBucket::new(1000, 100);

        assert!(bucket.allow(400));
        assert!(bucket.allow(600));
        assert!(!bucket.allow(1));
    }

    #[test]
    fn test_allow_does_not_consume_on_failure() {
        let bucket = LeakyBucket::new(10, 1);

        assert!(!bucket.allow(11));
        // The failed request must not have taken anything.
        assert!(bucket.allow(10));
    }

    #[test]
    fn test_wait_time_zero_when_available() {
        let bucket = LeakyBucket::new(100, 10);
        assert_eq!(bucket.wait_time(50), Duration::ZERO);
    }

    #[test]
    fn test_wait_time_proportional_to_deficit() {
        let bucket = LeakyBucket::new(100, 10);
        assert!(bucket.allow(100));

        // Ten tokens short at 10 tokens/s is about one second.
        let wait = bucket.wait_time(10);
        assert!(wait > Duration::from_millis(800), "wait was {wait:?}");
        assert!(wait <= Duration::from_secs(1), "wait was {wait:?}");
    }

    #[test]
    fn test_refill_over_time() {
        let bucket = LeakyBucket::new(1000, 1000);
        assert!(bucket.allow(1000));

        thread::sleep(Duration::from_millis(50));

        // At 1000 tokens/s, 50ms should yield at least 40 tokens.
        let available = bucket.available_tokens();
        assert!(available >= 40, "expected at least 40 tokens, got {available}");
    }

    #[test]
    fn test_refill_never_exceeds_capacity() {
        let bucket = LeakyBucket::new(100, 10_000);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(bucket.available_tokens(), 100);
    }

    #[test]
    fn test_fractional_tokens_not_lost() {
        // At 10 tokens/s a 30ms interval yields zero whole tokens. Because
        // last_refill does not advance on a zero-token refill, repeated short
        // polls must still accumulate into a whole token eventually.
        let bucket = LeakyBucket::new(10, 10);
        assert!(bucket.allow(10));

        for _ in 0..5 {
            thread::sleep(Duration::from_millis(30));
            let _ = bucket.available_tokens();
        }

        // ~150ms elapsed at 10 tokens/s is one whole token.
        assert!(bucket.available_tokens() >= 1);
    }

    #[test]
    fn test_throughput_bounded_by_capacity_plus_refill() {
        let bucket = LeakyBucket::new(50, 100);
        let start = Instant::now();

        let mut granted = 0i64;
        while start.elapsed() < Duration::from_millis(100) {
            if bucket.allow(1) {
                granted += 1;
            }
        }

        // capacity + rate * elapsed, with slack for timer jitter.
        let elapsed = start.elapsed().as_secs_f64();
        let bound = 50.0 + 100.0 * elapsed + 2.0;
        assert!(
            (granted as f64) <= bound,
            "granted {granted} exceeds bound {bound}"
        );
    }
}
