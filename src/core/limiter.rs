use std::sync::{Arc, Mutex};

/// Process-wide admission control for in-flight chat requests.
///
/// A bounded counter behind a single mutex. Acquisition is a non-blocking
/// check-and-increment; when the bound is reached the caller is rejected
/// immediately (no queueing). The returned permit decrements the counter on
/// drop, so the slot is released exactly once on every exit path.
#[derive(Clone)]
pub struct RequestLimiter {
    inner: Arc<LimiterInner>,
}

struct LimiterInner {
    max_concurrent: usize,
    in_flight: Mutex<usize>,
}

pub struct RequestPermit {
    inner: Arc<LimiterInner>,
}

impl RequestLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                max_concurrent,
                in_flight: Mutex::new(0),
            }),
        }
    }

    /// Tries to claim a request slot. `None` means the caller should be
    /// rejected with a rate-limit response.
    pub fn try_acquire(&self) -> Option<RequestPermit> {
        let mut current = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current >= self.inner.max_concurrent {
            return None;
        }
        *current += 1;
        Some(RequestPermit {
            inner: self.inner.clone(),
        })
    }

    pub fn in_flight(&self) -> usize {
        *self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for RequestPermit {
    fn drop(&mut self) {
        let mut current = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = current.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_when_full_and_recovers_on_release() {
        let limiter = RequestLimiter::new(10);

        let mut permits: Vec<_> = (0..10).filter_map(|_| limiter.try_acquire()).collect();
        assert_eq!(permits.len(), 10);
        assert_eq!(limiter.in_flight(), 10);

        // The eleventh concurrent request is rejected immediately.
        assert!(limiter.try_acquire().is_none());

        drop(permits.pop());
        assert_eq!(limiter.in_flight(), 9);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn slot_released_when_work_panics() {
        let limiter = RequestLimiter::new(1);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _permit = limiter.try_acquire().expect("slot available");
            panic!("request blew up after partial work");
        }));
        assert!(result.is_err());

        // Permit dropped during unwind; the slot is free again.
        assert_eq!(limiter.in_flight(), 0);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn drop_releases_exactly_once() {
        let limiter = RequestLimiter::new(2);
        let a = limiter.try_acquire().unwrap();
        let b = limiter.try_acquire().unwrap();
        assert_eq!(limiter.in_flight(), 2);
        drop(a);
        assert_eq!(limiter.in_flight(), 1);
        drop(b);
        assert_eq!(limiter.in_flight(), 0);
    }
}
