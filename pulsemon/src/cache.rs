//! Refresh-on-demand cache for slow-changing data (mount lists, usage, link metadata, users).

use std::future::Future;
use std::time::{Duration, Instant};

/// A value together with the instant it was last refreshed and how long it stays fresh.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    value: Option<T>,
    refreshed_at: Option<Instant>,
    ttl: Duration,
}

impl<T> Cached<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            value: None,
            refreshed_at: None,
            ttl,
        }
    }

    /// True when a value is held and it was refreshed less than `ttl` before `now`.
    pub fn is_fresh(&self, now: Instant) -> bool {
        match (&self.value, self.refreshed_at) {
            (Some(_), Some(at)) => now.saturating_duration_since(at) < self.ttl,
            _ => false,
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn set(&mut self, now: Instant, value: T) {
        self.value = Some(value);
        self.refreshed_at = Some(now);
    }

    /// Forces the next `get_or_*` call to refresh, keeping the stale value around until then.
    pub fn invalidate(&mut self) {
        self.refreshed_at = None;
    }

    /// Returns the cached value, first replacing it with `refresh(previous)` when stale.
    pub fn get_or_refresh<F>(&mut self, now: Instant, refresh: F) -> &T
    where
        F: FnOnce(Option<T>) -> T,
    {
        let fresh = self.is_fresh(now);
        let value = match self.value.take() {
            Some(v) if fresh => v,
            previous => {
                self.refreshed_at = Some(now);
                refresh(previous)
            }
        };
        self.value.insert(value)
    }

    /// Async, fallible variant: on error the previous value and timestamp are left untouched.
    pub async fn get_or_try_refresh<F, Fut, E>(&mut self, now: Instant, refresh: F) -> Result<&T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let fresh = self.is_fresh(now);
        let value = match self.value.take() {
            Some(v) if fresh => v,
            previous => match refresh().await {
                Ok(next) => {
                    self.refreshed_at = Some(now);
                    next
                }
                Err(e) => {
                    self.value = previous;
                    return Err(e);
                }
            },
        };
        Ok(self.value.insert(value))
    }
}
