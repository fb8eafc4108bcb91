use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::domain::UserId;

// ============== Authorization ==============

/// An empty allow-list leaves the bot open to everyone.
pub fn is_authorized(user_id: Option<UserId>, allowed_users: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    allowed_users.is_empty() || allowed_users.contains(&user_id.0)
}

// ============== Fetch limiter (token bucket) ==============

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Admission {
    Allowed,
    Limited { retry_after: Duration },
}

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Per-user token bucket guarding link fetches. Shared behind `&self`.
#[derive(Debug)]
pub struct FetchLimiter {
    enabled: bool,
    capacity: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<UserId, Bucket>>,
}

impl FetchLimiter {
    pub fn new(enabled: bool, capacity: u32, window: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            enabled,
            capacity,
            refill_per_sec: capacity / window.as_secs_f64().max(1e-9),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, 1, Duration::from_secs(1))
    }

    pub fn admit(&self, user: UserId) -> Admission {
        self.admit_at(user, Instant::now())
    }

    pub fn admit_at(&self, user: UserId, now: Instant) -> Admission {
        if !self.enabled {
            return Admission::Allowed;
        }

        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let bucket = buckets.entry(user).or_insert(Bucket {
            tokens: self.capacity,
            last_update: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Admission::Allowed;
        }

        let secs = (1.0 - bucket.tokens) / self.refill_per_sec;
        Admission::Limited {
            retry_after: Duration::from_secs_f64(secs.max(0.0)),
        }
    }
}
