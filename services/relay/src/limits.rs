//! Device rate limiting and image deduplication
//!
//! The relay enforces the authoritative per-device daily limit — the client's
//! local quota counter is advisory and cannot be trusted. The day window is
//! the UTC calendar date; a device's count resets implicitly when the date
//! changes.
//!
//! Deduplication hashes the decoded image bytes: the same photo re-submitted
//! within the window is rejected without an upstream call, since the answer
//! would not change. Entries expire with the window and are pruned on access.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};

struct DeviceUsage {
    day: NaiveDate,
    count: u32,
}

/// Per-device daily request counter.
pub struct DeviceRateLimiter {
    daily_limit: u32,
    usage: Mutex<HashMap<String, DeviceUsage>>,
}

impl DeviceRateLimiter {
    pub fn new(daily_limit: u32) -> Self {
        Self {
            daily_limit,
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the device has budget left today. Read-only.
    pub async fn check(&self, device_id: &str) -> bool {
        self.check_on(device_id, Utc::now().date_naive()).await
    }

    /// Count one dispatched request against the device.
    pub async fn record(&self, device_id: &str) {
        self.record_on(device_id, Utc::now().date_naive()).await
    }

    async fn check_on(&self, device_id: &str, today: NaiveDate) -> bool {
        let usage = self.usage.lock().await;
        match usage.get(device_id) {
            Some(entry) if entry.day == today => entry.count < self.daily_limit,
            _ => true,
        }
    }

    async fn record_on(&self, device_id: &str, today: NaiveDate) {
        let mut usage = self.usage.lock().await;
        let entry = usage.entry(device_id.to_string()).or_insert(DeviceUsage {
            day: today,
            count: 0,
        });
        if entry.day != today {
            info!(device_id, "device usage day rolled over");
            entry.day = today;
            entry.count = 0;
        }
        entry.count += 1;
        debug!(device_id, count = entry.count, "recorded device request");
    }
}

/// Recently-seen image hashes with a rejection window.
pub struct DedupCache {
    window: Duration,
    seen: Mutex<HashMap<[u8; 32], Instant>>,
}

impl DedupCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Hash of the decoded image bytes.
    pub fn hash(image: &[u8]) -> [u8; 32] {
        Sha256::digest(image).into()
    }

    /// Returns true when the hash was already seen inside the window.
    /// A fresh hash is recorded; expired entries are pruned while here.
    pub async fn check_and_insert(&self, hash: [u8; 32]) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().await;
        seen.retain(|_, first_seen| now.duration_since(*first_seen) < self.window);

        if seen.contains_key(&hash) {
            debug!("duplicate image within dedup window");
            return true;
        }
        seen.insert(hash, now);
        false
    }
}
