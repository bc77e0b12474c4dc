//! Per-provider rate-limit state
//!
//! Each provider tracks its own cooling window and quota usage. The state is
//! process-local by design: coordination across worker processes rides on
//! the remote 429 signal, not shared state.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Cooling and quota bookkeeping for one provider.
#[derive(Debug)]
pub struct RateLimitState {
    /// End of the current cooling window, if any.
    cooling_until: Option<DateTime<Utc>>,
    /// Quota ceiling learned from 429 responses, if the provider reported one.
    quota_limit: Option<u64>,
    /// Requests issued since the last reset.
    quota_used: u64,
    /// When the last request was issued, for the minimum-interval gate.
    last_request_at: Option<Instant>,
    /// Minimum spacing between requests.
    min_interval: Duration,
    /// Usage percentage at which the provider is treated as cooling.
    quota_soft_pct: u32,
}

impl RateLimitState {
    pub fn new(min_interval: Duration, quota_soft_pct: u32) -> Self {
        Self {
            cooling_until: None,
            quota_limit: None,
            quota_used: 0,
            last_request_at: None,
            min_interval,
            quota_soft_pct,
        }
    }

    /// Whether the provider is currently unusable.
    ///
    /// True inside the cooling window, and also once usage reaches the soft
    /// percentage of a known quota.
    pub fn is_cooling(&self, now: DateTime<Utc>) -> bool {
        if let Some(until) = self.cooling_until {
            if now < until {
                return true;
            }
        }

        if let Some(limit) = self.quota_limit {
            let soft_cut = limit.saturating_mul(self.quota_soft_pct as u64) / 100;
            if self.quota_used >= soft_cut {
                warn!(
                    "Approaching quota limit: {}/{} requests used",
                    self.quota_used, limit
                );
                return true;
            }
        }

        false
    }

    /// Records a 429 observation: enter cooling until the provider-supplied
    /// reset time, and remember the quota ceiling when reported.
    pub fn note_rate_limited(
        &mut self,
        now: DateTime<Utc>,
        retry_after: Duration,
        quota_limit: Option<u64>,
    ) {
        let until = now + ChronoDuration::from_std(retry_after).unwrap_or_else(|_| ChronoDuration::zero());
        self.cooling_until = Some(until);
        if let Some(limit) = quota_limit {
            self.quota_limit = Some(limit);
            info!("Updated provider quota limit: {}", limit);
        }
        info!("Rate limit will reset at: {}", until);
    }

    /// Records an issued request for quota accounting and interval tracking.
    pub fn note_request(&mut self) {
        self.quota_used += 1;
        self.last_request_at = Some(Instant::now());
    }

    /// How long the caller must wait to respect the minimum request interval.
    pub fn interval_wait(&self) -> Option<Duration> {
        let last = self.last_request_at?;
        let elapsed = last.elapsed();
        if elapsed < self.min_interval {
            Some(self.min_interval - elapsed)
        } else {
            None
        }
    }

    /// Remaining cooling time, for status reporting.
    pub fn cooling_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let until = self.cooling_until?;
        if now < until {
            (until - now).to_std().ok()
        } else {
            None
        }
    }

    pub fn quota_used(&self) -> u64 {
        self.quota_used
    }

    pub fn quota_limit(&self) -> Option<u64> {
        self.quota_limit
    }

    /// Clears cooling and usage counters (manual intervention or tests).
    pub fn reset(&mut self) {
        self.cooling_until = None;
        self.quota_used = 0;
    }
}
