//! Deployment metrics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counter registry, created once per process and shared by `Arc`
#[derive(Debug, Default)]
pub struct DeployMetrics {
    requested: AtomicU64,
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    provider_attempts: AtomicU64,
    provider_retries: AtomicU64,
    preflight_rejections: AtomicU64,
    live_check_failures: AtomicU64,
    notifications_dropped: AtomicU64,
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requested: u64,
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub provider_attempts: u64,
    pub provider_retries: u64,
    pub preflight_rejections: u64,
    pub live_check_failures: u64,
    pub notifications_dropped: u64,
}

impl DeployMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_requested(&self) {
        self.requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count `attempts` provider calls, all but the first being retries
    pub fn record_provider_attempts(&self, attempts: u32) {
        let attempts = u64::from(attempts);
        self.provider_attempts.fetch_add(attempts, Ordering::Relaxed);
        self.provider_retries
            .fetch_add(attempts.saturating_sub(1), Ordering::Relaxed);
    }

    pub fn record_preflight_rejection(&self) {
        self.preflight_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_live_check_failure(&self) {
        self.live_check_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requested: self.requested.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            provider_attempts: self.provider_attempts.load(Ordering::Relaxed),
            provider_retries: self.provider_retries.load(Ordering::Relaxed),
            preflight_rejections: self.preflight_rejections.load(Ordering::Relaxed),
            live_check_failures: self.live_check_failures.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.requested,
            &self.started,
            &self.succeeded,
            &self.failed,
            &self.provider_attempts,
            &self.provider_retries,
            &self.preflight_rejections,
            &self.live_check_failures,
            &self.notifications_dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
