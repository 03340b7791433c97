//! Dashboard data loader: one-shot fetches and the supervised watch poller.

use crate::api::{ApiKeyRecord, DashboardResponse, HourlyUsage, MovieApi, UsageStats};
use crate::config::DashboardConfig;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Result of one dashboard load.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Live {
        stats: UsageStats,
        keys: Vec<ApiKeyRecord>,
        fetched_at: DateTime<Utc>,
    },
    /// Random numbers standing in for an unreachable backend. Opt-in only.
    Synthetic {
        stats: UsageStats,
        reason: String,
        fetched_at: DateTime<Utc>,
    },
    Failed {
        error: String,
        consecutive_failures: u32,
        retry_in: Option<Duration>,
    },
}

impl Snapshot {
    #[cfg(test)]
    pub fn stats(&self) -> Option<&UsageStats> {
        match self {
            Snapshot::Live { stats, .. } | Snapshot::Synthetic { stats, .. } => Some(stats),
            Snapshot::Failed { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Snapshot::Live { .. } => "live",
            Snapshot::Synthetic { .. } => "synthetic",
            Snapshot::Failed { .. } => "failed",
        }
    }
}

/// Exponential backoff: `base * 2^failures`, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn current(&self) -> Duration {
        let factor = 1u32.checked_shl(self.failures).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Count a failure and return the delay before the next attempt.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.current()
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }
}

/// Hourly usage with random counts, the same shape the backend reports.
pub fn synthesize_stats(key_count: usize, rng: &mut impl Rng) -> UsageStats {
    let chart_data: Vec<HourlyUsage> = (0..24u8)
        .map(|hour| HourlyUsage {
            hour,
            requests: rng.gen_range(0..500),
        })
        .collect();
    let today: u64 = chart_data.iter().map(|h| h.requests).sum();
    let this_month_requests = today + rng.gen_range(1_000..20_000);
    UsageStats {
        total_requests: this_month_requests + rng.gen_range(0..50_000),
        this_month_requests,
        api_key_count: key_count as u64,
        chart_data,
    }
}

fn to_snapshot(
    result: Result<DashboardResponse, crate::api::ApiError>,
    demo_fallback: bool,
    backoff: &mut Backoff,
    key_count: usize,
    retry: bool,
) -> (Snapshot, Duration) {
    let now = Utc::now();
    match result {
        Ok(response) => {
            backoff.record_success();
            let snapshot = Snapshot::Live {
                stats: response.stats,
                keys: response.api_keys,
                fetched_at: now,
            };
            (snapshot, backoff.current())
        }
        Err(e) => {
            let delay = backoff.record_failure();
            tracing::warn!(error = %e, failures = backoff.failures(), "dashboard load failed");
            let snapshot = if demo_fallback {
                Snapshot::Synthetic {
                    stats: synthesize_stats(key_count, &mut rand::thread_rng()),
                    reason: e.to_string(),
                    fetched_at: now,
                }
            } else {
                Snapshot::Failed {
                    error: e.to_string(),
                    consecutive_failures: backoff.failures(),
                    retry_in: retry.then_some(delay),
                }
            };
            (snapshot, delay)
        }
    }
}

/// Fetch the dashboard once.
pub fn load_once(
    api: &dyn MovieApi,
    user_id: &str,
    demo_fallback: bool,
    key_count: usize,
) -> Snapshot {
    let mut backoff = Backoff::new(Duration::ZERO, Duration::ZERO);
    to_snapshot(api.dashboard(user_id), demo_fallback, &mut backoff, key_count, false).0
}

/// Background poller. Each poll completes before the next delay starts, so
/// requests never overlap. Dropping the poller stops and joins the thread.
pub struct Poller {
    updates: Receiver<Snapshot>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    pub fn spawn(
        api: Arc<dyn MovieApi + Send + Sync>,
        user_id: String,
        config: &DashboardConfig,
        key_count: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        let mut backoff = Backoff::new(
            Duration::from_millis(config.poll_interval_ms),
            Duration::from_millis(config.max_backoff_ms),
        );
        let demo_fallback = config.demo_fallback;

        let handle = thread::spawn(move || loop {
            let result = api.dashboard(&user_id);
            let (snapshot, delay) =
                to_snapshot(result, demo_fallback, &mut backoff, key_count, true);
            tracing::debug!(kind = snapshot.kind(), next_in_ms = delay.as_millis() as u64, "dashboard poll");
            if tx.send(snapshot).is_err() {
                break;
            }
            match stop_rx.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        Self {
            updates: rx,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Wait up to `timeout` for the next snapshot.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Snapshot> {
        self.updates.recv_timeout(timeout).ok()
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("dashboard poller thread panicked");
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
