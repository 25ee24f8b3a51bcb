//! Rolling hydration statistics.
//!
//! Counters move in the same critical section as the lifecycle transition
//! that caused them, so a snapshot is never torn. Completion durations go
//! into a fixed-capacity window; the mean and p95 are recomputed when a
//! sample lands, which keeps [`MetricsAggregator::snapshot`] O(1).

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

// ── Constants ────────────────────────────────────────────────────────

/// Number of completion durations kept for mean/p95.
pub const DURATION_SAMPLE_CAPACITY: usize = 100;

// ── Duration window ──────────────────────────────────────────────────

/// The most recent completion durations, oldest first, with their running
/// sum so the mean never rescans the window.
#[derive(Debug, Clone)]
pub struct DurationWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
    sum: Duration,
}

impl DurationWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            sum: Duration::ZERO,
        }
    }

    /// Record a completion, evicting the oldest once the window is full.
    pub fn record(&mut self, duration: Duration) {
        if self.samples.len() == self.capacity {
            if let Some(evicted) = self.samples.pop_front() {
                self.sum -= evicted;
            }
        }
        self.samples.push_back(duration);
        self.sum += duration;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> Duration {
        match self.samples.len() {
            0 => Duration::ZERO,
            n => self.sum / n as u32,
        }
    }

    /// Nearest-rank percentile of the current window.
    pub fn percentile(&self, fraction: f64) -> Duration {
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        nearest_rank(&sorted, fraction)
    }
}

/// Nearest-rank percentile over an already sorted slice.
///
/// `fraction` is in `(0, 1]`. Returns `Duration::ZERO` for an empty slice.
pub fn nearest_rank(sorted: &[Duration], fraction: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = ((sorted.len() as f64) * fraction).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

// ── Snapshot ─────────────────────────────────────────────────────────

/// Immutable point-in-time view of the scheduler's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_boundaries: usize,
    pub hydrated_count: usize,
    /// Includes boundaries currently `hydrating`.
    pub pending_count: usize,
    pub failed_count: usize,
    #[serde(serialize_with = "millis::serialize")]
    pub average_hydration_duration: Duration,
    #[serde(serialize_with = "millis::serialize")]
    pub p95_hydration_duration: Duration,
    pub replayed_interactions: u64,
    #[serde(serialize_with = "millis::serialize_opt")]
    pub time_to_full_hydration: Option<Duration>,
    #[serde(serialize_with = "millis::serialize_opt")]
    pub time_to_above_fold_hydration: Option<Duration>,
    /// Eligible boundaries waiting for a slice.
    pub queue_size: usize,
    pub captured_at: DateTime<Utc>,
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_nanos() as f64 / 1_000_000.0)
    }

    pub fn serialize_opt<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => serialize(d, s),
            None => s.serialize_none(),
        }
    }

    pub fn serialize_seq<S: Serializer>(ds: &[Duration], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(ds.iter().map(|d| d.as_nanos() as f64 / 1_000_000.0))
    }
}

// ── Aggregator ───────────────────────────────────────────────────────

/// Pre-aggregated counters plus the duration sample.
#[derive(Debug)]
pub struct MetricsAggregator {
    total: usize,
    hydrated: usize,
    failed: usize,
    above_fold_total: usize,
    above_fold_hydrated: usize,
    replayed_interactions: u64,
    samples: DurationWindow,
    average: Duration,
    p95: Duration,
    time_to_full: Option<Duration>,
    time_to_above_fold: Option<Duration>,
    collect: bool,
    sample_rate: f64,
    sample_credit: f64,
    origin: Instant,
}

impl MetricsAggregator {
    pub fn new(collect: bool, sample_rate: f64) -> Self {
        Self {
            total: 0,
            hydrated: 0,
            failed: 0,
            above_fold_total: 0,
            above_fold_hydrated: 0,
            replayed_interactions: 0,
            samples: DurationWindow::new(DURATION_SAMPLE_CAPACITY),
            average: Duration::ZERO,
            p95: Duration::ZERO,
            time_to_full: None,
            time_to_above_fold: None,
            collect,
            sample_rate: sample_rate.clamp(0.0, 1.0),
            sample_credit: 0.0,
            origin: Instant::now(),
        }
    }

    /// A boundary entered the registry.
    pub fn on_registered(&mut self, above_fold: bool) {
        self.total += 1;
        if above_fold {
            self.above_fold_total += 1;
        }
    }

    /// A pending/hydrating/error boundary left the registry.
    ///
    /// Hydrated boundaries keep counting after removal so `hydrated_count`
    /// never drops outside an explicit reset.
    pub fn on_removed(&mut self, was_failed: bool, above_fold: bool) {
        self.total = self.total.saturating_sub(1);
        if was_failed {
            self.failed = self.failed.saturating_sub(1);
        }
        if above_fold {
            self.above_fold_total = self.above_fold_total.saturating_sub(1);
        }
        self.check_latches();
    }

    /// A boundary finished hydrating.
    pub fn on_hydrated(&mut self, duration: Duration, above_fold: bool) {
        self.hydrated += 1;
        if above_fold {
            self.above_fold_hydrated += 1;
        }
        if self.should_sample() {
            self.samples.record(duration);
            self.average = self.samples.mean();
            self.p95 = self.samples.percentile(0.95);
        }
        self.check_latches();
    }

    pub fn on_failed(&mut self) {
        self.failed += 1;
    }

    /// Explicit reset of a terminal boundary back to pending.
    pub fn on_reset(&mut self, was_hydrated: bool, above_fold: bool) {
        if was_hydrated {
            self.hydrated = self.hydrated.saturating_sub(1);
            if above_fold {
                self.above_fold_hydrated = self.above_fold_hydrated.saturating_sub(1);
            }
        } else {
            self.failed = self.failed.saturating_sub(1);
        }
    }

    pub fn on_replayed(&mut self, count: usize) {
        self.replayed_interactions += count as u64;
    }

    /// Forget everything, latches included. The clock origin restarts.
    pub fn reset(&mut self) {
        *self = Self::new(self.collect, self.sample_rate);
    }

    pub fn snapshot(&self, queue_size: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            total_boundaries: self.total,
            hydrated_count: self.hydrated,
            pending_count: self.total.saturating_sub(self.hydrated + self.failed),
            failed_count: self.failed,
            average_hydration_duration: self.average,
            p95_hydration_duration: self.p95,
            replayed_interactions: self.replayed_interactions,
            time_to_full_hydration: self.time_to_full,
            time_to_above_fold_hydration: self.time_to_above_fold,
            queue_size,
            captured_at: Utc::now(),
        }
    }

    /// Deterministic thinning: accumulate `sample_rate` per completion and
    /// sample whenever a whole unit of credit is available.
    fn should_sample(&mut self) -> bool {
        if !self.collect {
            return false;
        }
        self.sample_credit += self.sample_rate;
        if self.sample_credit >= 1.0 - f64::EPSILON {
            self.sample_credit -= 1.0;
            true
        } else {
            false
        }
    }

    fn check_latches(&mut self) {
        let elapsed = self.origin.elapsed();
        if self.time_to_full.is_none() && self.total > 0 && self.hydrated >= self.total {
            self.time_to_full = Some(elapsed);
        }
        if self.time_to_above_fold.is_none()
            && self.above_fold_total > 0
            && self.above_fold_hydrated >= self.above_fold_total
        {
            self.time_to_above_fold = Some(elapsed);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
