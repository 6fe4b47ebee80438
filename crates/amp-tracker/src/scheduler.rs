//! Timer ownership, mutual exclusion, and rate-limit backoff.
//!
//! One [`Tracker`] instance owns every timer the subsystem uses: the
//! recurring daily cycle, one staggered timer per region, and the single
//! backoff-resumption timer. The resumption timer and the next-cycle timer
//! share one substitutable wake slot; they are never both outstanding.
//! Region timers live in a map so a new cycle or a rate limit can cancel
//! them all at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration as StdDuration;

use amp_xapi::{PostMetrics, XApiClient, XApiError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::status_log::{LogEntry, LogKind, StatusLog};
use crate::store::TrackerStore;
use crate::types::{RunSummary, TrackerSnapshot};

/// Hours between daily cycles.
pub(crate) const CYCLE_HOURS: i64 = 24;
/// Backoff window after an HTTP 429.
pub(crate) const BACKOFF_HOURS: i64 = 2;
/// A region that completed a run within this window is skipped.
pub(crate) const REGION_FRESH_HOURS: i64 = 24;

pub(crate) const NOT_CONFIGURED_MSG: &str =
    "X metrics tracking is not configured: X_BEARER_TOKEN is missing";

/// The metric-fetching seam. Implemented by [`XApiClient`] in production
/// and by scripted fakes in tests, so batch semantics can be exercised
/// without real HTTP under paused time.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn post_metrics(&self, post_id: &str) -> Result<PostMetrics, XApiError>;
    async fn followers(&self, handle: &str) -> Result<u64, XApiError>;
}

#[async_trait]
impl MetricsSource for XApiClient {
    async fn post_metrics(&self, post_id: &str) -> Result<PostMetrics, XApiError> {
        self.fetch_post_metrics(post_id).await
    }

    async fn followers(&self, handle: &str) -> Result<u64, XApiError> {
        self.fetch_followers(handle).await
    }
}

/// A cancellable delayed task. Dropping the handle cancels the timer, so
/// mass-cancel is just clearing the map that owns them.
#[derive(Debug)]
pub(crate) struct TimerHandle {
    handle: JoinHandle<()>,
}

impl TimerHandle {
    fn after<F>(delay: StdDuration, task: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        Self { handle }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// All mutable scheduler state, in one place behind one lock.
#[derive(Default)]
pub(crate) struct SchedulerState {
    started: bool,
    pub(crate) cycle_start: Option<DateTime<Utc>>,
    pub(crate) next_cycle_at: Option<DateTime<Utc>>,
    pub(crate) rate_limited_until: Option<DateTime<Utc>>,
    pub(crate) regions: Vec<String>,
    pub(crate) region_last_run: HashMap<String, DateTime<Utc>>,
    region_timers: HashMap<String, TimerHandle>,
    pub(crate) region_due_at: HashMap<String, DateTime<Utc>>,
    /// The single top-level wake slot: either the backoff resumption or the
    /// next daily cycle, never both.
    wake: Option<(DateTime<Utc>, TimerHandle)>,
    pub(crate) last_run: Option<RunSummary>,
    pub(crate) log: StatusLog,
}

impl SchedulerState {
    /// Lazy backoff expiry: any observer that sees the window elapsed
    /// clears it.
    pub(crate) fn clear_expired_rate_limit(&mut self, now: DateTime<Utc>) {
        if self.rate_limited_until.is_some_and(|until| now >= until) {
            self.rate_limited_until = None;
        }
    }
}

/// The engagement-metrics tracker.
///
/// Intentionally a process-wide singleton: one operational job per
/// deployment. Construct once with [`Tracker::new`] and share the `Arc`.
pub struct Tracker {
    pub(crate) weak: Weak<Tracker>,
    pub(crate) store: Arc<dyn TrackerStore>,
    pub(crate) source: Option<Arc<dyn MetricsSource>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) in_flight: AtomicBool,
    pub(crate) state: tokio::sync::Mutex<SchedulerState>,
}

impl Tracker {
    /// Build the singleton with the production clock. `source` is `None`
    /// when no bearer token is configured; the tracker then degrades to a
    /// no-op that logs one critical entry per attempted cycle.
    #[must_use]
    pub fn new(store: Arc<dyn TrackerStore>, source: Option<Arc<dyn MetricsSource>>) -> Arc<Self> {
        Self::with_clock(store, source, Arc::new(SystemClock))
    }

    /// Build with an explicit clock (tests drive a [`crate::ManualClock`]).
    #[must_use]
    pub fn with_clock(
        store: Arc<dyn TrackerStore>,
        source: Option<Arc<dyn MetricsSource>>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            store,
            source,
            clock,
            in_flight: AtomicBool::new(false),
            state: tokio::sync::Mutex::new(SchedulerState::default()),
        })
    }

    /// Start the timer tree. Idempotent: a second call while timers are
    /// active is a no-op.
    pub async fn start_scheduler(&self) {
        {
            let mut st = self.state.lock().await;
            if st.started {
                tracing::debug!("tracker: scheduler already started");
                return;
            }
            st.started = true;
        }
        self.start_daily_cycle("startup").await;
    }

    /// Begin a daily cycle: cancel outstanding region timers, queue one
    /// staggered timer per region, and note when the next cycle is due.
    ///
    /// While a rate-limit backoff is active this only arms the resumption
    /// timer; no region queuing happens until the window elapses.
    pub(crate) async fn start_daily_cycle(&self, reason: &'static str) {
        let now = self.clock.now();
        tracing::info!(reason, "tracker: daily cycle starting");

        {
            let mut st = self.state.lock().await;
            st.clear_expired_rate_limit(now);
            if let Some(until) = st.rate_limited_until {
                tracing::warn!(until = %until, "tracker: rate limited; deferring cycle");
                self.arm_wake(&mut st, until, "backoff-resume", now);
                return;
            }

            st.region_timers.clear();
            st.region_due_at.clear();
            st.cycle_start = Some(now);
            st.next_cycle_at = Some(now + Duration::hours(CYCLE_HOURS));
        }

        if self.source.is_none() {
            let mut st = self.state.lock().await;
            st.log.push(
                LogEntry::new(now, LogKind::Error, NOT_CONFIGURED_MSG).critical(),
                now,
            );
            self.arm_next_cycle(&mut st, now);
            return;
        }

        let regions = match self.store.distinct_regions().await {
            Ok(regions) => regions,
            Err(e) => {
                tracing::error!(error = %e, "tracker: failed to load regions");
                let mut st = self.state.lock().await;
                st.log.push(
                    LogEntry::new(
                        now,
                        LogKind::Error,
                        format!("failed to load regions: {e}"),
                    ),
                    now,
                );
                self.arm_next_cycle(&mut st, now);
                return;
            }
        };

        let mut st = self.state.lock().await;
        st.regions.clone_from(&regions);
        if regions.is_empty() {
            tracing::info!("tracker: no regions to schedule");
            self.arm_next_cycle(&mut st, now);
            return;
        }

        let stagger = stagger_interval(regions.len());
        let cycle_start = st.cycle_start.unwrap_or(now);
        for (index, region) in regions.into_iter().enumerate() {
            let offset = stagger * u32::try_from(index).unwrap_or(u32::MAX);
            let due = cycle_start + Duration::from_std(offset).unwrap_or_else(|_| Duration::zero());
            let weak = self.weak.clone();
            let fired_region = region.clone();
            let timer = TimerHandle::after(to_std(due - now), async move {
                if let Some(tracker) = weak.upgrade() {
                    tracker.region_timer_fired(fired_region).await;
                }
            });
            tracing::debug!(region = %region, due = %due, "tracker: region queued");
            st.region_due_at.insert(region.clone(), due);
            st.region_timers.insert(region, timer);
        }
    }

    /// A region timer fired: drop it from the pending set, run the batch,
    /// and re-arm the next daily cycle. If the batch hit the rate limit the
    /// resumption timer keeps the wake slot instead.
    async fn region_timer_fired(&self, region: String) {
        {
            let mut st = self.state.lock().await;
            st.region_timers.remove(&region);
            st.region_due_at.remove(&region);
        }

        let summary = self.run_region("daily-region", &region, false, false).await;
        tracing::info!(
            region = %region,
            processed = summary.processed,
            errors = summary.errors,
            remaining = summary.remaining,
            "tracker: region batch finished"
        );

        let now = self.clock.now();
        let mut st = self.state.lock().await;
        self.arm_next_cycle(&mut st, now);
    }

    /// Operator-triggered run: optionally region-scoped, optionally
    /// bypassing the rate-limit gate, optionally forcing past the 24h
    /// region-freshness skip.
    pub async fn trigger_manual(
        &self,
        region: Option<String>,
        force: bool,
        ignore_rate_limit: bool,
    ) -> RunSummary {
        match region {
            Some(region) => {
                self.run_region("manual", &region, force, ignore_rate_limit)
                    .await
            }
            None => self.run_all_regions(force, ignore_rate_limit).await,
        }
    }

    /// Run a single region under the global latch. Triggers that arrive
    /// while another batch is in flight are dropped with a zeroed summary.
    pub(crate) async fn run_region(
        &self,
        reason: &str,
        region: &str,
        force: bool,
        ignore_rate_limit: bool,
    ) -> RunSummary {
        let now = self.clock.now();
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(region, "tracker: batch already in flight; trigger dropped");
            return RunSummary::dropped(reason, Some(region.to_string()), now);
        }
        let _latch = LatchGuard(&self.in_flight);

        let summary = self
            .run_region_batch(reason, region, force, ignore_rate_limit)
            .await;

        let mut st = self.state.lock().await;
        st.last_run = Some(summary.clone());
        summary
    }

    /// Manual run across every known region, sequentially, under one latch.
    async fn run_all_regions(&self, force: bool, ignore_rate_limit: bool) -> RunSummary {
        let now = self.clock.now();
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("tracker: batch already in flight; trigger dropped");
            return RunSummary::dropped("manual", None, now);
        }
        let _latch = LatchGuard(&self.in_flight);

        let started = std::time::Instant::now();
        let mut total = RunSummary::dropped("manual", None, now);

        let regions = match self.store.distinct_regions().await {
            Ok(regions) => regions,
            Err(e) => {
                tracing::error!(error = %e, "tracker: failed to load regions for manual run");
                Vec::new()
            }
        };

        for region in regions {
            let summary = self
                .run_region_batch("manual", &region, force, ignore_rate_limit)
                .await;
            total.processed += summary.processed;
            total.errors += summary.errors;
            total.remaining += summary.remaining;
            // A rate limit aborts the whole manual sweep too, unless the
            // caller explicitly bypasses the gate.
            if !ignore_rate_limit {
                let st = self.state.lock().await;
                if st.rate_limited_until.is_some() {
                    break;
                }
            }
        }

        total.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut st = self.state.lock().await;
        st.last_run = Some(total.clone());
        total
    }

    /// Enter the backoff window after an HTTP 429: cancel every pending
    /// region timer and arm the single resumption timer.
    pub(crate) async fn enter_backoff(&self, now: DateTime<Utc>) {
        let until = now + Duration::hours(BACKOFF_HOURS);
        tracing::warn!(until = %until, "tracker: rate limited; backing off");
        let mut st = self.state.lock().await;
        st.rate_limited_until = Some(until);
        st.region_timers.clear();
        st.region_due_at.clear();
        self.arm_wake(&mut st, until, "backoff-resume", now);
    }

    /// Status snapshot for operators. Reads prune the log and lazily clear
    /// an expired backoff.
    pub async fn status(&self) -> TrackerSnapshot {
        let now = self.clock.now();
        let mut st = self.state.lock().await;
        st.clear_expired_rate_limit(now);

        let pending_region = st.region_due_at.values().min().copied();
        let wake_at = st.wake.as_ref().map(|(at, _)| *at);
        let next_wake_at = [pending_region, wake_at].into_iter().flatten().min();

        TrackerSnapshot {
            configured: self.source.is_some(),
            running: self.in_flight.load(Ordering::SeqCst),
            rate_limited_until: st.rate_limited_until,
            last_run: st.last_run.clone(),
            regions: st.regions.clone(),
            region_last_run: st
                .region_last_run
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            next_wake_at,
            log: st.log.snapshot(now),
        }
    }

    /// Replace the wake slot with the next-daily-cycle timer.
    ///
    /// No-op while a backoff is active: the resumption timer owns the wake
    /// slot until it fires, and a region batch that just hit the rate limit
    /// must not push the wake out to the next cycle.
    fn arm_next_cycle(&self, st: &mut SchedulerState, now: DateTime<Utc>) {
        if st.rate_limited_until.is_some() {
            return;
        }
        if let Some(at) = st.next_cycle_at {
            self.arm_wake(st, at, "daily-cycle", now);
        }
    }

    /// Replace whatever occupies the wake slot with a timer that starts a
    /// new cycle at `at`.
    fn arm_wake(
        &self,
        st: &mut SchedulerState,
        at: DateTime<Utc>,
        reason: &'static str,
        now: DateTime<Utc>,
    ) {
        let weak = self.weak.clone();
        let timer = TimerHandle::after(to_std(at - now), async move {
            if let Some(tracker) = weak.upgrade() {
                tracker.start_daily_cycle(reason).await;
            }
        });
        st.wake = Some((at, timer));
    }
}

/// Releases the in-flight latch even if the batch panics.
struct LatchGuard<'a>(&'a AtomicBool);

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Offset between consecutive region timers.
///
/// One hour up to 24 regions; beyond that the stagger shrinks to
/// `24h / region_count` so the whole cycle always fits inside its window
/// instead of colliding with the next cycle's reschedule.
pub(crate) fn stagger_interval(region_count: usize) -> StdDuration {
    const HOUR_SECS: u64 = 3_600;
    const CYCLE_SECS: u64 = 24 * HOUR_SECS;
    let count = region_count.max(1) as u64;
    if count > 24 {
        StdDuration::from_secs(CYCLE_SECS / count)
    } else {
        StdDuration::from_secs(HOUR_SECS)
    }
}

fn to_std(d: Duration) -> StdDuration {
    d.to_std().unwrap_or(StdDuration::ZERO)
}
