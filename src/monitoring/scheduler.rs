//! Drives periodic probing of every active monitor.
//!
//! A single coordinating loop wakes up every tick, works out which monitors are
//! due and spawns one probe task per due monitor. Probe tasks are bounded by a
//! global semaphore, and a monitor with a check still in flight is skipped until
//! that check has been recorded.

use chrono::Utc;
use dashmap::DashSet;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use super::error::SchedulerError;
use super::models::{CheckResult, Monitor, ProbeCause};
use super::pipeline::CheckPipeline;
use super::prober::Prober;
use super::store::MonitorStore;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick: Duration,
    pub max_concurrent_probes: usize,
    /// Upper bound of the random delay added to every next-due time.
    pub jitter: Duration,
    /// Longest pause between registry retries while storage is unavailable.
    pub registry_backoff_max: Duration,
    /// Name of the location this scheduler probes from.
    pub location: Option<String>,
    /// Extra time a probe task gets past the monitor's own timeout before it is
    /// cancelled and recorded as failed.
    pub probe_grace: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            max_concurrent_probes: 32,
            jitter: Duration::from_secs(2),
            registry_backoff_max: Duration::from_secs(60),
            location: None,
            probe_grace: Duration::from_secs(1),
        }
    }
}

struct SchedulerInner {
    store: Arc<dyn MonitorStore>,
    prober: Arc<dyn Prober>,
    pipeline: Arc<CheckPipeline>,
    settings: SchedulerSettings,
    in_flight: Arc<DashSet<i32>>,
    permits: Semaphore,
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    manual: mpsc::UnboundedSender<i32>,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    running: Mutex<Option<RunningLoop>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        prober: Arc<dyn Prober>,
        pipeline: Arc<CheckPipeline>,
        settings: SchedulerSettings,
    ) -> Self {
        let permits = Semaphore::new(settings.max_concurrent_probes.max(1));
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                prober,
                pipeline,
                settings,
                in_flight: Arc::new(DashSet::new()),
                permits,
            }),
            running: Mutex::new(None),
        }
    }

    /// Starts the coordinating loop. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            debug!("Scheduler already running.");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (manual_tx, manual_rx) = mpsc::unbounded_channel();
        let tick_loop = TickLoop::new(Arc::clone(&self.inner));
        let handle = tokio::spawn(tick_loop.run(shutdown_rx, manual_rx));

        *running = Some(RunningLoop {
            shutdown: shutdown_tx,
            manual: manual_tx,
            handle,
        });
        info!(
            tick_ms = self.inner.settings.tick.as_millis() as u64,
            max_concurrent_probes = self.inner.settings.max_concurrent_probes,
            location = ?self.inner.settings.location,
            "Scheduler started."
        );
        true
    }

    /// Stops the loop and waits for every in-flight probe to record its result.
    /// Returns `false` if the scheduler was not running.
    pub async fn stop(&self) -> bool {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(running) = running else {
            return false;
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            error!(error = %e, "Scheduler loop terminated abnormally.");
        }
        info!("Scheduler stopped.");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Queues an immediate check of `monitor_id`, outside its normal cadence.
    pub fn schedule_now(&self, monitor_id: i32) -> Result<(), SchedulerError> {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let running = running.as_ref().ok_or(SchedulerError::NotRunning)?;
        running
            .manual
            .send(monitor_id)
            .map_err(|_| SchedulerError::QueueClosed)
    }

    pub fn in_flight(&self, monitor_id: i32) -> bool {
        self.inner.in_flight.contains(&monitor_id)
    }
}

/// Marks a monitor as having a check in flight until dropped.
struct InFlightGuard {
    set: Arc<DashSet<i32>>,
    monitor_id: i32,
}

impl InFlightGuard {
    fn acquire(set: &Arc<DashSet<i32>>, monitor_id: i32) -> Option<Self> {
        set.insert(monitor_id).then(|| Self {
            set: Arc::clone(set),
            monitor_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(&self.monitor_id);
    }
}

struct TickLoop {
    inner: Arc<SchedulerInner>,
    next_due: HashMap<i32, Instant>,
    probes: JoinSet<()>,
    registry_failures: u32,
    paused_until: Option<Instant>,
}

impl TickLoop {
    fn new(inner: Arc<SchedulerInner>) -> Self {
        Self {
            inner,
            next_due: HashMap::new(),
            probes: JoinSet::new(),
            registry_failures: 0,
            paused_until: None,
        }
    }

    async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
        mut manual: mpsc::UnboundedReceiver<i32>,
    ) {
        let mut ticker = interval(self.inner.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,
                Some(monitor_id) = manual.recv() => self.run_manual(monitor_id).await,
                _ = ticker.tick() => self.tick().await,
                Some(joined) = self.probes.join_next(), if !self.probes.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Probe task ended unexpectedly.");
                    }
                }
            }
        }

        let pending = self.probes.len();
        if pending > 0 {
            info!(pending, "Waiting for in-flight probes before stopping.");
        }
        while let Some(joined) = self.probes.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Probe task ended unexpectedly.");
            }
        }
    }

    async fn tick(&mut self) {
        let now = Instant::now();
        if self.paused_until.is_some_and(|until| now < until) {
            return;
        }

        let monitors = match self.inner.store.active_monitors().await {
            Ok(monitors) => {
                if self.registry_failures > 0 {
                    info!(
                        failures = self.registry_failures,
                        "Monitor registry reachable again; resuming scheduling."
                    );
                }
                self.registry_failures = 0;
                self.paused_until = None;
                monitors
            }
            Err(e) => {
                self.registry_failures = self.registry_failures.saturating_add(1);
                let delay = registry_backoff(
                    self.inner.settings.tick,
                    self.registry_failures,
                    self.inner.settings.registry_backoff_max,
                );
                warn!(
                    error = %e,
                    failures = self.registry_failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Monitor registry unavailable; pausing scheduling."
                );
                self.paused_until = Some(now + delay);
                return;
            }
        };

        let active: HashSet<i32> = monitors.iter().map(|m| m.id).collect();
        self.next_due.retain(|id, _| active.contains(id));

        let location = self.inner.settings.location.clone();
        for monitor in monitors {
            if !monitor.probed_from(location.as_deref()) {
                continue;
            }
            let jitter = self.jitter();
            let due = *self.next_due.entry(monitor.id).or_insert(now + jitter);
            if due > now {
                continue;
            }

            let interval = monitor.interval();
            let monitor_id = monitor.id;
            if self.launch(monitor) {
                let jitter = self.jitter();
                self.next_due.insert(monitor_id, now + interval + jitter);
            }
        }
    }

    async fn run_manual(&mut self, monitor_id: i32) {
        let monitor = match self.inner.store.monitor(monitor_id).await {
            Ok(Some(monitor)) if monitor.is_active => monitor,
            Ok(_) => {
                warn!(monitor_id, "Manual check requested for an unknown or inactive monitor.");
                return;
            }
            Err(e) => {
                error!(monitor_id, error = %e, "Failed to load monitor for manual check.");
                return;
            }
        };

        let interval = monitor.interval();
        if self.launch(monitor) {
            let next = Instant::now() + interval + self.jitter();
            self.next_due.insert(monitor_id, next);
        }
    }

    /// Spawns a probe unless one is already in flight for this monitor.
    fn launch(&mut self, monitor: Monitor) -> bool {
        let Some(guard) = InFlightGuard::acquire(&self.inner.in_flight, monitor.id) else {
            debug!(monitor_id = monitor.id, "Previous check still in flight; skipping.");
            return false;
        };
        let inner = Arc::clone(&self.inner);
        self.probes.spawn(async move {
            inner.check(monitor, guard).await;
        });
        true
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.inner.settings.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

impl SchedulerInner {
    async fn check(&self, monitor: Monitor, _guard: InFlightGuard) {
        let Ok(_permit) = self.permits.acquire().await else {
            return;
        };

        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = monitor.probe_timeout() + self.settings.probe_grace;
        let prober = Arc::clone(&self.prober);
        let target = monitor.clone();
        let mut handle = tokio::spawn(async move { prober.probe(&target).await });

        let mut result = match tokio::time::timeout(deadline, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(monitor_id = monitor.id, error = %e, "Probe task failed.");
                probe_failure(&monitor, started_at, started)
            }
            Err(_) => {
                handle.abort();
                warn!(
                    monitor_id = monitor.id,
                    deadline_ms = deadline.as_millis() as u64,
                    "Probe exceeded its deadline and was cancelled."
                );
                probe_failure(&monitor, started_at, started)
            }
        };
        if result.location.is_none() {
            result.location = self.settings.location.clone();
        }

        self.pipeline.handle_result(&monitor, result).await;
    }
}

fn probe_failure(monitor: &Monitor, started_at: chrono::DateTime<Utc>, started: Instant) -> CheckResult {
    CheckResult::down(
        monitor.id,
        started_at,
        started.elapsed().as_millis() as u64,
        ProbeCause::ProbeError,
    )
}

fn registry_backoff(base: Duration, failures: u32, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(failures.saturating_sub(1));
    base.saturating_mul(factor).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::incident::IncidentTracker;
    use crate::monitoring::models::{CheckStatus, MonitorStatus, NotificationConfig};
    use crate::monitoring::store::memory::MemoryStore;
    use crate::notifications::service::{Notifier, NotifierSettings};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProber {
        delay: Duration,
        calls: AtomicUsize,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CountingProber {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Prober for CountingProber {
        async fn probe(&self, monitor: &Monitor) -> CheckResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            CheckResult::up(monitor.id, Utc::now(), self.delay.as_millis() as u64)
        }
    }

    /// Panics for monitor 1, hangs for monitor 2, succeeds otherwise.
    struct MisbehavingProber;

    #[async_trait]
    impl Prober for MisbehavingProber {
        async fn probe(&self, monitor: &Monitor) -> CheckResult {
            match monitor.id {
                1 => panic!("prober blew up"),
                2 => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    CheckResult::up(monitor.id, Utc::now(), 0)
                }
                _ => CheckResult::up(monitor.id, Utc::now(), 5),
            }
        }
    }

    fn monitor(id: i32, interval_seconds: u32) -> Monitor {
        Monitor {
            id,
            user_id: 1,
            name: format!("monitor-{id}"),
            url: format!("https://m{id}.example.com"),
            interval_seconds,
            timeout_ms: Some(30_000),
            locations: Vec::new(),
            notification_config: NotificationConfig::default(),
            status: MonitorStatus::Unknown,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            tick: Duration::from_millis(100),
            max_concurrent_probes: 8,
            jitter: Duration::ZERO,
            registry_backoff_max: Duration::from_secs(1),
            location: None,
            probe_grace: Duration::from_millis(500),
        }
    }

    fn scheduler(
        store: &Arc<MemoryStore>,
        prober: Arc<dyn Prober>,
        settings: SchedulerSettings,
    ) -> Scheduler {
        let notifier = Arc::new(Notifier::new(store.clone(), NotifierSettings::default()));
        let pipeline = Arc::new(CheckPipeline::new(
            store.clone(),
            Arc::new(IncidentTracker::default()),
            notifier,
        ));
        Scheduler::new(store.clone(), prober, pipeline, settings)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let store = Arc::new(MemoryStore::default());
        let s = scheduler(&store, Arc::new(CountingProber::default()), settings());

        assert_eq!(s.schedule_now(1), Err(SchedulerError::NotRunning));
        assert!(!s.stop().await);
        assert!(s.start());
        assert!(!s.start());
        assert!(s.is_running());
        assert!(s.stop().await);
        assert!(!s.stop().await);
        assert!(!s.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitors_are_probed_once_per_interval() {
        let store = Arc::new(MemoryStore::default());
        store.add_monitor(monitor(1, 10));
        store.add_monitor(monitor(2, 10));
        let prober = Arc::new(CountingProber::default());
        let s = scheduler(&store, prober.clone(), settings());

        s.start();
        tokio::time::sleep(Duration::from_secs(25)).await;
        s.stop().await;

        assert_eq!(store.checks_for(1).len(), 3);
        assert_eq!(store.checks_for(2).len(), 3);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 6);
        assert!(store.checks_for(1).iter().all(|c| c.status == CheckStatus::Up));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_monitor_is_skipped_and_stop_drains() {
        let store = Arc::new(MemoryStore::default());
        store.add_monitor(monitor(1, 10));
        let prober = Arc::new(CountingProber::with_delay(Duration::from_secs(25)));
        let s = scheduler(&store, prober.clone(), settings());

        s.start();
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
        assert_eq!(prober.peak.load(Ordering::SeqCst), 1);
        assert_eq!(store.checks_for(1).len(), 1);
        assert!(s.in_flight(1));

        s.stop().await;
        assert_eq!(store.checks_for(1).len(), 2);
        assert!(!s.in_flight(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_concurrency_cap() {
        let store = Arc::new(MemoryStore::default());
        for id in 1..=5 {
            store.add_monitor(monitor(id, 60));
        }
        let prober = Arc::new(CountingProber::with_delay(Duration::from_secs(1)));
        let mut capped = settings();
        capped.max_concurrent_probes = 2;
        let s = scheduler(&store, prober.clone(), capped);

        s.start();
        tokio::time::sleep(Duration::from_secs(5)).await;
        s.stop().await;

        assert_eq!(prober.calls.load(Ordering::SeqCst), 5);
        assert_eq!(prober.peak.load(Ordering::SeqCst), 2);
        assert_eq!(store.checks.lock().unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prober_failures_are_isolated_per_monitor() {
        let store = Arc::new(MemoryStore::default());
        store.add_monitor(monitor(1, 60));
        let mut hanging = monitor(2, 60);
        hanging.timeout_ms = Some(1_000);
        store.add_monitor(hanging);
        store.add_monitor(monitor(3, 60));
        let s = scheduler(&store, Arc::new(MisbehavingProber), settings());

        s.start();
        tokio::time::sleep(Duration::from_secs(3)).await;
        s.stop().await;

        for id in [1, 2] {
            let checks = store.checks_for(id);
            assert_eq!(checks.len(), 1, "monitor {id}");
            assert_eq!(checks[0].status, CheckStatus::Down);
            assert_eq!(checks[0].cause, Some(ProbeCause::ProbeError));
        }
        let healthy = store.checks_for(3);
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].status, CheckStatus::Up);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_now_runs_an_extra_check() {
        let store = Arc::new(MemoryStore::default());
        store.add_monitor(monitor(1, 3600));
        let s = scheduler(&store, Arc::new(CountingProber::default()), settings());

        s.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.checks_for(1).len(), 1);

        s.schedule_now(1).unwrap();
        s.schedule_now(99).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        s.stop().await;

        assert_eq!(store.checks_for(1).len(), 2);
        assert!(store.checks_for(99).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_outage_pauses_then_resumes() {
        let store = Arc::new(MemoryStore::default());
        store.add_monitor(monitor(1, 3600));
        store.fail_listing.store(3, Ordering::SeqCst);
        let s = scheduler(&store, Arc::new(CountingProber::default()), settings());

        s.start();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(store.checks_for(1).is_empty());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(s.is_running());
        s.stop().await;

        assert_eq!(store.fail_listing.load(Ordering::SeqCst), 0);
        assert_eq!(store.checks_for(1).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_location_filter() {
        let store = Arc::new(MemoryStore::default());
        let mut eu = monitor(1, 60);
        eu.locations = vec!["eu-west".to_string()];
        let mut us = monitor(2, 60);
        us.locations = vec!["us-east".to_string()];
        store.add_monitor(eu);
        store.add_monitor(us);
        store.add_monitor(monitor(3, 60));
        let mut located = settings();
        located.location = Some("eu-west".to_string());
        let s = scheduler(&store, Arc::new(CountingProber::default()), located);

        s.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        s.stop().await;

        assert_eq!(store.checks_for(1).len(), 1);
        assert!(store.checks_for(2).is_empty());
        assert_eq!(store.checks_for(3).len(), 1);
        assert_eq!(store.checks_for(1)[0].location.as_deref(), Some("eu-west"));
    }

    #[test]
    fn test_registry_backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(1);
        assert_eq!(registry_backoff(base, 1, max), Duration::from_millis(100));
        assert_eq!(registry_backoff(base, 3, max), Duration::from_millis(400));
        assert_eq!(registry_backoff(base, 10, max), max);
        assert_eq!(registry_backoff(base, u32::MAX, max), max);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_never_schedules_early() {
        let store = Arc::new(MemoryStore::default());
        store.add_monitor(monitor(1, 10));
        let mut jittered = settings();
        jittered.jitter = Duration::from_secs(2);
        let s = scheduler(&store, Arc::new(CountingProber::default()), jittered);

        s.start();
        // The first check lands inside the jitter window; the next one can come
        // no sooner than a full interval after it.
        tokio::time::sleep(Duration::from_millis(2_200)).await;
        assert_eq!(store.checks_for(1).len(), 1);
        tokio::time::sleep(Duration::from_millis(7_700)).await;
        assert_eq!(store.checks_for(1).len(), 1);
        tokio::time::sleep(Duration::from_secs(6)).await;
        s.stop().await;

        assert_eq!(store.checks_for(1).len(), 2);
    }
}
