//! Decides when to refresh and tells every registered consumer about it.

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::RefreshCache;
use crate::model::ContainerDataset;
use crate::ports::{DatasetConsumer, PortError, RefreshOutcome};

/// Whether a refresh is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Waiting for the next tick or trigger.
    Idle,
    /// A fetch is in flight.
    Refreshing,
}

/// Bookkeeping about past refresh attempts.
#[derive(Debug, Clone, Default)]
pub struct RefreshStatus {
    /// Start of the most recent completed attempt.
    pub last_attempt: Option<DateTime<Utc>>,
    /// Start of the most recent successful attempt.
    pub last_success: Option<DateTime<Utc>>,
    /// Error of the most recent attempt, cleared on success.
    pub last_failure: Option<Arc<PortError>>,
    /// Failed attempts since the last success.
    pub consecutive_failures: u32,
}

impl RefreshStatus {
    fn record_success(&mut self, at: DateTime<Utc>) {
        self.last_attempt = Some(at);
        self.last_success = Some(at);
        self.last_failure = None;
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self, at: DateTime<Utc>, err: Arc<PortError>) {
        self.last_attempt = Some(at);
        self.last_failure = Some(err);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}

/// Counts a refresh as in flight until dropped, including on cancellation.
struct RefreshingGuard<'count>(&'count AtomicUsize);

impl<'count> RefreshingGuard<'count> {
    fn enter(in_flight: &'count AtomicUsize) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        Self(in_flight)
    }
}

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns the last good dataset and fans refresh outcomes out to consumers.
pub struct UpdateCoordinator {
    cache: RefreshCache,
    interval: Duration,
    current: RwLock<Option<Arc<ContainerDataset>>>,
    status: Mutex<RefreshStatus>,
    consumers: RwLock<Vec<Arc<dyn DatasetConsumer>>>,
    in_flight: AtomicUsize,
    trigger: Notify,
}

impl UpdateCoordinator {
    /// Create a coordinator that refreshes through `cache` every `interval`.
    #[must_use]
    pub fn new(cache: RefreshCache, interval: Duration) -> Self {
        Self {
            cache,
            interval,
            current: RwLock::new(None),
            status: Mutex::new(RefreshStatus::default()),
            consumers: RwLock::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            trigger: Notify::new(),
        }
    }

    /// Current state of the refresh cycle.
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            CoordinatorState::Refreshing
        } else {
            CoordinatorState::Idle
        }
    }

    /// Last successfully fetched dataset.
    #[must_use]
    pub fn dataset(&self) -> Option<Arc<ContainerDataset>> {
        self.current.read().clone()
    }

    /// Copy of the refresh bookkeeping.
    #[must_use]
    pub fn status(&self) -> RefreshStatus {
        self.status.lock().clone()
    }

    /// Number of live consumers.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.read().len()
    }

    /// Make `consumer` live.
    ///
    /// Before the first refresh attempt has completed this performs it, so a
    /// consumer never goes live without having seen either data or a failure.
    pub async fn register(&self, consumer: Arc<dyn DatasetConsumer>) {
        let never_refreshed = self.status.lock().last_attempt.is_none();
        if never_refreshed && let Err(err) = self.refresh_now().await {
            debug!(%err, "initial refresh failed, registering consumer anyway");
        }

        // Priming under the write lock keeps a concurrent refresh from slipping in
        // between the priming and the push.
        let mut consumers = self.consumers.write();
        self.prime(consumer.as_ref());
        consumers.push(consumer);
    }

    /// Refresh through the cache and notify consumers.
    ///
    /// # Errors
    ///
    /// Returns the fetch or extraction error after consumers have been told
    /// about it. The previous dataset stays current.
    pub async fn refresh_now(&self) -> Result<Arc<ContainerDataset>, Arc<PortError>> {
        self.refresh(false).await
    }

    /// Like [`Self::refresh_now`], but ignores the cache's time-to-live.
    ///
    /// # Errors
    ///
    /// See [`Self::refresh_now`].
    pub async fn force_refresh(&self) -> Result<Arc<ContainerDataset>, Arc<PortError>> {
        self.refresh(true).await
    }

    /// Ask the running loop for a refresh without waiting for it.
    pub fn request_refresh(&self) {
        self.trigger.notify_one();
    }

    /// Periodic refresh loop, returns once `shutdown` completes.
    ///
    /// The first tick fires one interval after the start. Each refresh runs
    /// on its own task; one still in flight at shutdown is aborted, which
    /// leaves the cached and current datasets untouched.
    pub async fn run<F>(self: Arc<Self>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = pin!(shutdown);

        info!(
            interval_secs = self.interval.as_secs(),
            "starting refresh loop"
        );

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => debug!("scheduled refresh"),
                () = self.trigger.notified() => debug!("manual refresh"),
            }

            let coordinator = Arc::clone(&self);
            let mut refresh = tokio::spawn(async move { coordinator.refresh_now().await });

            tokio::select! {
                () = &mut shutdown => {
                    refresh.abort();
                    info!("shutting down, abandoning refresh in flight");
                    break;
                }
                joined = &mut refresh => {
                    if let Err(err) = joined {
                        warn!(%err, "refresh task ended abnormally");
                    }
                }
            }
        }

        info!("refresh loop stopped");
    }

    async fn refresh(&self, force: bool) -> Result<Arc<ContainerDataset>, Arc<PortError>> {
        let _refreshing = RefreshingGuard::enter(&self.in_flight);
        let started = Utc::now();

        let result = if force {
            self.cache.refetch(started).await
        } else {
            self.cache.get(started).await
        };

        match result {
            Ok(dataset) => {
                *self.current.write() = Some(Arc::clone(&dataset));
                self.status.lock().record_success(started);
                info!(
                    containers = dataset.len(),
                    record_problems = dataset.diagnostics().len(),
                    "container data refreshed"
                );
                self.notify(RefreshOutcome::Updated(&dataset));
                Ok(dataset)
            }
            Err(err) => {
                let failures = {
                    let mut status = self.status.lock();
                    status.record_failure(started, Arc::clone(&err));
                    status.consecutive_failures
                };
                warn!(%err, failures, "refresh failed, keeping previous data");
                self.notify(RefreshOutcome::Failed(&err));
                Err(err)
            }
        }
    }

    fn notify(&self, outcome: RefreshOutcome<'_>) {
        for consumer in self.consumers.read().iter() {
            consumer.refresh(outcome);
        }
    }

    fn prime(&self, consumer: &dyn DatasetConsumer) {
        if let Some(dataset) = self.dataset() {
            consumer.refresh(RefreshOutcome::Updated(&dataset));
        }
        let last_failure = self.status.lock().last_failure.clone();
        if let Some(err) = last_failure {
            consumer.refresh(RefreshOutcome::Failed(&err));
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::model::RegistrationId;
    use crate::ports::PagePort;
    use crate::testing::{Reply, ScriptedPort, page};
    use crate::view::ContainerView;

    const WAIT: Duration = Duration::from_secs(2);

    fn build(
        port: &Arc<ScriptedPort>,
        ttl: TimeDelta,
        interval: Duration,
    ) -> Arc<UpdateCoordinator> {
        let cache = RefreshCache::new(Arc::clone(port) as Arc<dyn PagePort>, ttl);
        Arc::new(UpdateCoordinator::new(cache, interval))
    }

    /// Forwards every outcome as a short label.
    struct Recorder(mpsc::UnboundedSender<&'static str>);

    impl DatasetConsumer for Recorder {
        fn refresh(&self, outcome: RefreshOutcome<'_>) {
            let label = match outcome {
                RefreshOutcome::Updated(_) => "updated",
                RefreshOutcome::Failed(_) => "failed",
            };
            self.0.send(label).ok();
        }
    }

    async fn next_label(rx: &mut mpsc::UnboundedReceiver<&'static str>) -> &'static str {
        time::timeout(WAIT, rx.recv())
            .await
            .expect("outcome in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn registration_waits_for_initial_refresh() {
        let port = Arc::new(ScriptedPort::new([Reply::Page(page(&[("A", 42)]))]));
        let coordinator = build(&port, TimeDelta::hours(1), Duration::from_secs(3600));
        let first = Arc::new(ContainerView::new("A".into()));
        let second = Arc::new(ContainerView::new("B".into()));

        coordinator.register(Arc::clone(&first) as Arc<dyn DatasetConsumer>).await;
        coordinator.register(Arc::clone(&second) as Arc<dyn DatasetConsumer>).await;

        assert_eq!(port.calls(), 1);
        assert_eq!(coordinator.consumer_count(), 2);
        assert!(first.is_available());
        assert_eq!(first.state(), Some(42.0));
        assert!(!second.is_available());
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
    }

    #[tokio::test]
    async fn failed_initial_refresh_still_registers() {
        let port = Arc::new(ScriptedPort::new([Reply::Fail]));
        let coordinator = build(&port, TimeDelta::hours(1), Duration::from_secs(3600));
        let view = Arc::new(ContainerView::new("A".into()));

        coordinator.register(Arc::clone(&view) as Arc<dyn DatasetConsumer>).await;

        assert_eq!(coordinator.consumer_count(), 1);
        assert!(!view.is_available());
        assert!(!view.is_fresh());
        let status = coordinator.status();
        assert!(status.last_attempt.is_some());
        assert_eq!(status.consecutive_failures, 1);
        assert!(coordinator.dataset().is_none());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_dataset_and_views() {
        let port = Arc::new(ScriptedPort::new([
            Reply::Page(page(&[("A", 42)])),
            Reply::Page("<html><body><div id=\"Map\"></div></body></html>".to_owned()),
        ]));
        let coordinator = build(&port, TimeDelta::zero(), Duration::from_secs(3600));
        let view = Arc::new(ContainerView::new("A".into()));
        coordinator.register(Arc::clone(&view) as Arc<dyn DatasetConsumer>).await;
        let before = coordinator.dataset().expect("initial dataset");

        let err = coordinator.refresh_now().await.expect_err("page redesigned");

        assert!(matches!(*err, PortError::Parse(_)));
        let after = coordinator.dataset().expect("dataset retained");
        assert!(Arc::ptr_eq(&before, &after));
        assert!(view.is_available());
        assert!(!view.is_fresh());
        assert_eq!(view.state(), Some(42.0));
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
    }

    #[tokio::test]
    async fn success_after_failure_resets_status() {
        let port = Arc::new(ScriptedPort::new([
            Reply::Fail,
            Reply::Fail,
            Reply::Page(page(&[("A", 5)])),
        ]));
        let coordinator = build(&port, TimeDelta::zero(), Duration::from_secs(3600));

        coordinator.refresh_now().await.expect_err("first fails");
        coordinator.refresh_now().await.expect_err("second fails");
        assert_eq!(coordinator.status().consecutive_failures, 2);

        coordinator.refresh_now().await.expect("third succeeds");
        let status = coordinator.status();
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_failure.is_none());
        assert_eq!(status.last_success, status.last_attempt);
    }

    #[tokio::test]
    async fn late_consumer_sees_stale_data_as_not_fresh() {
        let port = Arc::new(ScriptedPort::new([Reply::Page(page(&[("A", 42)])), Reply::Fail]));
        let coordinator = build(&port, TimeDelta::zero(), Duration::from_secs(3600));
        coordinator.refresh_now().await.expect("first succeeds");
        coordinator.refresh_now().await.expect_err("second fails");

        let view = Arc::new(ContainerView::new("A".into()));
        coordinator.register(Arc::clone(&view) as Arc<dyn DatasetConsumer>).await;

        assert_eq!(port.calls(), 2);
        assert!(view.is_available());
        assert!(!view.is_fresh());
    }

    #[tokio::test]
    async fn forced_refresh_bypasses_ttl() {
        let port = Arc::new(ScriptedPort::new([
            Reply::Page(page(&[("A", 10)])),
            Reply::Page(page(&[("A", 90)])),
        ]));
        let coordinator = build(&port, TimeDelta::hours(12), Duration::from_secs(3600));
        let view = Arc::new(ContainerView::new(RegistrationId::from("A")));
        coordinator.register(Arc::clone(&view) as Arc<dyn DatasetConsumer>).await;

        coordinator.refresh_now().await.expect("served from cache");
        assert_eq!(port.calls(), 1);

        coordinator.force_refresh().await.expect("refetched");
        assert_eq!(port.calls(), 2);
        assert_eq!(view.state(), Some(90.0));
    }

    #[tokio::test]
    async fn manual_trigger_drives_the_loop() {
        let port = Arc::new(ScriptedPort::new([
            Reply::Page(page(&[("A", 10)])),
            Reply::Page(page(&[("A", 20)])),
        ]));
        let coordinator = build(&port, TimeDelta::zero(), Duration::from_secs(3600));
        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.register(Arc::new(Recorder(tx))).await;
        assert_eq!(next_label(&mut rx).await, "updated");

        let (stop, stopped) = oneshot::channel::<()>();
        let looping = tokio::spawn(Arc::clone(&coordinator).run(async {
            stopped.await.ok();
        }));

        coordinator.request_refresh();
        assert_eq!(next_label(&mut rx).await, "updated");
        assert_eq!(port.calls(), 2);

        stop.send(()).ok();
        time::timeout(WAIT, looping)
            .await
            .expect("loop stops")
            .expect("loop task");
    }

    #[tokio::test]
    async fn ticks_retry_after_failures() {
        let port = Arc::new(ScriptedPort::new([
            Reply::Page(page(&[("A", 10)])),
            Reply::Fail,
            Reply::Page(page(&[("A", 30)])),
        ]));
        let coordinator = build(&port, TimeDelta::zero(), Duration::from_millis(20));
        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.register(Arc::new(Recorder(tx))).await;

        let (stop, stopped) = oneshot::channel::<()>();
        let looping = tokio::spawn(Arc::clone(&coordinator).run(async {
            stopped.await.ok();
        }));

        assert_eq!(next_label(&mut rx).await, "updated");
        assert_eq!(next_label(&mut rx).await, "failed");
        assert_eq!(next_label(&mut rx).await, "updated");

        stop.send(()).ok();
        time::timeout(WAIT, looping)
            .await
            .expect("loop stops")
            .expect("loop task");
    }

    #[tokio::test]
    async fn shutdown_abandons_refresh_in_flight() {
        let port = Arc::new(ScriptedPort::new([Reply::Page(page(&[("A", 10)])), Reply::Hang]));
        let coordinator = build(&port, TimeDelta::zero(), Duration::from_secs(3600));
        let view = Arc::new(ContainerView::new("A".into()));
        coordinator.register(Arc::clone(&view) as Arc<dyn DatasetConsumer>).await;
        let before = coordinator.dataset().expect("initial dataset");

        let (stop, stopped) = oneshot::channel::<()>();
        let looping = tokio::spawn(Arc::clone(&coordinator).run(async {
            stopped.await.ok();
        }));

        coordinator.request_refresh();
        time::timeout(WAIT, async {
            while port.calls() < 2 {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("hanging fetch started");
        assert_eq!(coordinator.state(), CoordinatorState::Refreshing);

        stop.send(()).ok();
        time::timeout(WAIT, looping)
            .await
            .expect("loop stops")
            .expect("loop task");

        // the aborted task is dropped asynchronously
        time::timeout(WAIT, async {
            while coordinator.state() == CoordinatorState::Refreshing {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("refresh abandoned");

        let after = coordinator.dataset().expect("dataset retained");
        assert!(Arc::ptr_eq(&before, &after));
        assert!(view.is_fresh());
        assert_eq!(coordinator.status().consecutive_failures, 0);
    }
}
