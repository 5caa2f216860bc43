//! Background refresh loop.
//!
//! A single task owns the [`RefreshScheduler`] and is the only writer of the
//! snapshot. Handles talk to it over a command channel; each fetch attempt runs
//! in its own task and reports back over an outcome channel. Observers read
//! snapshots through a `watch` channel.

pub mod scheduler;

pub use scheduler::{RefreshPolicy, RefreshScheduler};

use crate::credentials::CredentialSource;
use crate::error::AppError;
use crate::extractor::extract;
use crate::fetcher::UsageFetcher;
use crate::models::{Snapshot, UsageSection};
use chrono::Utc;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Sleep;

type Outcome = Result<Vec<UsageSection>, AppError>;

#[derive(Debug, Clone, Copy)]
enum Command {
    Start,
    Fetch,
}

/// Cloneable entry point to a running monitor. The monitor task exits once the
/// last handle is dropped.
#[derive(Clone)]
pub struct MonitorHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<Snapshot>,
}

impl MonitorHandle {
    /// Spawns the monitor task on the current tokio runtime. Nothing is fetched
    /// until [`MonitorHandle::start_monitoring`] or [`MonitorHandle::fetch`].
    pub fn spawn(
        policy: RefreshPolicy,
        credentials: Arc<dyn CredentialSource>,
        fetcher: Arc<dyn UsageFetcher>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (snapshots_tx, snapshots_rx) = watch::channel(Snapshot::default());

        let monitor = Monitor {
            scheduler: RefreshScheduler::new(policy),
            credentials,
            fetcher,
            snapshots: snapshots_tx,
            outcomes: outcomes_tx,
            pending: None,
        };
        tokio::spawn(monitor.run(commands_rx, outcomes_rx));

        Self {
            commands: commands_tx,
            snapshots: snapshots_rx,
        }
    }

    pub fn start_monitoring(&self) {
        self.send(Command::Start);
    }

    /// Requests an immediate refresh. Ignored while one is already running.
    pub fn fetch(&self) {
        self.send(Command::Fetch);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!(?command, "monitor task has stopped");
        }
    }
}

struct Monitor {
    scheduler: RefreshScheduler,
    credentials: Arc<dyn CredentialSource>,
    fetcher: Arc<dyn UsageFetcher>,
    snapshots: watch::Sender<Snapshot>,
    outcomes: mpsc::UnboundedSender<Outcome>,
    pending: Option<Pin<Box<Sleep>>>,
}

impl Monitor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut outcomes: mpsc::UnboundedReceiver<Outcome>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start) => {
                        if self.scheduler.start_monitoring() {
                            tracing::info!("usage monitoring started");
                            self.fetch();
                        }
                    }
                    Some(Command::Fetch) => self.fetch(),
                    None => break,
                },
                Some(outcome) = outcomes.recv() => self.finish(outcome),
                () = wait_pending(&mut self.pending) => {
                    self.pending = None;
                    self.fetch();
                }
            }
        }
        tracing::debug!("usage monitor stopped");
    }

    fn fetch(&mut self) {
        if !self.scheduler.begin_fetch() {
            tracing::debug!("refresh already in flight, ignoring request");
            return;
        }
        self.pending = None;
        self.publish();
        tracing::debug!("refreshing usage");

        let credentials = Arc::clone(&self.credentials);
        let fetcher = Arc::clone(&self.fetcher);
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let run =
                async move { refresh_once(credentials.as_ref(), fetcher.as_ref()).await };
            let outcome = match tokio::spawn(run).await {
                Ok(outcome) => outcome,
                Err(e) => Err(AppError::Task(e.to_string())),
            };
            let _ = outcomes.send(outcome);
        });
    }

    fn finish(&mut self, outcome: Outcome) {
        match &outcome {
            Ok(sections) => tracing::info!(sections = sections.len(), "usage refreshed"),
            Err(e) => tracing::warn!(error = %e, "usage refresh failed"),
        }

        let delay = self.scheduler.complete(outcome, Utc::now());
        tracing::debug!(
            delay_secs = delay.as_secs(),
            consecutive_errors = self.scheduler.consecutive_errors(),
            "next refresh scheduled"
        );
        self.pending = Some(Box::pin(tokio::time::sleep(delay)));
        self.publish();
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.scheduler.snapshot().clone());
    }
}

/// One complete attempt: token, request, extraction.
pub async fn refresh_once(
    credentials: &dyn CredentialSource,
    fetcher: &dyn UsageFetcher,
) -> Result<Vec<UsageSection>, AppError> {
    let token = credentials.token().await?;
    let doc = fetcher.fetch(&token).await?;
    Ok(extract(&doc))
}

async fn wait_pending(pending: &mut Option<Pin<Box<Sleep>>>) {
    match pending {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::RawDocument;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::{sleep, timeout};

    struct StaticToken(Option<&'static str>);

    #[async_trait]
    impl CredentialSource for StaticToken {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn token(&self) -> Result<String, AppError> {
            self.0.map(ToString::to_string).ok_or(AppError::NoCredentials)
        }
    }

    enum Reply {
        Usage(f64),
        Status(u16),
        Panic,
    }

    /// Replays scripted replies in order, then keeps answering with usage.
    struct ScriptedFetcher {
        calls: AtomicUsize,
        replies: Mutex<VecDeque<Reply>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedFetcher {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                replies: Mutex::new(replies.into()),
                gate: None,
            })
        }

        fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                replies: Mutex::new(VecDeque::new()),
                gate: Some(gate),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UsageFetcher for ScriptedFetcher {
        async fn fetch(&self, token: &str) -> Result<RawDocument, AppError> {
            assert_eq!(token, "tok");
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let reply = self
                .replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or(Reply::Usage(50.0));
            match reply {
                Reply::Usage(utilization) => {
                    let doc = json!({ "five_hour": { "utilization": utilization } });
                    Ok(doc.as_object().cloned().expect("object"))
                }
                Reply::Status(code) => Err(AppError::ApiFailed(code)),
                Reply::Panic => panic!("fetcher blew up"),
            }
        }
    }

    fn spawn_monitor(fetcher: Arc<ScriptedFetcher>) -> MonitorHandle {
        MonitorHandle::spawn(
            RefreshPolicy::default(),
            Arc::new(StaticToken(Some("tok"))),
            fetcher,
        )
    }

    async fn wait_until(
        handle: &MonitorHandle,
        pred: impl FnMut(&Snapshot) -> bool,
    ) -> Snapshot {
        let mut rx = handle.subscribe();
        let current = timeout(Duration::from_secs(3600), rx.wait_for(pred))
            .await
            .expect("condition reached in time")
            .expect("monitor alive");
        Snapshot::clone(&current)
    }

    #[tokio::test(start_paused = true)]
    async fn start_monitoring_twice_fetches_once() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let handle = spawn_monitor(fetcher.clone());

        handle.start_monitoring();
        handle.start_monitoring();
        let snap = wait_until(&handle, |s| s.last_updated.is_some()).await;
        sleep(Duration::from_secs(1)).await;

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(snap.sections.len(), 1);
        assert_eq!(snap.sections[0].percent, 50);
        assert_eq!(snap.max_percent(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_fetched_before_start() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let handle = spawn_monitor(fetcher.clone());

        sleep(Duration::from_secs(600)).await;
        assert_eq!(fetcher.calls(), 0);
        assert_eq!(handle.snapshot(), Snapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_while_loading_is_ignored() {
        let gate = Arc::new(Notify::new());
        let fetcher = ScriptedFetcher::gated(gate.clone());
        let handle = spawn_monitor(fetcher.clone());

        handle.start_monitoring();
        wait_until(&handle, |s| s.is_loading).await;
        handle.fetch();
        handle.fetch();
        sleep(Duration::from_secs(1)).await;

        assert_eq!(fetcher.calls(), 1);
        assert!(handle.snapshot().is_loading);

        gate.notify_one();
        let snap = wait_until(&handle, |s| !s.is_loading).await;
        assert_eq!(fetcher.calls(), 1);
        assert!(snap.last_updated.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_back_off_then_success_restores_interval() {
        let fetcher = ScriptedFetcher::new(vec![Reply::Status(503), Reply::Status(503)]);
        let handle = spawn_monitor(fetcher.clone());

        handle.start_monitoring();
        let snap = wait_until(&handle, |s| s.error.is_some()).await;
        assert_eq!(snap.error.as_deref(), Some("API error: 503"));
        assert!(!snap.is_loading);
        assert!(snap.sections.is_empty());

        // first retry 10s after the failure
        sleep(Duration::from_secs(9)).await;
        assert_eq!(fetcher.calls(), 1);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(fetcher.calls(), 2);

        // second retry 20s after the second failure (t = 30s)
        sleep(Duration::from_secs(18)).await;
        assert_eq!(fetcher.calls(), 2);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(fetcher.calls(), 3);

        let snap = handle.snapshot();
        assert_eq!(snap.error, None);
        assert_eq!(snap.sections.len(), 1);

        // success goes back to the full interval (t = 330s)
        sleep(Duration::from_secs(298)).await;
        assert_eq!(fetcher.calls(), 3);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(fetcher.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_fetch_replaces_pending_retry() {
        let fetcher = ScriptedFetcher::new(vec![
            Reply::Status(500),
            Reply::Status(500),
            Reply::Status(500),
        ]);
        let handle = spawn_monitor(fetcher.clone());

        handle.start_monitoring();
        wait_until(&handle, |s| s.error.is_some()).await;
        sleep(Duration::from_secs(5)).await;

        handle.fetch();
        sleep(Duration::from_secs(6)).await;
        // the 10s retry from the first failure was cancelled
        assert_eq!(fetcher.calls(), 2);

        // second failure at t = 5s schedules a 20s retry
        sleep(Duration::from_secs(13)).await;
        assert_eq!(fetcher.calls(), 2);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_previous_sections() {
        let fetcher = ScriptedFetcher::new(vec![Reply::Usage(42.9), Reply::Status(503)]);
        let handle = spawn_monitor(fetcher.clone());

        handle.start_monitoring();
        let first = wait_until(&handle, |s| s.last_updated.is_some()).await;

        handle.fetch();
        let second = wait_until(&handle, |s| s.error.is_some()).await;

        assert_eq!(second.error.as_deref(), Some("API error: 503"));
        assert!(!second.is_loading);
        assert_eq!(second.sections, first.sections);
        assert_eq!(second.last_updated, first.last_updated);
        assert_eq!(second.sections[0].percent, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credentials_surface_as_error_and_retry() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let handle = MonitorHandle::spawn(
            RefreshPolicy::default(),
            Arc::new(StaticToken(None)),
            fetcher.clone(),
        );

        handle.start_monitoring();
        let snap = wait_until(&handle, |s| s.error.is_some()).await;
        assert_eq!(snap.error.as_deref(), Some("No Claude credentials found"));
        assert_eq!(fetcher.calls(), 0);
        assert!(!snap.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_attempt_does_not_wedge_the_monitor() {
        let fetcher = ScriptedFetcher::new(vec![Reply::Panic]);
        let handle = spawn_monitor(fetcher.clone());

        handle.start_monitoring();
        let snap = wait_until(&handle, |s| s.error.is_some()).await;
        assert!(snap
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("refresh task failed")));
        assert!(!snap.is_loading);

        sleep(Duration::from_secs(11)).await;
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(handle.snapshot().error, None);
    }
}
