//! The bulk dispatch orchestrator.
//!
//! One send at a time, in list order. An item-level failure is recorded
//! and the run keeps going; only a missing connection up front or an
//! explicit cancel aborts it.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use {
    despacho_lifecycle::{ConnectionState, Error as LifecycleError, LifecycleEvent, LifecycleManager},
    despacho_provider::{FileStore, RecipientDirectory},
};

use crate::{
    config::{DispatchConfig, DispatchTiming, StartMode},
    error::{Error, Result},
    roster::{self, CodedFile},
    template::render_message,
    types::{DispatchItem, DispatchOutcome, DispatchResult, RunSummary, now_ms},
};

/// Result of preparing a run under the configured start mode.
#[derive(Debug)]
pub enum PreparedRun {
    /// `StartMode::OnPrepare`: the run already executed.
    Started(RunSummary),
    /// `StartMode::Manual`: the items await an explicit `start_run`.
    Pending(Vec<DispatchItem>),
}

/// Sequences bulk runs over the lifecycle manager's connection.
///
/// One run at a time; the result ledger covers the active (or most
/// recently finished) run and is cleared when a new one starts.
pub struct BulkDispatcher {
    lifecycle: Arc<LifecycleManager>,
    files: Arc<dyn FileStore>,
    timing: DispatchTiming,
    start_mode: StartMode,
    active: Mutex<Option<CancellationToken>>,
    ledger: Mutex<Vec<DispatchResult>>,
}

impl BulkDispatcher {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        files: Arc<dyn FileStore>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            lifecycle,
            files,
            timing: config.timing(),
            start_mode: config.start_mode,
            active: Mutex::new(None),
            ledger: Mutex::new(Vec::new()),
        }
    }

    /// Override resolved durations; tests run with millisecond values.
    #[cfg(test)]
    fn with_timing(mut self, timing: DispatchTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().unwrap().is_some()
    }

    /// Snapshot of the current run's result ledger.
    pub fn results(&self) -> Vec<DispatchResult> {
        self.ledger.lock().unwrap().clone()
    }

    /// Request cancellation of the active run. Takes effect within one
    /// item's wait; returns whether a run was active.
    pub fn cancel_run(&self) -> bool {
        match self.active.lock().unwrap().as_ref() {
            Some(token) => {
                info!("bulk run cancellation requested");
                token.cancel();
                true
            },
            None => false,
        }
    }

    /// Resolve codes to recipients and, depending on the configured start
    /// mode, either run immediately or hand the items back for an explicit
    /// trigger.
    pub async fn prepare_run(
        &self,
        directory: &dyn RecipientDirectory,
        template: &str,
        files: &[CodedFile],
    ) -> Result<PreparedRun> {
        let items = roster::prepare_items(directory, files)
            .await
            .map_err(|e| Error::message(format!("recipient lookup failed: {e}")))?;

        match self.start_mode {
            StartMode::OnPrepare => Ok(PreparedRun::Started(self.start_run(template, items).await?)),
            StartMode::Manual => Ok(PreparedRun::Pending(items)),
        }
    }

    /// Execute a bulk run to completion (or cancellation).
    pub async fn start_run(&self, template: &str, items: Vec<DispatchItem>) -> Result<RunSummary> {
        if self.lifecycle.state() != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        if items.is_empty() {
            return Err(Error::NoItems);
        }

        let cancel = {
            let mut active = self.active.lock().unwrap();
            if active.is_some() {
                return Err(Error::RunActive);
            }
            let token = CancellationToken::new();
            *active = Some(token.clone());
            token
        };
        let _guard = RunGuard(self);
        self.ledger.lock().unwrap().clear();

        let total = items.len();
        info!(total, "starting bulk run");
        let mut cancelled = false;

        for (index, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            // Store the payload first so the provider send can reference it.
            if let Some(file) = &item.file {
                let upload = tokio::select! {
                    _ = cancel.cancelled() => None,
                    res = tokio::time::timeout(
                        self.timing.upload_timeout,
                        self.files.store(&file.filename, &file.bytes),
                    ) => Some(res),
                };
                match upload {
                    None => {
                        self.record_failure(item, "cancelled");
                        cancelled = true;
                        break;
                    },
                    Some(Ok(Ok(()))) => {},
                    Some(Ok(Err(e))) => {
                        warn!(filename = %file.filename, error = %e, "upload failed");
                        self.record_failure(item, "upload failed");
                        continue;
                    },
                    Some(Err(_elapsed)) => {
                        warn!(filename = %file.filename, "upload timed out");
                        self.record_failure(item, "upload failed");
                        continue;
                    },
                }
            }

            let body = render_message(template, &item.code);
            let send = tokio::select! {
                _ = cancel.cancelled() => None,
                res = self.lifecycle.send_document(
                    &item.recipient,
                    &body,
                    item.file.as_ref(),
                    self.timing.send_timeout,
                ) => Some(res),
            };
            match send {
                None => {
                    self.record_failure(item, "cancelled");
                    cancelled = true;
                    break;
                },
                Some(Ok(())) => self.record_success(item),
                Some(Err(e)) => {
                    let detail = match &e {
                        LifecycleError::SendTimeout { .. } => "send timeout".to_string(),
                        LifecycleError::SendRejected { detail, .. } => detail.clone(),
                        other => other.to_string(),
                    };
                    self.record_failure(item, &detail);
                },
            }

            let completed = index + 1;
            self.lifecycle.notify(LifecycleEvent::status(
                self.lifecycle.state(),
                format!("progress {completed}/{total}"),
            ));

            if completed < total && !cancel.is_cancelled() {
                self.cooldown(&cancel).await;
            }
        }

        let summary = self.summarize(total, cancelled);
        info!(
            sent = summary.sent,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "bulk run finished"
        );
        self.lifecycle.notify(LifecycleEvent::status(
            self.lifecycle.state(),
            format!(
                "bulk run finished: {} sent, {} failed",
                summary.sent, summary.failed
            ),
        ));
        Ok(summary)
    }

    /// Inter-send pause, ticked so cancellation takes effect within a
    /// second and subscribers see a countdown. Never touches the
    /// connection state.
    async fn cooldown(&self, cancel: &CancellationToken) {
        let mut remaining = self.timing.cooldown;
        while !remaining.is_zero() {
            let secs = (remaining.as_secs_f64().ceil() as u64).max(1);
            self.lifecycle.notify(LifecycleEvent::status(
                self.lifecycle.state(),
                format!("next send in {secs}s"),
            ));
            let tick = remaining.min(Duration::from_secs(1));
            tokio::select! {
                _ = cancel.cancelled() => return,
                () = tokio::time::sleep(tick) => {},
            }
            remaining -= tick;
        }
    }

    fn record_success(&self, item: &DispatchItem) {
        info!(recipient = %item.recipient, code = %item.code, "item dispatched");
        self.push_result(item, DispatchOutcome::Sent);
        self.lifecycle.notify(LifecycleEvent::ItemDispatched {
            recipient: item.recipient.clone(),
        });
    }

    fn record_failure(&self, item: &DispatchItem, detail: &str) {
        warn!(recipient = %item.recipient, detail, "item failed");
        self.push_result(
            item,
            DispatchOutcome::Failed {
                detail: detail.to_string(),
            },
        );
        self.lifecycle.notify(LifecycleEvent::ItemFailed {
            recipient: item.recipient.clone(),
            detail: detail.to_string(),
        });
    }

    fn push_result(&self, item: &DispatchItem, outcome: DispatchOutcome) {
        self.ledger.lock().unwrap().push(DispatchResult {
            item: item.clone(),
            outcome,
            completed_at_ms: now_ms(),
        });
    }

    fn summarize(&self, total: usize, cancelled: bool) -> RunSummary {
        let ledger = self.ledger.lock().unwrap();
        let sent = ledger.iter().filter(|r| r.outcome.is_sent()).count();
        RunSummary {
            total,
            sent,
            failed: ledger.len() - sent,
            cancelled,
        }
    }
}

/// Clears the active-run slot however the run ends.
struct RunGuard<'a>(&'a BulkDispatcher);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.active.lock().unwrap().take();
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::time::Instant;

    use {
        async_trait::async_trait,
        tokio::sync::mpsc,
    };

    use despacho_provider::{
        FilePayload, MemoryDirectory, MemoryFileStore, MemorySessionStore, ProviderConnector,
        ProviderEvent, ProviderHandle, SessionStore,
    };

    use {super::*, despacho_lifecycle::ReconnectPolicy};

    #[derive(Default)]
    struct AutoAckInner {
        events: Mutex<Option<mpsc::Sender<ProviderEvent>>>,
        reject: Mutex<Vec<(String, String)>>,
        silent: Mutex<Vec<String>>,
        sent: Mutex<Vec<String>>,
    }

    /// Connector whose handle acknowledges every send immediately, unless
    /// the recipient is set to be rejected or to stay silent.
    #[derive(Clone, Default)]
    struct AutoAckConnector(Arc<AutoAckInner>);

    impl AutoAckConnector {
        fn reject(&self, recipient: &str, error: &str) {
            self.0
                .reject
                .lock()
                .unwrap()
                .push((recipient.to_string(), error.to_string()));
        }

        fn silence(&self, recipient: &str) {
            self.0.silent.lock().unwrap().push(recipient.to_string());
        }

        fn sent(&self) -> Vec<String> {
            self.0.sent.lock().unwrap().clone()
        }

        async fn emit(&self, event: ProviderEvent) {
            let tx = self
                .0
                .events
                .lock()
                .unwrap()
                .clone()
                .expect("no adapter connected");
            tx.send(event).await.unwrap();
        }
    }

    #[async_trait]
    impl ProviderConnector for AutoAckConnector {
        async fn connect(
            &self,
            events: mpsc::Sender<ProviderEvent>,
        ) -> anyhow::Result<Arc<dyn ProviderHandle>> {
            *self.0.events.lock().unwrap() = Some(events);
            Ok(Arc::new(AutoAckHandle(Arc::clone(&self.0))))
        }
    }

    struct AutoAckHandle(Arc<AutoAckInner>);

    #[async_trait]
    impl ProviderHandle for AutoAckHandle {
        async fn send_document(
            &self,
            recipient: &str,
            _body: &str,
            _attachment: Option<&FilePayload>,
        ) -> anyhow::Result<()> {
            self.0.sent.lock().unwrap().push(recipient.to_string());
            let rejection = self
                .0
                .reject
                .lock()
                .unwrap()
                .iter()
                .find(|(r, _)| r == recipient)
                .map(|(_, e)| e.clone());
            let silent = self.0.silent.lock().unwrap().iter().any(|r| r == recipient);
            let tx = self.0.events.lock().unwrap().clone().unwrap();

            if let Some(error) = rejection {
                tx.send(ProviderEvent::SendFailed {
                    recipient: recipient.to_string(),
                    error,
                })
                .await
                .unwrap();
            } else if !silent {
                tx.send(ProviderEvent::SendAck {
                    recipient: recipient.to_string(),
                })
                .await
                .unwrap();
            }
            Ok(())
        }

        async fn recipient_exists(&self, _recipient: &str) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn disconnect(&self) {}
    }

    fn fast_timing() -> DispatchTiming {
        DispatchTiming {
            cooldown: Duration::from_millis(40),
            upload_timeout: Duration::from_millis(200),
            send_timeout: Duration::from_millis(200),
        }
    }

    struct Fixture {
        dispatcher: Arc<BulkDispatcher>,
        lifecycle: Arc<LifecycleManager>,
        stub: AutoAckConnector,
        files: Arc<MemoryFileStore>,
        _events: mpsc::Receiver<LifecycleEvent>,
    }

    async fn connected_fixture(timing: DispatchTiming) -> Fixture {
        let stub = AutoAckConnector::default();
        let lifecycle = LifecycleManager::new(
            Arc::new(stub.clone()),
            Arc::new(MemorySessionStore::new()) as Arc<dyn SessionStore>,
            ReconnectPolicy::default(),
        );
        let (tx, rx) = mpsc::channel(256);
        lifecycle.connect("test", tx).await;
        stub.emit(ProviderEvent::ConnectionOpened).await;
        for _ in 0..200 {
            if lifecycle.state() == ConnectionState::Connected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(lifecycle.state(), ConnectionState::Connected);

        let files = Arc::new(MemoryFileStore::new());
        let dispatcher = Arc::new(
            BulkDispatcher::new(
                Arc::clone(&lifecycle),
                Arc::clone(&files) as Arc<dyn FileStore>,
                DispatchConfig::default(),
            )
            .with_timing(timing),
        );
        Fixture {
            dispatcher,
            lifecycle,
            stub,
            files,
            _events: rx,
        }
    }

    fn item_with_file(code: &str, recipient: &str) -> DispatchItem {
        DispatchItem {
            recipient: recipient.to_string(),
            display_name: "N/A".to_string(),
            code: code.to_string(),
            file: Some(FilePayload::document(format!("{code}.pdf"), vec![1, 2, 3])),
        }
    }

    #[tokio::test]
    async fn run_fails_fast_without_connection() {
        let stub = AutoAckConnector::default();
        let lifecycle = LifecycleManager::new(
            Arc::new(stub),
            Arc::new(MemorySessionStore::new()) as Arc<dyn SessionStore>,
            ReconnectPolicy::default(),
        );
        let dispatcher = BulkDispatcher::new(
            lifecycle,
            Arc::new(MemoryFileStore::new()),
            DispatchConfig::default(),
        );

        let items = vec![item_with_file("A1", "5511")];
        let err = dispatcher.start_run("Hello", items).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert!(dispatcher.results().is_empty());
    }

    #[tokio::test]
    async fn empty_run_is_rejected() {
        let fx = connected_fixture(fast_timing()).await;
        let err = fx.dispatcher.start_run("Hello", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::NoItems));
    }

    #[tokio::test]
    async fn upload_failure_does_not_skip_later_items() {
        let fx = connected_fixture(fast_timing()).await;
        fx.files.reject_filename("B2.pdf");

        let items = vec![
            item_with_file("A1", "r1"),
            item_with_file("B2", "r2"),
            item_with_file("C3", "r3"),
        ];
        let summary = fx.dispatcher.start_run("Oi {code}", items).await.unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.failed, 1);
        assert!(!summary.cancelled);

        // Exactly one result per item, list order preserved.
        let results = fx.dispatcher.results();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].outcome, DispatchOutcome::Sent);
        assert_eq!(
            results[1].outcome,
            DispatchOutcome::Failed {
                detail: "upload failed".into()
            }
        );
        assert_eq!(results[2].outcome, DispatchOutcome::Sent);

        // The failed upload never reached the provider.
        assert_eq!(fx.stub.sent(), vec!["r1", "r3"]);
    }

    #[tokio::test]
    async fn text_only_items_skip_the_upload() {
        let fx = connected_fixture(fast_timing()).await;
        let items = vec![
            DispatchItem::text_only("r1", "Ana", "A1"),
            item_with_file("B2", "r2"),
        ];

        let summary = fx.dispatcher.start_run("Oi {code}", items).await.unwrap();
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.failed, 0);

        // Only the item with a payload touched the file store.
        assert_eq!(fx.files.len(), 1);
        assert_eq!(fx.stub.sent(), vec!["r1", "r2"]);
    }

    #[tokio::test]
    async fn send_failures_carry_detail() {
        let fx = connected_fixture(fast_timing()).await;
        fx.stub.reject("r2", "recipient blocked");
        fx.stub.silence("r3");

        let items = vec![
            item_with_file("A1", "r1"),
            item_with_file("B2", "r2"),
            item_with_file("C3", "r3"),
        ];
        let summary = fx.dispatcher.start_run("Oi", items).await.unwrap();

        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed, 2);

        let results = fx.dispatcher.results();
        assert_eq!(
            results[1].outcome,
            DispatchOutcome::Failed {
                detail: "recipient blocked".into()
            }
        );
        assert_eq!(
            results[2].outcome,
            DispatchOutcome::Failed {
                detail: "send timeout".into()
            }
        );
    }

    #[tokio::test]
    async fn cooldown_paces_consecutive_sends() {
        let fx = connected_fixture(fast_timing()).await;
        let items = vec![
            item_with_file("A1", "r1"),
            item_with_file("B2", "r2"),
            item_with_file("C3", "r3"),
        ];

        let started = Instant::now();
        let summary = fx.dispatcher.start_run("Oi", items).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(summary.sent, 3);
        // Two cooldowns for three items.
        assert!(
            elapsed >= Duration::from_millis(80),
            "run finished too fast: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn no_cooldown_after_final_item() {
        let fx = connected_fixture(DispatchTiming {
            cooldown: Duration::from_secs(5),
            ..fast_timing()
        })
        .await;

        let started = Instant::now();
        let summary = fx
            .dispatcher
            .start_run("Oi", vec![item_with_file("A1", "r1")])
            .await
            .unwrap();
        assert_eq!(summary.sent, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn cancel_stops_within_one_item() {
        let fx = connected_fixture(DispatchTiming {
            cooldown: Duration::from_secs(30),
            ..fast_timing()
        })
        .await;

        let items = vec![
            item_with_file("A1", "r1"),
            item_with_file("B2", "r2"),
            item_with_file("C3", "r3"),
        ];
        let dispatcher = Arc::clone(&fx.dispatcher);
        let started = Instant::now();
        let task = tokio::spawn(async move { dispatcher.start_run("Oi", items).await });

        // Wait for the first item to complete, then cancel during cooldown.
        for _ in 0..200 {
            if !fx.dispatcher.results().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(fx.dispatcher.cancel_run());

        let summary = task.await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(summary.cancelled);
        assert_eq!(summary.sent, 1);

        // The recorded result is retained, no further sends were issued.
        assert_eq!(fx.dispatcher.results().len(), 1);
        assert_eq!(fx.stub.sent(), vec!["r1"]);
        assert!(!fx.dispatcher.is_running());
    }

    #[tokio::test]
    async fn concurrent_runs_are_rejected() {
        let fx = connected_fixture(DispatchTiming {
            cooldown: Duration::from_secs(30),
            ..fast_timing()
        })
        .await;

        let items = vec![item_with_file("A1", "r1"), item_with_file("B2", "r2")];
        let dispatcher = Arc::clone(&fx.dispatcher);
        let task = tokio::spawn(async move { dispatcher.start_run("Oi", items).await });

        for _ in 0..200 {
            if fx.dispatcher.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = fx
            .dispatcher
            .start_run("Oi", vec![item_with_file("C3", "r3")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RunActive));

        fx.dispatcher.cancel_run();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn ledger_resets_between_runs() {
        let fx = connected_fixture(fast_timing()).await;

        fx.dispatcher
            .start_run("Oi", vec![item_with_file("A1", "r1"), item_with_file("B2", "r2")])
            .await
            .unwrap();
        assert_eq!(fx.dispatcher.results().len(), 2);

        fx.dispatcher
            .start_run("Oi", vec![item_with_file("C3", "r3")])
            .await
            .unwrap();
        assert_eq!(fx.dispatcher.results().len(), 1);
        assert_eq!(fx.dispatcher.results()[0].item.code, "C3");
    }

    #[tokio::test]
    async fn prepare_run_manual_returns_pending_items() {
        let fx = connected_fixture(fast_timing()).await;
        let dir = MemoryDirectory::new();
        dir.insert("A1", "r1", "Ana");

        let files = vec![CodedFile::new(
            "A1",
            FilePayload::document("A1.pdf", vec![1]),
        )];
        let prepared = fx
            .dispatcher
            .prepare_run(&dir, "Oi {code}", &files)
            .await
            .unwrap();

        match prepared {
            PreparedRun::Pending(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].recipient, "r1");
            },
            PreparedRun::Started(_) => panic!("manual mode must not auto-start"),
        }
        assert!(fx.stub.sent().is_empty());
    }

    #[tokio::test]
    async fn prepare_run_auto_starts_on_prepare() {
        let fx = connected_fixture(fast_timing()).await;
        let dispatcher = BulkDispatcher::new(
            Arc::clone(&fx.lifecycle),
            Arc::clone(&fx.files) as Arc<dyn FileStore>,
            DispatchConfig {
                start_mode: StartMode::OnPrepare,
                ..Default::default()
            },
        )
        .with_timing(fast_timing());

        let dir = MemoryDirectory::new();
        dir.insert("A1", "r1", "Ana");
        let files = vec![CodedFile::new(
            "A1",
            FilePayload::document("A1.pdf", vec![1]),
        )];

        let prepared = dispatcher.prepare_run(&dir, "Oi", &files).await.unwrap();
        match prepared {
            PreparedRun::Started(summary) => {
                assert_eq!(summary.sent, 1);
                assert_eq!(summary.failed, 0);
            },
            PreparedRun::Pending(_) => panic!("on_prepare mode must auto-start"),
        }
        assert_eq!(fx.stub.sent(), vec!["r1"]);
    }
}
