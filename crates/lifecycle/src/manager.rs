//! Connection lifecycle manager: state machine, bounded reconnection,
//! pairing-code broadcast, and the gated send path.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    serde::{Deserialize, Serialize},
    tokio::{
        sync::{RwLock, mpsc},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use despacho_provider::{
    CloseClass, FilePayload, ProviderConnector, ProviderEvent, ProviderHandle, SessionStore,
};

use crate::{
    error::{Error, Result},
    event::LifecycleEvent,
    pending::{PendingSends, SendOutcome},
    registry::SubscriberRegistry,
    state::ConnectionState,
};

/// Capacity of the provider event channel handed to each new adapter.
const EVENT_BUFFER: usize = 64;

/// Reconnection behavior after unexpected closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Automatic reconnect budget for transient closes.
    pub max_reconnect_attempts: u32,
    /// Delay before a transient-close reconnect.
    pub retry_delay_ms: u64,
    /// Delay before the single conflict-close reconnect.
    pub conflict_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            retry_delay_ms: 5_000,
            conflict_delay_ms: 3_000,
        }
    }
}

impl ReconnectPolicy {
    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    fn conflict_delay(&self) -> Duration {
        Duration::from_millis(self.conflict_delay_ms)
    }
}

/// Mutable link state, always taken together under one lock.
struct LinkState {
    state: ConnectionState,
    pairing: Option<String>,
    attempts: u32,
}

/// Owns the provider connection and its state machine.
///
/// All state transitions happen inside this type: either in a control
/// operation (`connect`, `disconnect`, `force_reconnect`) or in the event
/// pump consuming the adapter's event stream. Everyone else observes via
/// broadcast events or the read-only accessors.
pub struct LifecycleManager {
    connector: Arc<dyn ProviderConnector>,
    sessions: Arc<dyn SessionStore>,
    policy: ReconnectPolicy,
    adapter: RwLock<Option<Arc<dyn ProviderHandle>>>,
    link: Mutex<LinkState>,
    subscribers: Mutex<SubscriberRegistry>,
    pending: PendingSends,
    /// Single slot for the scheduled reconnect; always aborted before a
    /// replacement is stored so attempts never overlap.
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    /// Event pump for the current adapter, aborted on teardown.
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleManager {
    pub fn new(
        connector: Arc<dyn ProviderConnector>,
        sessions: Arc<dyn SessionStore>,
        policy: ReconnectPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            connector,
            sessions,
            policy,
            adapter: RwLock::new(None),
            link: Mutex::new(LinkState {
                state: ConnectionState::Idle,
                pairing: None,
                attempts: 0,
            }),
            subscribers: Mutex::new(SubscriberRegistry::new()),
            pending: PendingSends::new(),
            reconnect_timer: Mutex::new(None),
            pump: Mutex::new(None),
        })
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.link.lock().unwrap().state
    }

    pub fn pairing_code(&self) -> Option<String> {
        self.link.lock().unwrap().pairing.clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.link.lock().unwrap().attempts
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    // ── Subscribers ─────────────────────────────────────────────────────────

    /// Register an observer. While a pairing code is pending the new
    /// subscriber receives a synchronous replay of it.
    pub fn subscribe(&self, id: &str, sink: mpsc::Sender<LifecycleEvent>) {
        let pairing = {
            let link = self.link.lock().unwrap();
            if link.state == ConnectionState::AwaitingPairing {
                link.pairing.clone()
            } else {
                None
            }
        };
        let mut subs = self.subscribers.lock().unwrap();
        subs.register(id, sink);
        if let Some(code) = pairing {
            subs.deliver(id, LifecycleEvent::PairingCode { code });
        }
    }

    pub fn unsubscribe(&self, id: &str) {
        self.subscribers.lock().unwrap().unregister(id);
    }

    /// Broadcast an event to every subscriber. Used by the dispatch
    /// orchestrator for per-item progress.
    pub fn notify(&self, event: LifecycleEvent) {
        self.broadcast(event);
    }

    fn broadcast(&self, event: LifecycleEvent) {
        self.subscribers.lock().unwrap().broadcast(&event);
    }

    // ── Control operations ──────────────────────────────────────────────────

    /// Connect on behalf of a subscriber.
    ///
    /// Idempotent: when a connection is already underway or established the
    /// requester is only registered (with a pairing-code replay if one is
    /// current) and no new adapter is opened. Adapter construction failures
    /// are reported to the requesting sink alone; the machine is left
    /// `Disconnected`.
    pub async fn connect(self: &Arc<Self>, subscriber_id: &str, sink: mpsc::Sender<LifecycleEvent>) {
        let (state, pairing) = {
            let link = self.link.lock().unwrap();
            (link.state, link.pairing.clone())
        };
        {
            let mut subs = self.subscribers.lock().unwrap();
            subs.register(subscriber_id, sink);
            if let Some(code) = pairing {
                subs.deliver(subscriber_id, LifecycleEvent::PairingCode { code });
            }
        }

        if state.is_active() {
            debug!(subscriber = subscriber_id, state = %state, "connect requested while already active");
            return;
        }

        info!(subscriber = subscriber_id, "opening provider connection");
        self.set_state(ConnectionState::Connecting);
        self.broadcast(LifecycleEvent::status(
            ConnectionState::Connecting,
            "connecting to provider",
        ));

        if let Err(e) = self.open_adapter().await {
            warn!(error = %e, "adapter construction failed");
            self.set_state(ConnectionState::Disconnected);
            self.subscribers.lock().unwrap().deliver(
                subscriber_id,
                LifecycleEvent::status(
                    ConnectionState::Disconnected,
                    format!("connection error: {e}"),
                ),
            );
        }
    }

    /// Tear everything down and return to `Idle`.
    pub async fn disconnect(&self) {
        self.cancel_reconnect();
        self.abort_pump();
        if let Some(handle) = self.adapter.write().await.take() {
            handle.disconnect().await;
        }
        {
            let mut link = self.link.lock().unwrap();
            link.state = ConnectionState::Idle;
            link.pairing = None;
        }
        self.pending.fail_all("disconnected");
        info!("provider disconnected");
        self.broadcast(LifecycleEvent::status(
            ConnectionState::Idle,
            "provider disconnected",
        ));
    }

    /// Reset the reconnect budget, purge credentials, and restart the
    /// connection from scratch. Returns once the new handshake is
    /// initiated, not once connected.
    pub async fn force_reconnect(self: &Arc<Self>) -> anyhow::Result<()> {
        info!("forcing reconnect");
        self.cancel_reconnect();
        {
            let mut link = self.link.lock().unwrap();
            link.attempts = 0;
            link.pairing = None;
            link.state = ConnectionState::Connecting;
        }
        self.pending.fail_all("reconnecting");
        self.broadcast(LifecycleEvent::status(
            ConnectionState::Connecting,
            "forcing reconnect",
        ));

        if let Err(e) = self.sessions.purge().await {
            warn!(error = %e, "session purge failed, continuing");
        }

        if let Err(e) = self.open_adapter().await {
            warn!(error = %e, "forced reconnect failed");
            self.set_state(ConnectionState::Disconnected);
            self.broadcast(LifecycleEvent::status(
                ConnectionState::Disconnected,
                format!("reconnect failed: {e}"),
            ));
            return Err(e);
        }
        Ok(())
    }

    /// Best-effort credential purge.
    pub async fn purge_sessions(&self) -> anyhow::Result<usize> {
        self.sessions.purge().await
    }

    // ── Send path ───────────────────────────────────────────────────────────

    /// Send a document and wait for the provider's acknowledgment, bounded
    /// by `ack_timeout`. Requires `Connected`.
    pub async fn send_document(
        &self,
        recipient: &str,
        body: &str,
        attachment: Option<&FilePayload>,
        ack_timeout: Duration,
    ) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        let handle = self.adapter.read().await.clone().ok_or(Error::NotConnected)?;

        // Lenient reachability pre-check: log-only, never blocks the send.
        match handle.recipient_exists(recipient).await {
            Ok(true) => {},
            Ok(false) => warn!(recipient, "recipient not verified on provider, sending anyway"),
            Err(e) => warn!(recipient, error = %e, "reachability check failed, sending anyway"),
        }

        let rx = self.pending.register(recipient)?;
        let mut guard = PendingGuard {
            pending: &self.pending,
            recipient,
            armed: true,
        };

        if let Err(e) = handle.send_document(recipient, body, attachment).await {
            return Err(Error::send_rejected(recipient, e.to_string()));
        }

        match tokio::time::timeout(ack_timeout, rx).await {
            Ok(Ok(outcome)) => {
                // Resolution already removed the entry; disarm so the guard
                // cannot clobber a follow-up send to the same recipient.
                guard.disarm();
                match outcome {
                    SendOutcome::Acked => {
                        debug!(recipient, "send acknowledged");
                        Ok(())
                    },
                    SendOutcome::Rejected(detail) => Err(Error::send_rejected(recipient, detail)),
                }
            },
            Ok(Err(_)) => Err(Error::send_rejected(recipient, "acknowledgment channel closed")),
            Err(_) => Err(Error::SendTimeout {
                recipient: recipient.to_string(),
            }),
        }
    }

    // ── Adapter plumbing ────────────────────────────────────────────────────

    /// Tear down the current adapter (if any) and open a fresh one.
    async fn open_adapter(self: &Arc<Self>) -> anyhow::Result<()> {
        let old = self.adapter.write().await.take();
        if let Some(handle) = old {
            handle.disconnect().await;
        }
        self.abort_pump();

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let handle = self.connector.connect(tx).await?;
        *self.adapter.write().await = Some(handle);
        self.spawn_pump(rx);
        Ok(())
    }

    fn spawn_pump(self: &Arc<Self>, mut rx: mpsc::Receiver<ProviderEvent>) {
        let mgr = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                mgr.handle_event(event).await;
            }
            debug!("provider event stream ended");
        });
        if let Some(old) = self.pump.lock().unwrap().replace(handle) {
            old.abort();
        }
    }

    fn abort_pump(&self) {
        if let Some(handle) = self.pump.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn cancel_reconnect(&self) {
        if let Some(handle) = self.reconnect_timer.lock().unwrap().take() {
            handle.abort();
            debug!("pending reconnect cancelled");
        }
    }

    /// Schedule a reconnect, cancelling any previously scheduled one first.
    fn schedule_reconnect(self: &Arc<Self>, delay: Duration) {
        debug!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        let mgr = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = mgr.open_adapter().await {
                warn!(error = %e, "scheduled reconnect failed");
                mgr.set_state(ConnectionState::Disconnected);
                mgr.broadcast(LifecycleEvent::status(
                    ConnectionState::Disconnected,
                    format!("reconnect failed: {e}"),
                ));
            }
        });
        if let Some(old) = self.reconnect_timer.lock().unwrap().replace(handle) {
            old.abort();
            debug!("superseded previously scheduled reconnect");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.link.lock().unwrap().state = state;
    }

    // ── Event handling ──────────────────────────────────────────────────────

    async fn handle_event(self: &Arc<Self>, event: ProviderEvent) {
        match event {
            ProviderEvent::PairingCode { code } => self.handle_pairing(code),
            ProviderEvent::ConnectionOpened => self.handle_opened(),
            ProviderEvent::ConnectionClosed {
                reason,
                status_code,
            } => self.handle_closed(reason, status_code).await,
            ProviderEvent::SendAck { recipient } => {
                self.pending.resolve(&recipient, SendOutcome::Acked);
            },
            ProviderEvent::SendFailed { recipient, error } => {
                self.pending.resolve(&recipient, SendOutcome::Rejected(error));
            },
        }
    }

    fn handle_pairing(&self, code: String) {
        let fresh = {
            let mut link = self.link.lock().unwrap();
            if link.pairing.as_deref() == Some(code.as_str()) {
                // Same code re-emitted; already broadcast.
                false
            } else {
                link.pairing = Some(code.clone());
                if matches!(
                    link.state,
                    ConnectionState::Connecting | ConnectionState::Reconnecting
                ) {
                    link.state = ConnectionState::AwaitingPairing;
                }
                true
            }
        };
        if fresh {
            info!("pairing code received");
            self.broadcast(LifecycleEvent::status(
                self.state(),
                "scan the pairing code to authorize this session",
            ));
            self.broadcast(LifecycleEvent::PairingCode { code });
        } else {
            debug!("duplicate pairing code ignored");
        }
    }

    fn handle_opened(&self) {
        {
            let mut link = self.link.lock().unwrap();
            link.state = ConnectionState::Connected;
            link.pairing = None;
            link.attempts = 0;
        }
        self.cancel_reconnect();
        info!("provider connected");
        self.broadcast(LifecycleEvent::status(
            ConnectionState::Connected,
            "provider connected",
        ));
    }

    async fn handle_closed(self: &Arc<Self>, reason: Option<String>, status_code: Option<u16>) {
        let class = CloseClass::classify(reason.as_deref(), status_code);
        warn!(?reason, ?status_code, ?class, "provider connection closed");
        self.pending.fail_all("connection closed");
        {
            self.link.lock().unwrap().pairing = None;
        }

        match class {
            CloseClass::LoggedOut => {
                self.cancel_reconnect();
                self.set_state(ConnectionState::Disconnected);
                self.broadcast(LifecycleEvent::status(
                    ConnectionState::Disconnected,
                    "session expired, a new pairing is required",
                ));
            },
            CloseClass::Conflict => {
                self.set_state(ConnectionState::Disconnected);
                self.broadcast(LifecycleEvent::status(
                    ConnectionState::Disconnected,
                    "session conflict, purging credentials before retry",
                ));
                if let Err(e) = self.sessions.purge().await {
                    warn!(error = %e, "session purge failed");
                }
                // One retry after the conflict delay, counter untouched.
                self.schedule_reconnect(self.policy.conflict_delay());
            },
            CloseClass::Transient => {
                let max = self.policy.max_reconnect_attempts;
                let attempt = {
                    let mut link = self.link.lock().unwrap();
                    if link.attempts < max {
                        link.attempts += 1;
                        Some(link.attempts)
                    } else {
                        link.state = ConnectionState::Failed;
                        None
                    }
                };
                match attempt {
                    Some(n) => {
                        self.set_state(ConnectionState::Reconnecting);
                        self.broadcast(LifecycleEvent::status(
                            ConnectionState::Reconnecting,
                            format!("reconnect attempt {n}/{max}"),
                        ));
                        self.schedule_reconnect(self.policy.retry_delay());
                    },
                    None => {
                        warn!(max, "reconnect attempts exhausted");
                        self.broadcast(LifecycleEvent::status(
                            ConnectionState::Failed,
                            "reconnect attempts exhausted, force a reconnect to retry",
                        ));
                    },
                }
            },
        }
    }
}

/// Removes the pending-send entry when the wait is abandoned (timeout or
/// cancelled future). Disarmed once the ack resolves, so the drop never
/// touches an entry a subsequent send may have registered for the same
/// recipient.
struct PendingGuard<'a> {
    pending: &'a PendingSends,
    recipient: &'a str,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pending.remove(self.recipient);
        }
    }
}
