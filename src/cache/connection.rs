//! Remote connection health and bounded reconnection
//!
//! ```text
//! Unconfigured                      (no endpoint, permanent)
//! Connecting --ok--> Ready --error--> Degraded --retry--> Connecting
//!                                        |
//!                                        +-- attempts exhausted: stays Degraded
//! ```
//!
//! Retries use a fixed delay and a fixed cap. A successful handshake resets
//! the attempt counter. All transitions happen under one mutex, and a failure
//! report only counts when it names the generation of the live connection, so
//! concurrent failures of one connection schedule a single retry sequence.

use crate::cache::remote::{RemoteConnector, RemoteTier};
use crate::cache::CacheStats;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Health of the remote cache tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No remote endpoint configured
    Unconfigured,
    /// Handshake in progress
    Connecting,
    /// Remote tier serving requests
    Ready,
    /// Remote tier unreachable, memory tier only
    Degraded,
}

/// Fixed-interval, fixed-cap retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

#[derive(Debug)]
enum LinkEvent {
    Lost,
    Shutdown,
}

struct LinkState {
    state: ConnectionState,
    handle: Option<Arc<dyn RemoteTier>>,
    generation: u64,
    attempts: u32,
    exhausted: bool,
    shut_down: bool,
}

/// Owns the remote handle and drives the connection state machine
pub(crate) struct RemoteLink {
    connector: Arc<dyn RemoteConnector>,
    policy: ReconnectPolicy,
    inner: Mutex<LinkState>,
    events: mpsc::UnboundedSender<LinkEvent>,
    stats: Arc<CacheStats>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteLink {
    /// Create the link and start its reconnection supervisor
    ///
    /// No connection is attempted until [`RemoteLink::establish`] is called.
    pub(crate) fn start(
        connector: Arc<dyn RemoteConnector>,
        policy: ReconnectPolicy,
        stats: Arc<CacheStats>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Arc::new(RemoteLink {
            connector,
            policy,
            inner: Mutex::new(LinkState {
                state: ConnectionState::Connecting,
                handle: None,
                generation: 0,
                attempts: 0,
                exhausted: false,
                shut_down: false,
            }),
            events: tx,
            stats,
            supervisor: Mutex::new(None),
        });

        let task = tokio::spawn(Self::supervise(Arc::downgrade(&link), rx));
        *lock(&link.supervisor) = Some(task);
        link
    }

    pub(crate) fn state(&self) -> ConnectionState {
        lock(&self.inner).state
    }

    pub(crate) fn attempts(&self) -> u32 {
        lock(&self.inner).attempts
    }

    pub(crate) fn retries_exhausted(&self) -> bool {
        lock(&self.inner).exhausted
    }

    pub(crate) fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    /// The live connection and its generation, only while `Ready`
    pub(crate) fn active(&self) -> Option<(u64, Arc<dyn RemoteTier>)> {
        let inner = lock(&self.inner);
        match (&inner.state, &inner.handle) {
            (ConnectionState::Ready, Some(handle)) => Some((inner.generation, Arc::clone(handle))),
            _ => None,
        }
    }

    /// Try one handshake; `true` when the link is `Ready` afterwards
    pub(crate) async fn establish(&self) -> bool {
        {
            let mut inner = lock(&self.inner);
            if inner.shut_down {
                return false;
            }
            inner.state = ConnectionState::Connecting;
        }

        match self.connector.connect().await {
            Ok(handle) => {
                let accepted = {
                    let mut inner = lock(&self.inner);
                    if inner.shut_down {
                        false
                    } else {
                        inner.generation += 1;
                        inner.handle = Some(Arc::clone(&handle));
                        inner.state = ConnectionState::Ready;
                        inner.attempts = 0;
                        inner.exhausted = false;
                        true
                    }
                };

                if !accepted {
                    let _ = handle.close().await;
                    return false;
                }
                info!("Remote cache ready at {}", self.connector.endpoint());
                true
            }
            Err(e) => {
                let mut inner = lock(&self.inner);
                if !inner.shut_down {
                    inner.state = ConnectionState::Degraded;
                }
                warn!(
                    "Failed to connect to remote cache at {}: {}. Using memory cache",
                    self.connector.endpoint(),
                    e
                );
                false
            }
        }
    }

    /// Start the retry sequence after a failed initial handshake
    pub(crate) fn connection_lost(&self) {
        let _ = self.events.send(LinkEvent::Lost);
    }

    /// Record an I/O failure of the connection with `generation`
    ///
    /// Reports about an older connection, or arriving after the link already
    /// left `Ready`, are ignored.
    pub(crate) fn report_failure(&self, generation: u64, operation: &str, error: &str) {
        let mut inner = lock(&self.inner);
        if inner.state != ConnectionState::Ready || inner.generation != generation {
            return;
        }
        inner.state = ConnectionState::Degraded;
        inner.handle = None;
        drop(inner);

        self.stats.record_remote_error();
        warn!(
            "Remote cache {} failed: {}. Falling back to memory cache",
            operation, error
        );
        let _ = self.events.send(LinkEvent::Lost);
    }

    /// Close the connection and stop retrying; safe to call repeatedly
    pub(crate) async fn shutdown(&self) {
        let handle = {
            let mut inner = lock(&self.inner);
            if inner.shut_down {
                return;
            }
            inner.shut_down = true;
            inner.state = ConnectionState::Degraded;
            inner.handle.take()
        };

        let _ = self.events.send(LinkEvent::Shutdown);

        if let Some(handle) = handle {
            match handle.close().await {
                Ok(()) => info!("Disconnected from remote cache"),
                Err(e) => warn!("Error while disconnecting from remote cache: {}", e),
            }
        }
    }

    /// Reconnection supervisor
    ///
    /// Each `Lost` event starts one retry sequence: up to `max_attempts`
    /// handshakes, each after `delay`, stopping at the first success.
    async fn supervise(link: Weak<RemoteLink>, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::Lost => loop {
                    let Some(strong) = link.upgrade() else {
                        return;
                    };
                    let (attempt, delay) = {
                        let mut inner = lock(&strong.inner);
                        if inner.shut_down {
                            return;
                        }
                        if inner.attempts >= strong.policy.max_attempts {
                            inner.exhausted = true;
                            warn!(
                                "Maximum remote cache reconnection attempts ({}) reached. Continuing with memory cache only",
                                strong.policy.max_attempts
                            );
                            break;
                        }
                        inner.attempts += 1;
                        (inner.attempts, strong.policy.delay)
                    };
                    strong.stats.record_reconnect_attempt();
                    info!(
                        "Remote cache reconnection attempt {}/{} in {:?}",
                        attempt, strong.policy.max_attempts, delay
                    );
                    drop(strong);

                    tokio::time::sleep(delay).await;

                    let Some(strong) = link.upgrade() else {
                        return;
                    };
                    if strong.establish().await {
                        break;
                    }
                },
                LinkEvent::Shutdown => return,
            }
        }
    }
}

impl Drop for RemoteLink {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.supervisor).take() {
            task.abort();
        }
    }
}

/// Lock a std mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
