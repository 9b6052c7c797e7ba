//! Server core: shared state, the accept loop and broadcast.

use crate::config::Config;
use crate::connection::{ConnectionHandle, DisconnectReason};
use crate::metrics;
use crate::session;
use dashmap::DashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tidings_core::{
    CategoryError, CategorySet, ConnectionId, NewsItem, NewsStore, RegistryStats,
    SubscriptionRegistry,
};
use tidings_protocol::{codec, Frame, ProtocolError};
use tidings_transport::{TcpTransport, Transport, TransportError};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The category configuration is unusable.
    #[error("Invalid configuration: {0}")]
    Config(#[from] CategoryError),

    /// The listening socket could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: TransportError,
    },

    /// A blocking store task panicked or was cancelled.
    #[error("Store task failed: {0}")]
    StoreTask(#[from] JoinError),
}

/// Outcome of fanning one item out to its category's subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Live subscribers the item was addressed to.
    pub recipients: usize,
    /// Writes that completed.
    pub delivered: usize,
    /// Writes that failed; those connections have been torn down.
    pub failed: usize,
}

/// Point-in-time server counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStats {
    pub live_connections: usize,
    pub total_connections: u64,
    pub news_published: u64,
    pub stored_news: usize,
    pub registry: RegistryStats,
}

/// State shared by the accept loop and every connection worker.
pub(crate) struct ServerState {
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) store: Arc<NewsStore>,
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    total_connections: AtomicU64,
    news_published: AtomicU64,
}

impl ServerState {
    pub(crate) fn new(categories: CategorySet, store: NewsStore) -> Self {
        Self {
            registry: SubscriptionRegistry::new(categories),
            store: Arc::new(store),
            connections: DashMap::new(),
            total_connections: AtomicU64::new(0),
            news_published: AtomicU64::new(0),
        }
    }

    /// Add a connection to the live table.
    pub(crate) fn register(&self, handle: ConnectionHandle) -> Arc<ConnectionHandle> {
        let handle = Arc::new(handle);
        self.connections.insert(handle.id(), Arc::clone(&handle));
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        handle
    }

    /// Tear a connection down. Only the first call for a connection has any
    /// effect; later calls return `false`.
    pub(crate) async fn teardown(&self, handle: &ConnectionHandle, reason: DisconnectReason) -> bool {
        if !handle.begin_teardown() {
            return false;
        }

        let released = self.registry.remove_connection(handle.id());
        self.connections.remove(&handle.id());

        if let Err(e) = handle.sink().close().await {
            debug!(connection = %handle.id(), error = %e, "Error while closing connection");
        }
        handle.mark_closed();

        info!(
            connection = %handle.id(),
            peer = %handle.peer_addr(),
            reason = %reason,
            subscriptions = released.len(),
            "Client disconnected"
        );
        true
    }

    /// Tear down every live connection.
    pub(crate) async fn close_all(&self, reason: DisconnectReason) {
        let handles: Vec<Arc<ConnectionHandle>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for handle in handles {
            self.teardown(&handle, reason.clone()).await;
        }
    }

    /// Run a store operation on the blocking pool.
    pub(crate) async fn with_store<F, T>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&NewsStore) -> T + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || f(&store)).await?)
    }

    pub(crate) fn record_published(&self) {
        self.news_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Deliver `item` to every live subscriber of its category.
    ///
    /// The update is encoded once. A failed write never stops delivery to
    /// the remaining subscribers; failed connections are torn down after
    /// the pass.
    pub(crate) async fn broadcast(&self, item: &NewsItem) -> Result<BroadcastReport, ProtocolError> {
        let subscribers = self.registry.subscribers_of(&item.category);
        let targets: Vec<Arc<ConnectionHandle>> = subscribers
            .iter()
            .filter_map(|id| self.connections.get(id).map(|entry| Arc::clone(entry.value())))
            .filter(|handle| !handle.is_closing())
            .collect();

        let mut report = BroadcastReport {
            recipients: targets.len(),
            ..BroadcastReport::default()
        };
        if targets.is_empty() {
            debug!(category = %item.category, id = item.id, "No subscribers for news item");
            return Ok(report);
        }

        let data = codec::encode(&Frame::news_update(item))?;
        let mut failed = Vec::new();

        for handle in targets {
            match handle.sink().send_raw(data.clone()).await {
                Ok(()) => {
                    report.delivered += 1;
                    metrics::record_frame("outbound", "news_update");
                }
                Err(e) => {
                    warn!(
                        connection = %handle.id(),
                        category = %item.category,
                        error = %e,
                        "Failed to deliver news update"
                    );
                    failed.push(handle);
                }
            }
        }

        report.failed = failed.len();
        for handle in failed {
            self.teardown(&handle, DisconnectReason::DeliveryFailed).await;
        }

        Ok(report)
    }

    pub(crate) fn stats(&self) -> ServerStats {
        ServerStats {
            live_connections: self.connections.len(),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            news_published: self.news_published.load(Ordering::Relaxed),
            stored_news: self.store.count(),
            registry: self.registry.stats(),
        }
    }
}

/// A bound, not yet running, news server.
pub struct NewsServer {
    state: Arc<ServerState>,
    transport: TcpTransport,
    local_addr: SocketAddr,
}

impl NewsServer {
    /// Open the history store and bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the category set is invalid or binding fails.
    pub async fn bind(config: Config) -> Result<Self, ServerError> {
        let categories = config.category_set()?;

        let store = if config.storage.persist {
            NewsStore::open(config.storage.path.clone(), config.storage.max_items)
        } else {
            NewsStore::in_memory(config.storage.max_items)
        };
        metrics::set_stored_news(store.count());

        let addr = config.bind_addr();
        let transport = TcpTransport::bind(addr.as_str(), config.tcp_config())
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = transport.local_addr().ok_or_else(|| ServerError::Bind {
            addr,
            source: TransportError::ConnectionClosed,
        })?;

        info!(
            addr = %local_addr,
            categories = categories.len(),
            stored = store.count(),
            max_items = store.max_items(),
            history = ?store.path(),
            "News server bound"
        );

        Ok(Self {
            state: Arc::new(ServerState::new(categories, store)),
            transport,
            local_addr,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start accepting connections in the background.
    ///
    /// Dropping the returned handle without calling
    /// [`ServerHandle::shutdown`] also stops the server.
    #[must_use]
    pub fn start(self) -> ServerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::clone(&self.state);
        let accept_task = tokio::spawn(accept_loop(state, self.transport, shutdown_rx));

        ServerHandle {
            state: self.state,
            local_addr: self.local_addr,
            shutdown_tx,
            accept_task,
        }
    }

    /// Serve until `signal` completes, then shut down.
    pub async fn run_until<F>(self, signal: F)
    where
        F: Future<Output = ()>,
    {
        let handle = self.start();
        signal.await;
        info!("Shutdown requested");
        handle.shutdown().await;
    }
}

/// Control handle for a running server.
pub struct ServerHandle {
    state: Arc<ServerState>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl ServerHandle {
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn stats(&self) -> ServerStats {
        self.state.stats()
    }

    /// Stop accepting, close every live connection and wait for the
    /// connection workers to finish.
    pub async fn shutdown(self) {
        self.shutdown_tx.send_replace(true);
        if let Err(e) = self.accept_task.await {
            error!(error = %e, "Accept loop failed");
        }
        info!(stats = ?self.state.stats(), "Server stopped");
    }
}

async fn accept_loop(
    state: Arc<ServerState>,
    transport: TcpTransport,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();

    info!(transport = transport.name(), "Accepting connections");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                log_session_exit(joined);
            }

            accepted = transport.accept() => match accepted {
                Ok(accepted) => {
                    sessions.spawn(session::run(Arc::clone(&state), accepted, shutdown.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    metrics::record_error("accept");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }

    info!(live = state.connections.len(), "Accept loop stopped, closing connections");
    state.close_all(DisconnectReason::Shutdown).await;

    while let Some(joined) = sessions.join_next().await {
        log_session_exit(joined);
    }
}

fn log_session_exit(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Connection worker panicked");
            metrics::record_error("session_panic");
        }
    }
}
