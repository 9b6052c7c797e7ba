//! Per-connection worker: reads frames and dispatches them one at a time.

use crate::connection::{ConnectionHandle, DisconnectReason};
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::server::{BroadcastReport, ServerError, ServerState};
use std::sync::Arc;
use std::time::Instant;
use tidings_core::{normalize_category, RegistryError};
use tidings_protocol::Frame;
use tidings_transport::{Accepted, FrameSource, TransportError};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// What the worker does after a frame has been handled.
enum Flow {
    Continue,
    Close,
}

/// Drive one connection from accept to teardown.
pub(crate) async fn run(
    state: Arc<ServerState>,
    accepted: Accepted,
    mut shutdown: watch::Receiver<bool>,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let Accepted {
        id,
        peer_addr,
        mut source,
        sink,
    } = accepted;
    let handle = state.register(ConnectionHandle::new(id, peer_addr, sink));

    if *shutdown.borrow() || !handle.activate() {
        state.teardown(&handle, DisconnectReason::Shutdown).await;
        return;
    }

    info!(connection = %id, peer = %peer_addr, "Client connected");

    let welcome = Frame::success(format!(
        "Connected to news server. Available categories: {}",
        state.registry.list_categories().join(", ")
    ));

    let reason = match reply(&handle, welcome).await {
        Ok(Flow::Continue) => serve(&state, &handle, source.as_mut(), &mut shutdown).await,
        Ok(Flow::Close) => Some(DisconnectReason::ClientRequest),
        Err(e) => Some(DisconnectReason::Transport(e.to_string())),
    };

    // `None` means another task already tore the connection down.
    if let Some(reason) = reason {
        state.teardown(&handle, reason).await;
    }
}

async fn serve(
    state: &ServerState,
    handle: &ConnectionHandle,
    source: &mut dyn FrameSource,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<DisconnectReason> {
    loop {
        tokio::select! {
            received = source.recv() => {
                let frames = match received {
                    Ok(Some(frames)) => frames,
                    Ok(None) => return Some(DisconnectReason::PeerClosed),
                    Err(e) => return Some(DisconnectReason::Transport(e.to_string())),
                };

                for frame in frames {
                    metrics::record_frame("inbound", frame.frame_type().as_str());
                    match dispatch(state, handle, frame).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Close) => return Some(DisconnectReason::ClientRequest),
                        Err(e) => return Some(DisconnectReason::Transport(e.to_string())),
                    }
                }
            }

            () = handle.closed() => return None,

            _ = shutdown.changed() => return Some(DisconnectReason::Shutdown),
        }
    }
}

async fn reply(handle: &ConnectionHandle, frame: Frame) -> Result<Flow, TransportError> {
    let frame_type = frame.frame_type();
    handle.send(&frame).await?;
    metrics::record_frame("outbound", frame_type.as_str());
    Ok(Flow::Continue)
}

async fn reply_error(handle: &ConnectionHandle, message: impl Into<String>) -> Result<Flow, TransportError> {
    reply(handle, Frame::error(message)).await
}

/// Handle one inbound frame.
async fn dispatch(
    state: &ServerState,
    handle: &ConnectionHandle,
    frame: Frame,
) -> Result<Flow, TransportError> {
    let id = handle.id();

    match frame {
        Frame::Subscribe { category } => match state.registry.subscribe(id, &category) {
            Ok(name) => {
                metrics::record_subscription();
                reply(handle, Frame::success(format!("Subscribed to '{name}'"))).await
            }
            Err(e) => reply_error(handle, e.to_string()).await,
        },

        Frame::Unsubscribe { category } => match state.registry.unsubscribe(id, &category) {
            Ok(name) => reply(handle, Frame::success(format!("Unsubscribed from '{name}'"))).await,
            Err(e) => reply_error(handle, e.to_string()).await,
        },

        Frame::ListCategories {} => {
            reply(handle, Frame::categories_list(state.registry.list_categories())).await?;

            let mut subscribed: Vec<String> = state.registry.categories_of(id).into_iter().collect();
            if subscribed.is_empty() {
                return Ok(Flow::Continue);
            }
            subscribed.sort();
            reply(
                handle,
                Frame::success(format!("Your subscriptions: {}", subscribed.join(", "))),
            )
            .await
        }

        Frame::History { category, limit } => {
            let items = match category {
                Some(category) => {
                    let Some(name) = state.registry.categories().resolve(&category) else {
                        return reply_error(handle, unknown_category(&category)).await;
                    };
                    let name = name.to_string();
                    state
                        .with_store(move |store| store.query_by_category(&name, limit))
                        .await
                }
                None => state.with_store(move |store| store.query_all(limit)).await,
            };

            match items {
                Ok(items) => {
                    debug!(connection = %id, items = items.len(), "Serving history");
                    reply(handle, Frame::news_history(items)).await
                }
                Err(e) => internal_error(handle, &e).await,
            }
        }

        Frame::Publish {
            title,
            body,
            category,
        } => {
            let Some(name) = state.registry.categories().resolve(&category) else {
                return reply_error(handle, unknown_category(&category)).await;
            };
            let name = name.to_string();

            let stored = state
                .with_store(move |store| {
                    let item = store.append(title, body, &name);
                    (item, store.count())
                })
                .await;
            let (item, stored_count) = match stored {
                Ok(stored) => stored,
                Err(e) => return internal_error(handle, &e).await,
            };
            state.record_published();
            metrics::set_stored_news(stored_count);

            let started = Instant::now();
            let report = state.broadcast(&item).await.unwrap_or_else(|e| {
                error!(id = item.id, error = %e, "Failed to encode news update");
                metrics::record_error("encode");
                BroadcastReport::default()
            });
            metrics::record_publish(
                &item.category,
                report.delivered,
                report.failed,
                started.elapsed().as_secs_f64(),
            );

            info!(
                connection = %id,
                id = item.id,
                category = %item.category,
                delivered = report.delivered,
                failed = report.failed,
                "News published"
            );

            reply(handle, Frame::success(format!("News published (id: {})", item.id))).await
        }

        Frame::Delete { ids } => {
            let removed = state
                .with_store(move |store| (store.remove_by_ids(&ids), store.count()))
                .await;
            let (outcome, stored_count) = match removed {
                Ok(removed) => removed,
                Err(e) => return internal_error(handle, &e).await,
            };
            metrics::set_stored_news(stored_count);

            match outcome.require_any() {
                Ok(outcome) => {
                    let mut message = format!("Removed {} news item(s)", outcome.removed);
                    if !outcome.not_found.is_empty() {
                        let missing: Vec<String> =
                            outcome.not_found.iter().map(ToString::to_string).collect();
                        message.push_str(&format!("; not found: {}", missing.join(", ")));
                    }
                    reply(handle, Frame::success(message)).await
                }
                Err(e) => reply_error(handle, e.to_string()).await,
            }
        }

        Frame::ClearHistory {} => match state.with_store(|store| store.clear()).await {
            Ok(()) => {
                metrics::set_stored_news(0);
                info!(connection = %id, "News history cleared");
                reply(handle, Frame::success("News history cleared")).await
            }
            Err(e) => internal_error(handle, &e).await,
        },

        Frame::Disconnect {} => {
            reply(handle, Frame::success("Disconnected")).await?;
            Ok(Flow::Close)
        }

        // Decoder diagnostics for malformed or unknown records.
        Frame::Error { message } => {
            debug!(connection = %id, error = %message, "Rejected inbound record");
            metrics::record_error("protocol");
            reply_error(handle, message).await
        }

        other => {
            reply_error(
                handle,
                format!("Unsupported message type '{}'", other.frame_type()),
            )
            .await
        }
    }
}

fn unknown_category(category: &str) -> String {
    RegistryError::CategoryUnknown(normalize_category(category)).to_string()
}

async fn internal_error(
    handle: &ConnectionHandle,
    e: &ServerError,
) -> Result<Flow, TransportError> {
    error!(connection = %handle.id(), error = %e, "Store operation failed");
    metrics::record_error("store");
    reply_error(handle, "Internal server error").await
}
