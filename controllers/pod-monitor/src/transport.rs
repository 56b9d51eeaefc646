//! WebSocket transport.
//!
//! Each connection becomes one hub subscriber served by two pumps running in
//! a single task: the outbound pump writes queued hub messages and pings, the
//! inbound pump reads frames only to track liveness. Either pump ending
//! cancels the other, and the subscriber is removed once both are done.

use crate::config::TransportConfig;
use crate::server::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::rejection::QueryRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use watch_hub::{Hub, Subscriber, WatchSource};

/// Query string of the WebSocket endpoint.
#[derive(Debug, Deserialize)]
pub struct WatchQuery {
    /// Namespace to watch; the configured default when absent or empty
    pub namespace: Option<String>,
}

/// `GET /api/v1/ws?namespace=<ns>`
pub async fn ws_handler<S: WatchSource>(
    State(state): State<AppState<S>>,
    query: Result<Query<WatchQuery>, QueryRejection>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return rejection.into_response(),
    };
    let namespace = query
        .namespace
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| state.config.namespaces.default.clone());

    if !state.config.namespaces.is_allowed(&namespace) {
        warn!(namespace = %namespace, "Rejected WebSocket for disallowed namespace");
        return (StatusCode::FORBIDDEN, format!("namespace '{}' is not allowed", namespace)).into_response();
    }
    if state.hub.shutdown_token().is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let transport = state.config.transport.clone();
    upgrade
        .max_message_size(transport.max_message_size)
        .on_upgrade(move |socket| serve_socket(state.hub, namespace, socket, transport))
}

async fn serve_socket<S: WatchSource>(
    hub: Arc<Hub<S>>,
    namespace: String,
    socket: WebSocket,
    transport: TransportConfig,
) {
    let subscriber = match hub.subscribe(namespace.as_str()) {
        Ok(subscriber) => subscriber,
        Err(e) => {
            debug!(namespace = %namespace, "Dropping WebSocket: {}", e);
            return;
        }
    };

    let (sink, stream) = socket.split();
    serve_connection(hub, subscriber, sink, stream, &transport).await;
}

/// Runs both pumps for one subscriber and unsubscribes once both have ended.
pub async fn serve_connection<S, W, R, E>(
    hub: Arc<Hub<S>>,
    subscriber: Subscriber,
    sink: W,
    stream: R,
    transport: &TransportConfig,
) where
    S: WatchSource,
    W: Sink<Message> + Unpin,
    W::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let id = subscriber.id();
    let partition = subscriber.partition().to_string();
    info!(subscriber_id = %id, partition = %partition, "WebSocket client connected");

    let done = CancellationToken::new();
    tokio::join!(
        outbound_pump(subscriber, sink, transport, done.clone()),
        inbound_pump(stream, transport.pong_wait(), done.clone()),
    );

    hub.unsubscribe(&id);
    info!(subscriber_id = %id, partition = %partition, "WebSocket client disconnected");
}

/// Writes queued messages and periodic pings until the queue closes, a write
/// fails, or the inbound side ends.
async fn outbound_pump<W>(
    mut subscriber: Subscriber,
    mut sink: W,
    transport: &TransportConfig,
    done: CancellationToken,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let id = subscriber.id();
    let write_timeout = transport.write_timeout();
    let mut ping = tokio::time::interval_at(Instant::now() + transport.ping_interval(), transport.ping_interval());
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            biased;
            _ = done.cancelled() => break,
            next = subscriber.recv() => match next {
                Some(message) => match message.to_json() {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        warn!(subscriber_id = %id, "Failed to serialize message: {}", e);
                        continue;
                    }
                },
                None => {
                    // Hub closed the queue: unsubscribed, evicted, or shutting down
                    let _ = write_frame(&mut sink, Message::Close(None), write_timeout).await;
                    break;
                }
            },
            _ = ping.tick() => Message::Ping(Default::default()),
        };

        if let Err(e) = write_frame(&mut sink, frame, write_timeout).await {
            debug!(subscriber_id = %id, "WebSocket write failed: {}", e);
            break;
        }
    }

    let _ = sink.close().await;
    done.cancel();
}

/// Reads frames until the client closes, errors, or stays silent past `pong_wait`.
///
/// Any frame counts as proof of life; payloads are otherwise ignored.
async fn inbound_pump<R, E>(mut stream: R, pong_wait: Duration, done: CancellationToken)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + pong_wait;

    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {
                debug!("WebSocket read deadline expired");
                break;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => deadline = Instant::now() + pong_wait,
                Some(Err(e)) => {
                    debug!("WebSocket read failed: {}", e);
                    break;
                }
            },
        }
    }

    done.cancel();
}

async fn write_frame<W>(sink: &mut W, frame: Message, timeout: Duration) -> Result<(), String>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match tokio::time::timeout(timeout, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("write timed out after {:?}", timeout)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "tests fail loudly on unexpected errors")]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use serde_json::{json, Value};
    use watch_hub::mock::{wait_until, MockWatchSource};
    use watch_hub::HubConfig;

    type Inbound = mpsc::UnboundedSender<Result<Message, String>>;

    struct Harness {
        hub: Arc<Hub<MockWatchSource>>,
        source: MockWatchSource,
        client_in: Inbound,
        client_out: mpsc::UnboundedReceiver<Message>,
        connection: tokio::task::JoinHandle<()>,
    }

    async fn connect(namespace: &str) -> Harness {
        let source = MockWatchSource::new();
        source.set_resources(namespace, vec![json!({"name": "web-0"})]);
        let hub = Hub::new(source.clone(), HubConfig::default()).unwrap();

        let subscriber = hub.subscribe(namespace).unwrap();
        let (sink, client_out) = mpsc::unbounded::<Message>();
        let (client_in, stream) = mpsc::unbounded::<Result<Message, String>>();

        let connection = tokio::spawn({
            let hub = Arc::clone(&hub);
            async move {
                serve_connection(hub, subscriber, sink, stream, &TransportConfig::default()).await;
            }
        });

        Harness { hub, source, client_in, client_out, connection }
    }

    async fn next_frame(out: &mut mpsc::UnboundedReceiver<Message>) -> Message {
        tokio::time::timeout(Duration::from_secs(120), out.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection sink closed")
    }

    fn text(frame: Message) -> Value {
        match frame {
            Message::Text(body) => serde_json::from_str(body.as_str()).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_snapshot_and_events_written_as_json() {
        let mut h = connect("shop").await;

        let snapshot = text(next_frame(&mut h.client_out).await);
        assert_eq!(snapshot["kind"], "resource_added");
        assert_eq!(snapshot["partition"], "shop");
        assert_eq!(snapshot["payload"]["name"], "web-0");

        wait_until(|| h.source.open_streams("shop") == 1).await;
        h.source.emit_deleted("shop", json!({"name": "web-0"}));
        assert_eq!(text(next_frame(&mut h.client_out).await)["kind"], "resource_removed");
    }

    #[tokio::test]
    async fn test_client_close_unsubscribes() {
        let mut h = connect("shop").await;
        next_frame(&mut h.client_out).await;

        h.client_in.unbounded_send(Ok(Message::Close(None))).unwrap();
        h.connection.await.unwrap();

        assert_eq!(h.hub.stats().subscribers, 0);
        assert_eq!(h.hub.stats().watchers, 0);
    }

    #[tokio::test]
    async fn test_read_error_unsubscribes() {
        let h = connect("shop").await;

        h.client_in.unbounded_send(Err("connection reset".to_string())).unwrap();
        h.connection.await.unwrap();

        assert!(!h.hub.has_subscribers("shop"));
    }

    #[tokio::test]
    async fn test_hub_shutdown_sends_close_frame() {
        let mut h = connect("shop").await;
        next_frame(&mut h.client_out).await;

        h.hub.shutdown().await;

        assert!(matches!(next_frame(&mut h.client_out).await, Message::Close(_)));
        h.connection.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_keep_responsive_client_alive() {
        let mut h = connect("shop").await;
        next_frame(&mut h.client_out).await;

        for _ in 0..3 {
            assert!(matches!(next_frame(&mut h.client_out).await, Message::Ping(_)));
            h.client_in.unbounded_send(Ok(Message::Pong(Default::default()))).unwrap();
        }

        assert!(!h.connection.is_finished());
        assert_eq!(h.hub.stats().subscribers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_client_times_out() {
        let mut h = connect("shop").await;
        next_frame(&mut h.client_out).await;
        let started = Instant::now();

        tokio::time::timeout(Duration::from_secs(120), &mut h.connection)
            .await
            .expect("connection did not time out")
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(h.hub.stats().subscribers, 0);
    }

    #[tokio::test]
    async fn test_failed_write_unsubscribes() {
        let h = connect("shop").await;
        drop(h.client_out);

        h.connection.await.unwrap();
        assert_eq!(h.hub.stats().subscribers, 0);
    }
}
