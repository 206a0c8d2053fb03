//! Session Reader
//!
//! One task per open session: reads inbound frames, relays heartbeat
//! events and periodically retries the outbound queue. When the inbound
//! stream ends the client is told the session is gone.

use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{TransportError, WireFrame};
use crate::domain::events::StreamEvent;
use crate::domain::health::ConnectionQuality;
use crate::infrastructure::feed::client::StreamClient;
use crate::infrastructure::feed::codec::FrameDecoder;
use crate::infrastructure::feed::heartbeat::HeartbeatEvent;
use crate::infrastructure::feed::messages::{InboundMessage, PingFrame, now_millis};
use crate::infrastructure::metrics::{self, ErrorKind};

/// Drive session `generation` until it ends or is cancelled.
pub(super) async fn run(
    client: StreamClient,
    generation: u64,
    mut inbound: BoxStream<'static, Result<WireFrame, TransportError>>,
    mut heartbeat_rx: mpsc::Receiver<HeartbeatEvent>,
    cancel: CancellationToken,
    drain_interval: Duration,
) {
    let decoder = FrameDecoder::new(client.inner.config.protocol_mode());
    let drain_interval = drain_interval.max(Duration::from_millis(1));
    let mut drain = tokio::time::interval_at(tokio::time::Instant::now() + drain_interval, drain_interval);
    drain.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let (reason, code) = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                tracing::debug!(generation, "Session reader cancelled");
                return;
            }

            frame = inbound.next() => match frame {
                Some(Ok(WireFrame::Close { code, reason })) => {
                    tracing::info!(generation, code, reason = %reason, "Feed closed the connection");
                    break (reason, code);
                }
                Some(Ok(frame)) => client.on_frame(&decoder, &frame),
                Some(Err(e)) => {
                    tracing::error!(generation, error = %e, "Transport error");
                    client.on_transport_error(&e);
                    break (e.to_string(), None);
                }
                None => break ("connection lost".to_string(), None),
            },

            Some(event) = heartbeat_rx.recv() => client.on_heartbeat(generation, event),

            _ = drain.tick() => client.drain_tick(generation),
        }
    };

    client.on_connection_lost(generation, reason, code);
}

impl StreamClient {
    fn on_frame(&self, decoder: &FrameDecoder, frame: &WireFrame) {
        self.inner.stats.record_received(frame.len());
        metrics::record_received(frame.len());

        let messages = match decoder.decode(frame) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, bytes = frame.len(), "Failed to decode frame");
                self.inner.stats.record_error();
                metrics::record_error(ErrorKind::Decode);
                self.emit(StreamEvent::ConnectionError {
                    message: e.to_string(),
                    recoverable: true,
                });
                let mut state = self.inner.state.lock();
                self.reassess_quality(&mut state);
                return;
            }
        };

        for message in messages {
            self.dispatch(message);
        }
    }

    fn dispatch(&self, message: InboundMessage) {
        match message {
            InboundMessage::Pong { timestamp } => self.on_pong(timestamp),
            InboundMessage::SubscriptionAck { id } => {
                let acknowledged = self.inner.state.lock().registry.acknowledge(id, Utc::now());
                if acknowledged {
                    tracing::debug!(id = %id, "Subscription acknowledged");
                    self.emit(StreamEvent::SubscriptionAcknowledged { id });
                } else {
                    tracing::debug!(id = %id, "Acknowledgement for unknown subscription");
                }
            }
            InboundMessage::ServerError { code, message } => {
                tracing::warn!(code = ?code, error_message = %message, "Feed reported an error");
                self.inner.stats.record_error();
                metrics::record_error(ErrorKind::Server);
                self.emit(StreamEvent::ServerError { code, message });
                let mut state = self.inner.state.lock();
                self.reassess_quality(&mut state);
            }
            InboundMessage::MarketData(data) => {
                let matched = self.inner.state.lock().registry.record_inbound(&data.symbol, Utc::now());
                self.inner.stats.record_subscription_messages(&matched);
                self.emit(StreamEvent::MarketData(data));
            }
            InboundMessage::Unknown { kind } => {
                tracing::debug!(kind = %kind, "Ignoring unhandled message type");
            }
        }
    }

    fn on_pong(&self, timestamp: Option<u64>) {
        let mut state = self.inner.state.lock();
        let Some(session) = state.session.as_ref() else {
            return;
        };

        let latency = session
            .heartbeat
            .record_pong()
            .or_else(|| timestamp.map(|sent| Duration::from_millis(now_millis().saturating_sub(sent))));

        state.last_heartbeat = Some(Utc::now());
        state.pong_overdue = false;
        if let Some(latency) = latency {
            state.latency = Some(latency);
            self.inner.stats.record_latency(latency);
            metrics::record_latency(latency);
            tracing::trace!(latency_ms = latency.as_millis(), "Pong received");
        }
        self.reassess_quality(&mut state);
        drop(state);

        self.emit(StreamEvent::StatsUpdated(self.inner.stats.snapshot()));
    }

    fn on_transport_error(&self, error: &TransportError) {
        self.inner.stats.record_error();
        metrics::record_error(ErrorKind::Transport);
        self.emit(StreamEvent::ConnectionError {
            message: error.to_string(),
            recoverable: true,
        });
    }

    fn on_heartbeat(&self, generation: u64, event: HeartbeatEvent) {
        let mut state = self.inner.state.lock();
        if state.generation != generation || !Self::is_live(&state) {
            return;
        }

        match event {
            HeartbeatEvent::SendPing => {
                let connection_id = state.connection_id.clone().unwrap_or_default();
                let ping = self.new_ping(PingFrame::new(connection_id).to_payload());
                self.submit(&mut state, ping);
            }
            HeartbeatEvent::PongOverdue => {
                state.pong_overdue = true;
                self.set_quality(&mut state, ConnectionQuality::Poor);
            }
        }
    }

    fn drain_tick(&self, generation: u64) {
        let mut state = self.inner.state.lock();
        if state.generation != generation {
            return;
        }
        let sent = self.flush_queue(&mut state);
        if sent > 0 {
            tracing::debug!(sent, remaining = state.queue.len(), "Drained outbound queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::application::ports::TransportError;
    use crate::domain::events::StreamEvent;
    use crate::domain::health::{ConnectionQuality, ConnectionState};
    use crate::domain::queue::Priority;
    use crate::infrastructure::config::ClientConfig;
    use crate::infrastructure::feed::client::{SendOutcome, StreamClient};
    use crate::infrastructure::feed::codec::BinaryTickCodec;
    use crate::infrastructure::feed::memory::{InMemoryPeer, InMemoryTransport};

    async fn connected(config: ClientConfig) -> (StreamClient, InMemoryTransport, InMemoryPeer) {
        let transport = InMemoryTransport::new();
        let client = StreamClient::new(config, Arc::new(transport.clone()));
        client.connect().await.unwrap();
        let peer = transport.next_peer().await.unwrap();
        (client, transport, peer)
    }

    fn config() -> ClientConfig {
        ClientConfig::new("ws://feed.test/stream")
    }

    async fn next_matching(
        events: &mut tokio::sync::broadcast::Receiver<StreamEvent>,
        predicate: impl Fn(&StreamEvent) -> bool,
    ) -> StreamEvent {
        loop {
            let event = events.recv().await.unwrap();
            if predicate(&event) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn market_data_is_emitted_and_counted() {
        let (client, _transport, peer) = connected(config()).await;
        let mut events = client.events();
        let id = client.subscribe("EURUSD", "price");

        peer.push_json(&json!({"type": "tick", "symbol": "EURUSD", "price": 1.0842}));

        let event = next_matching(&mut events, |e| matches!(e, StreamEvent::MarketData(_))).await;
        let StreamEvent::MarketData(data) = event else {
            unreachable!();
        };
        assert_eq!(data.symbol, "EURUSD");
        assert_eq!(data.price, Some(1.0842));

        let subscription = client.subscription(id).unwrap();
        assert_eq!(subscription.message_count, 1);
        assert!(subscription.last_update.is_some());
        assert_eq!(client.stats().subscription_messages.get(&id), Some(&1));
        assert_eq!(client.stats().messages_received, 1);
    }

    #[tokio::test]
    async fn subscription_ack_marks_acknowledged() {
        let (client, _transport, peer) = connected(config()).await;
        let mut events = client.events();
        let id = client.subscribe("EURUSD", "price");

        peer.push_json(&json!({"type": "subscription_ack", "id": id.get()}));

        let event = next_matching(&mut events, |e| {
            matches!(e, StreamEvent::SubscriptionAcknowledged { .. })
        })
        .await;
        assert_eq!(event, StreamEvent::SubscriptionAcknowledged { id });
        assert!(client.subscription(id).unwrap().acknowledged);
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let (client, _transport, peer) = connected(config()).await;
        let mut events = client.events();

        peer.push_json(&json!({"type": "error", "code": "E42", "message": "bad symbol"}));

        let event = next_matching(&mut events, |e| matches!(e, StreamEvent::ServerError { .. })).await;
        assert_eq!(
            event,
            StreamEvent::ServerError {
                code: Some("E42".to_string()),
                message: "bad symbol".to_string(),
            }
        );
        assert_eq!(client.stats().errors, 1);
    }

    #[tokio::test]
    async fn malformed_frame_does_not_drop_session() {
        let (client, _transport, peer) = connected(config()).await;
        let mut events = client.events();

        peer.push_text("{not json");
        let event = next_matching(&mut events, |e| matches!(e, StreamEvent::ConnectionError { .. })).await;
        assert!(matches!(event, StreamEvent::ConnectionError { recoverable: true, .. }));

        peer.push_json(&json!({"type": "trade", "symbol": "EURUSD", "price": 1.0, "volume": 5.0}));
        next_matching(&mut events, |e| matches!(e, StreamEvent::MarketData(_))).await;
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn binary_ticks_decode_in_binary_mode() {
        let (client, _transport, peer) = connected(ClientConfig {
            binary: true,
            ..config()
        })
        .await;
        let mut events = client.events();
        assert!(peer.url().as_str().contains("binary=true"));

        let frame = BinaryTickCodec::new()
            .encode("EURUSD", 1.0842, 250.0, 1_700_000_000_000)
            .unwrap();
        peer.push_binary(frame.to_vec());

        let event = next_matching(&mut events, |e| matches!(e, StreamEvent::MarketData(_))).await;
        let StreamEvent::MarketData(data) = event else {
            unreachable!();
        };
        assert_eq!(data.symbol, "EURUSD");
        assert_eq!(data.volume, Some(250.0));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_ping_and_pong_measure_latency() {
        let (client, _transport, peer) = connected(config()).await;

        let frames = peer.wait_for_frames(1).await;
        assert_eq!(frames.len(), 1);
        let ping = &peer.sent_json()[0];
        assert_eq!(ping["type"], "ping");
        assert_eq!(ping["connectionId"], client.health().connection_id.unwrap().as_str());

        tokio::time::advance(std::time::Duration::from_millis(40)).await;
        let mut events = client.events();
        peer.push_json(&json!({"type": "pong", "timestamp": ping["timestamp"]}));
        next_matching(&mut events, |e| matches!(e, StreamEvent::StatsUpdated(_))).await;

        let health = client.health();
        assert_eq!(health.latency_ms, Some(40));
        assert!(health.last_heartbeat.is_some());
        assert_eq!(health.quality, ConnectionQuality::Excellent);
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_pong_degrades_quality_without_disconnecting() {
        let (client, _transport, peer) = connected(config()).await;
        let mut events = client.events();

        peer.wait_for_frames(1).await;
        let event = next_matching(&mut events, |e| matches!(e, StreamEvent::QualityChanged { .. })).await;

        assert_eq!(
            event,
            StreamEvent::QualityChanged {
                previous: ConnectionQuality::Excellent,
                current: ConnectionQuality::Poor,
            }
        );
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_tick_flushes_rate_limited_messages() {
        let (client, _transport, peer) = connected(ClientConfig {
            rate_limit_per_sec: 1,
            ..config()
        })
        .await;

        assert_eq!(client.send(json!({"n": 1}), Priority::Medium), SendOutcome::Transmitted);
        assert_eq!(client.send(json!({"n": 2}), Priority::Medium), SendOutcome::Queued);

        let frames = peer.wait_for_frames(2).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(client.queued_messages(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_latency_excludes_time_spent_queued() {
        let (client, _transport, peer) = connected(ClientConfig {
            rate_limit_per_sec: 1,
            ..config()
        })
        .await;

        // Spend the only token just before the first heartbeat so the ping queues
        tokio::time::sleep(std::time::Duration::from_millis(29_900)).await;
        assert_eq!(client.send(json!({"n": 1}), Priority::Medium), SendOutcome::Transmitted);

        let frames = peer.wait_for_frames(2).await;
        assert_eq!(frames.len(), 2);
        let ping = peer.sent_json()[1].clone();
        assert_eq!(ping["type"], "ping");

        tokio::time::advance(std::time::Duration::from_millis(40)).await;
        let mut events = client.events();
        peer.push_json(&json!({"type": "pong", "timestamp": ping["timestamp"]}));
        next_matching(&mut events, |e| matches!(e, StreamEvent::StatsUpdated(_))).await;

        assert_eq!(client.health().latency_ms, Some(40));
    }

    #[tokio::test]
    async fn zero_drain_interval_still_detects_loss() {
        let (client, _transport, peer) = connected(ClientConfig {
            queue_drain_interval: std::time::Duration::ZERO,
            ..config()
        })
        .await;
        let mut events = client.events();

        peer.close(1001, "going away");

        let event = next_matching(&mut events, |e| matches!(e, StreamEvent::Reconnecting { .. })).await;
        assert!(matches!(event, StreamEvent::Reconnecting { attempt: 1, .. }));
        assert_eq!(client.state(), ConnectionState::Reconnecting);

        client.disconnect();
    }

    #[tokio::test]
    async fn transport_error_triggers_reconnect() {
        let (client, transport, peer) = connected(config()).await;
        let mut events = client.events();

        peer.fail(TransportError::Io("reset by peer".to_string()));

        let event = next_matching(&mut events, |e| matches!(e, StreamEvent::Reconnecting { .. })).await;
        assert!(matches!(event, StreamEvent::Reconnecting { attempt: 1, .. }));
        assert_eq!(client.state(), ConnectionState::Reconnecting);
        assert_eq!(transport.attempts(), 1);
        assert!(client.stats().errors >= 1);

        client.disconnect();
    }
}
