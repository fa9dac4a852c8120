//! MQTT telemetry publisher.
//!
//! [`TelemetryPublisher::connect`] establishes a mutual-TLS session with the
//! broker and spawns a driver task that owns the protocol event loop. The
//! driver reconnects with capped exponential backoff when the session drops,
//! forwards broker acknowledgments to waiting publishers, and decodes
//! inbound messages onto bounded per-subscription channels. It never touches
//! caller-owned state directly.
//!
//! A QoS >= 1 publish returns only after the broker acknowledges the packet
//! (or a timeout elapses). What a failed publish means is the caller's
//! policy; here it is just an error value.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
    Publish, QoS, TlsConfiguration, Transport,
};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use thermwatch_core::Reading;

use crate::reconnect::{next_delay, ReconnectConfig};
use crate::tls::TlsMaterial;

/// MQTT keep-alive interval.
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// How long to wait for the broker's CONNACK before giving up at startup.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a QoS >= 1 publish waits for its broker acknowledgment.
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Request queue size shared with the rumqttc client.
const REQUEST_QUEUE_CAPACITY: usize = 16;

/// Capacity of each per-subscription inbound channel.
const INBOUND_CHANNEL_CAPACITY: usize = 32;

/// Capacity of the driver-to-publisher acknowledgment channel.
const ACK_CHANNEL_CAPACITY: usize = 64;

/// How long `shutdown` waits for the driver task to wind down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised by the telemetry transport.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The broker could not be reached or the TLS handshake failed.
    #[error("Connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    /// The broker actively refused the session.
    #[error("Broker refused connection: {0:?}")]
    Refused(ConnectReturnCode),

    /// No CONNACK arrived within [`CONNECT_TIMEOUT`].
    #[error("Timed out waiting for broker CONNACK after {0:?}")]
    ConnectTimeout(Duration),

    /// The client rejected or could not enqueue a request.
    #[error("Transport error: {0}")]
    Transport(#[from] rumqttc::ClientError),

    /// No acknowledgment for a QoS >= 1 publish within [`ACK_TIMEOUT`].
    #[error("No broker acknowledgment within {0:?}")]
    AckTimeout(Duration),

    /// The payload could not be serialized to the canonical encoding.
    #[error("Payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// The driver task has stopped; the session is gone.
    #[error("Telemetry connection closed")]
    Closed,
}

/// Acknowledgment events the driver forwards to waiting publishers.
#[derive(Debug, Clone, Copy)]
enum AckEvent {
    /// The event loop handed a publish to the wire under this packet id.
    Sent(u16),
    /// The broker acknowledged this packet id (PUBACK or PUBCOMP).
    Acked(u16),
}

/// Receiver side of the acknowledgment channel, plus the packet ids of
/// publishes whose waiter timed out. The event loop retransmits an
/// unacknowledged packet after a reconnect, so a timed-out id can reappear
/// as a fresh `Sent`/`Acked` pair long after its publish was reported
/// failed.
struct AckState {
    events: mpsc::Receiver<AckEvent>,
    abandoned: HashSet<u16>,
}

impl AckState {
    /// Discard events left over from earlier publishes, clearing any
    /// abandoned id whose late acknowledgment has now arrived.
    fn discard_stale(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            if let AckEvent::Acked(pkid) = event {
                self.abandoned.remove(&pkid);
            }
        }
    }
}

type SubscriptionMap = Arc<Mutex<HashMap<String, mpsc::Sender<Reading>>>>;

/// A live mutual-TLS MQTT session.
///
/// Cheap to share behind an `Arc`. `publish` serializes concurrent callers
/// internally so each waits on its own acknowledgment.
pub struct TelemetryPublisher {
    client: AsyncClient,
    acks: Mutex<AckState>,
    subscriptions: SubscriptionMap,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryPublisher {
    /// Connect to `endpoint:port` with the given client id and TLS material.
    ///
    /// Drives the handshake until the broker's CONNACK and fails if the
    /// broker is unreachable, refuses the session, or stays silent past
    /// [`CONNECT_TIMEOUT`]. On success a background driver task owns the
    /// protocol event loop until [`shutdown`](Self::shutdown).
    pub async fn connect(
        endpoint: &str,
        port: u16,
        client_id: &str,
        tls: TlsMaterial,
    ) -> Result<Self, TelemetryError> {
        let mut options = MqttOptions::new(client_id, endpoint, port);
        options.set_keep_alive(KEEP_ALIVE);
        // Persistent session: subscriptions and queued QoS >= 1 traffic
        // survive mid-run reconnects.
        options.set_clean_session(false);
        options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
            ca: tls.ca,
            alpn: None,
            client_auth: Some((tls.client_cert, tls.client_key)),
        }));

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);
        wait_for_connack(&mut event_loop).await?;

        tracing::info!(endpoint, port, client_id, "Connected to MQTT broker");

        let (ack_tx, ack_rx) = mpsc::channel(ACK_CHANNEL_CAPACITY);
        let subscriptions: SubscriptionMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();
        let driver = tokio::spawn(drive(
            event_loop,
            ack_tx,
            Arc::clone(&subscriptions),
            cancel.clone(),
        ));

        Ok(Self {
            client,
            acks: Mutex::new(AckState {
                events: ack_rx,
                abandoned: HashSet::new(),
            }),
            subscriptions,
            cancel,
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Publish `payload` on `topic`, serialized to the canonical encoding.
    ///
    /// For QoS 1 and 2 this returns once the broker has acknowledged the
    /// packet; [`TelemetryError::AckTimeout`] means delivery was never
    /// confirmed. Failures are per-publish: the session itself stays up and
    /// later publishes may succeed.
    pub async fn publish<T: Serialize>(
        &self,
        topic: &str,
        payload: &T,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TelemetryError> {
        let body = serde_json::to_vec(payload)?;

        // One publisher at a time: acknowledgments carry nothing but packet
        // ids, so waiters must not interleave.
        let mut acks = self.acks.lock().await;
        acks.discard_stale();

        self.client.publish(topic, qos, retain, body).await?;
        if matches!(qos, QoS::AtMostOnce) {
            return Ok(());
        }
        wait_for_ack(&mut acks).await
    }

    /// Subscribe to `topic`, returning a bounded channel of decoded
    /// readings.
    ///
    /// The driver decodes each arriving payload from the canonical encoding
    /// and forwards it over the channel. Undecodable payloads and overflow
    /// past [`INBOUND_CHANNEL_CAPACITY`] are logged and dropped, never
    /// surfaced to the subscriber.
    pub async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
    ) -> Result<mpsc::Receiver<Reading>, TelemetryError> {
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        self.subscriptions
            .lock()
            .await
            .insert(topic.to_string(), tx);
        if let Err(e) = self.client.subscribe(topic, qos).await {
            self.subscriptions.lock().await.remove(topic);
            return Err(e.into());
        }
        tracing::info!(topic, "Subscribed");
        Ok(rx)
    }

    /// Disconnect from the broker and stop the driver task.
    pub async fn shutdown(&self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(error = %e, "Disconnect request failed; session already down");
        }
        self.cancel.cancel();
        if let Some(driver) = self.driver.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, driver).await.is_err() {
                tracing::warn!(
                    timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                    "Telemetry driver did not stop in time"
                );
            }
        }
        tracing::info!("Telemetry connection closed");
    }
}

impl Drop for TelemetryPublisher {
    fn drop(&mut self) {
        // The driver must not outlive its handle even when shutdown() was
        // never reached.
        self.cancel.cancel();
    }
}

/// Drive the handshake until CONNACK, mapping every failure mode to a
/// startup error.
async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), TelemetryError> {
    let deadline = Instant::now() + CONNECT_TIMEOUT;
    loop {
        let event = tokio::time::timeout_at(deadline, event_loop.poll())
            .await
            .map_err(|_| TelemetryError::ConnectTimeout(CONNECT_TIMEOUT))??;
        match event {
            Event::Incoming(Packet::ConnAck(ConnAck {
                code: ConnectReturnCode::Success,
                ..
            })) => return Ok(()),
            Event::Incoming(Packet::ConnAck(ConnAck { code, .. })) => {
                return Err(TelemetryError::Refused(code))
            }
            _ => {} // outgoing CONNECT, pings
        }
    }
}

/// Wait until the packet id assigned to the publish just issued is
/// acknowledged.
///
/// Binds to the first `Sent` that is not the retransmission of an abandoned
/// publish. On timeout the bound id is recorded as abandoned so that its
/// late `Sent`/`Acked` pair cannot satisfy a later waiter.
async fn wait_for_ack(state: &mut AckState) -> Result<(), TelemetryError> {
    let deadline = Instant::now() + ACK_TIMEOUT;
    let mut sent_pkid = None;
    loop {
        let event = match tokio::time::timeout_at(deadline, state.events.recv()).await {
            Ok(event) => event.ok_or(TelemetryError::Closed)?,
            Err(_) => {
                if let Some(pkid) = sent_pkid {
                    state.abandoned.insert(pkid);
                }
                return Err(TelemetryError::AckTimeout(ACK_TIMEOUT));
            }
        };
        match event {
            AckEvent::Sent(pkid) if !state.abandoned.contains(&pkid) => sent_pkid = Some(pkid),
            AckEvent::Sent(_) => {} // retransmission of an abandoned publish
            AckEvent::Acked(pkid) if sent_pkid == Some(pkid) => return Ok(()),
            // A late acknowledgment of an abandoned publish frees that id
            // for reuse; anything else is stale noise.
            AckEvent::Acked(pkid) => {
                state.abandoned.remove(&pkid);
            }
        }
    }
}

/// Event-loop driver: runs until cancelled, reconnecting with capped
/// exponential backoff whenever polling fails.
async fn drive(
    mut event_loop: EventLoop,
    ack_tx: mpsc::Sender<AckEvent>,
    subscriptions: SubscriptionMap,
    cancel: CancellationToken,
) {
    let reconnect = ReconnectConfig::default();
    let mut delay = reconnect.initial_delay;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            polled = event_loop.poll() => match polled {
                Ok(event) => {
                    if let Event::Incoming(Packet::ConnAck(ack)) = &event {
                        tracing::info!(code = ?ack.code, "MQTT session established");
                        delay = reconnect.initial_delay;
                    }
                    handle_event(event, &ack_tx, &subscriptions).await;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "MQTT connection lost, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = next_delay(delay, &reconnect);
                }
            }
        }
    }
    tracing::debug!("Telemetry driver stopped");
}

/// Forward one protocol event to the interested party, if any.
async fn handle_event(
    event: Event,
    ack_tx: &mpsc::Sender<AckEvent>,
    subscriptions: &SubscriptionMap,
) {
    match event {
        Event::Outgoing(Outgoing::Publish(pkid)) => {
            // Packet id 0 is QoS 0: nothing will wait for it.
            if pkid != 0 {
                let _ = ack_tx.try_send(AckEvent::Sent(pkid));
            }
        }
        Event::Incoming(Packet::PubAck(ack)) => {
            let _ = ack_tx.try_send(AckEvent::Acked(ack.pkid));
        }
        Event::Incoming(Packet::PubComp(comp)) => {
            let _ = ack_tx.try_send(AckEvent::Acked(comp.pkid));
        }
        Event::Incoming(Packet::Publish(publish)) => {
            forward_inbound(&publish, subscriptions).await;
        }
        _ => {}
    }
}

/// Decode an inbound message and hand it to its subscription channel.
///
/// Failures stay here: an undecodable payload or a full/closed channel
/// drops the message and the driver keeps running.
async fn forward_inbound(publish: &Publish, subscriptions: &SubscriptionMap) {
    let subscriptions = subscriptions.lock().await;
    let Some(tx) = subscriptions.get(&publish.topic) else {
        tracing::debug!(topic = %publish.topic, "Inbound message on topic without subscriber");
        return;
    };

    let reading: Reading = match serde_json::from_slice(&publish.payload) {
        Ok(reading) => reading,
        Err(e) => {
            tracing::warn!(
                topic = %publish.topic,
                error = %e,
                "Dropping undecodable inbound payload"
            );
            return;
        }
    };

    match tx.try_send(reading) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(topic = %publish.topic, "Inbound channel full, dropping message");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(topic = %publish.topic, "Subscriber gone, dropping message");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rumqttc::PubAck;

    use super::*;

    async fn subscription_map(topic: &str, capacity: usize) -> (SubscriptionMap, mpsc::Receiver<Reading>) {
        let (tx, rx) = mpsc::channel(capacity);
        let map: SubscriptionMap = Arc::new(Mutex::new(HashMap::new()));
        map.lock().await.insert(topic.to_string(), tx);
        (map, rx)
    }

    fn ack_state(events: mpsc::Receiver<AckEvent>) -> AckState {
        AckState {
            events,
            abandoned: HashSet::new(),
        }
    }

    #[tokio::test]
    async fn inbound_payload_reaches_subscriber() {
        let (subs, mut rx) = subscription_map("sensors/temperature", 4).await;
        let publish = Publish::new(
            "sensors/temperature",
            QoS::AtLeastOnce,
            r#"{"timestamp":1700000000,"temp_c":72.3}"#,
        );

        forward_inbound(&publish, &subs).await;

        let reading = rx.try_recv().unwrap();
        assert_eq!(reading.timestamp, 1_700_000_000);
        assert_eq!(reading.temp_c, 72.3);
    }

    #[tokio::test]
    async fn undecodable_inbound_payload_is_dropped() {
        let (subs, mut rx) = subscription_map("sensors/temperature", 4).await;
        let publish = Publish::new("sensors/temperature", QoS::AtLeastOnce, "not json");

        forward_inbound(&publish, &subs).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn inbound_overflow_drops_the_excess() {
        let (subs, mut rx) = subscription_map("sensors/temperature", 1).await;
        let payload = r#"{"timestamp":1700000000,"temp_c":70.0}"#;

        for _ in 0..3 {
            let publish = Publish::new("sensors/temperature", QoS::AtLeastOnce, payload);
            forward_inbound(&publish, &subs).await;
        }

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn inbound_on_unsubscribed_topic_is_ignored() {
        let subs: SubscriptionMap = Arc::new(Mutex::new(HashMap::new()));
        let publish = Publish::new(
            "sensors/other",
            QoS::AtLeastOnce,
            r#"{"timestamp":1700000000,"temp_c":70.0}"#,
        );

        forward_inbound(&publish, &subs).await;
    }

    #[tokio::test]
    async fn acknowledgments_are_forwarded_with_packet_ids() {
        let (ack_tx, mut ack_rx) = mpsc::channel(4);
        let subs: SubscriptionMap = Arc::new(Mutex::new(HashMap::new()));

        handle_event(Event::Outgoing(Outgoing::Publish(7)), &ack_tx, &subs).await;
        handle_event(
            Event::Incoming(Packet::PubAck(PubAck { pkid: 7 })),
            &ack_tx,
            &subs,
        )
        .await;

        assert!(matches!(ack_rx.try_recv(), Ok(AckEvent::Sent(7))));
        assert!(matches!(ack_rx.try_recv(), Ok(AckEvent::Acked(7))));
    }

    #[tokio::test]
    async fn qos0_publish_produces_no_sent_event() {
        let (ack_tx, mut ack_rx) = mpsc::channel(4);
        let subs: SubscriptionMap = Arc::new(Mutex::new(HashMap::new()));

        handle_event(Event::Outgoing(Outgoing::Publish(0)), &ack_tx, &subs).await;

        assert!(ack_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ack_wait_matches_on_packet_id() {
        let (ack_tx, ack_rx) = mpsc::channel(4);
        // A stale acknowledgment for an earlier publish, then ours.
        ack_tx.send(AckEvent::Sent(3)).await.unwrap();
        ack_tx.send(AckEvent::Acked(2)).await.unwrap();
        ack_tx.send(AckEvent::Acked(3)).await.unwrap();

        let mut state = ack_state(ack_rx);
        wait_for_ack(&mut state).await.unwrap();
    }

    #[tokio::test]
    async fn ack_wait_reports_closed_driver() {
        let (ack_tx, ack_rx) = mpsc::channel::<AckEvent>(4);
        drop(ack_tx);

        let mut state = ack_state(ack_rx);
        let err = wait_for_ack(&mut state).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Closed));
    }

    /// A publish whose acknowledgment never arrives is retransmitted by the
    /// event loop after a reconnect. The retransmission's `Sent`/`Acked`
    /// pair can land ahead of the next publish's own events and must not be
    /// mistaken for them.
    #[tokio::test(start_paused = true)]
    async fn timed_out_publish_is_not_satisfied_by_its_retransmission() {
        let (ack_tx, ack_rx) = mpsc::channel(8);
        let mut state = ack_state(ack_rx);

        // Packet 5 goes out but is never acknowledged.
        ack_tx.send(AckEvent::Sent(5)).await.unwrap();
        let err = wait_for_ack(&mut state).await.unwrap_err();
        assert!(matches!(err, TelemetryError::AckTimeout(_)));
        assert!(state.abandoned.contains(&5));

        // Reconnect: packet 5 is retransmitted and acknowledged ahead of
        // the next publish, packet 6.
        ack_tx.send(AckEvent::Sent(5)).await.unwrap();
        ack_tx.send(AckEvent::Acked(5)).await.unwrap();
        ack_tx.send(AckEvent::Sent(6)).await.unwrap();
        ack_tx.send(AckEvent::Acked(6)).await.unwrap();

        // The wait for packet 6 skips the pair for packet 5 and completes
        // on its own acknowledgment; the settled id is reusable again.
        wait_for_ack(&mut state).await.unwrap();
        assert!(state.abandoned.is_empty());
    }

    #[tokio::test]
    async fn stale_drain_clears_abandoned_ids_once_acknowledged() {
        let (ack_tx, ack_rx) = mpsc::channel(8);
        let mut state = ack_state(ack_rx);
        state.abandoned.insert(9);

        ack_tx.send(AckEvent::Sent(9)).await.unwrap();
        ack_tx.send(AckEvent::Acked(9)).await.unwrap();

        state.discard_stale();

        assert!(state.abandoned.is_empty());
        assert!(state.events.try_recv().is_err());
    }
}
