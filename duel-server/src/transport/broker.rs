//! Broker adapter (spec.md §4.1). The broker itself (any MQTT-like pub/sub
//! medium) is an external collaborator, out of scope (spec.md §1) — this
//! module is the bidirectional bridge a server uses to talk to it: inbound
//! client commands fan into the owning component, outbound notifications
//! are serialized as `{comando, dados}` envelopes and published.
//!
//! The concrete channel is in-process (`tokio::sync::mpsc`/`broadcast`)
//! rather than a real MQTT client, mirroring how `mqtt-broker::channel`
//! wraps a connection: callers only see "publish to this client" /
//! "subscribe to this match", not the transport underneath. A real
//! deployment would swap this for an MQTT client without touching any
//! other component.

use dashmap::DashMap;
use duel_core::wire::ClientEventEnvelope;
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

const MATCH_TOPIC_CAPACITY: usize = 256;

/// Bidirectional bridge to the pub/sub broker for client I/O
/// (spec.md §2 component #1, §4.1).
pub struct BrokerAdapter {
    client_channels: DashMap<String, mpsc::UnboundedSender<ClientEventEnvelope>>,
    match_channels: DashMap<String, broadcast::Sender<ClientEventEnvelope>>,
    inbound_tx: mpsc::UnboundedSender<serde_json::Value>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<serde_json::Value>>>,
}

impl Default for BrokerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerAdapter {
    pub fn new() -> BrokerAdapter {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        BrokerAdapter {
            client_channels: DashMap::new(),
            match_channels: DashMap::new(),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        }
    }

    /// Simulates the broker delivering one message published on this
    /// server's inbound client-command topic (e.g. `clients/{id}/commands`).
    /// A real bridge to the wire protocol calls this from its message
    /// callback; the dispatch loop (`Node::spawn_background_tasks`) is the
    /// only consumer (spec.md §4.1 "fans every inbound message into the
    /// owning component").
    pub fn submit_command(&self, message: serde_json::Value) {
        let _ = self.inbound_tx.send(message);
    }

    /// Takes the inbound receiver so the dispatch loop can drain it.
    /// Panics if called more than once.
    pub fn take_inbound(&self) -> mpsc::UnboundedReceiver<serde_json::Value> {
        self.inbound_rx
            .lock()
            .expect("broker lock poisoned")
            .take()
            .expect("inbound receiver already taken")
    }

    /// Simulates the broker subscribing this server to
    /// `clients/{client_id}/events` on the client's behalf; returns the
    /// receiving half so a test harness (or a real bridge to the wire
    /// protocol) can drain it.
    pub fn connect_client(&self, client_id: &str) -> mpsc::UnboundedReceiver<ClientEventEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.client_channels.insert(client_id.to_string(), tx);
        rx
    }

    pub fn disconnect_client(&self, client_id: &str) {
        self.client_channels.remove(client_id);
    }

    /// Publishes on `clients/{clientId}/events`. Per spec.md §7 "Broker
    /// disconnection at a server": if the client isn't currently
    /// subscribed, delivery is silently deferred (dropped), which is within
    /// the at-most-once contract spec.md §4.1 assumes.
    pub fn publish_client_event(&self, client_id: &str, envelope: ClientEventEnvelope) {
        match self.client_channels.get(client_id) {
            Some(tx) => {
                if tx.send(envelope).is_err() {
                    warn!(client_id, "client event channel closed, dropping");
                }
            }
            None => debug!(client_id, "client not connected, deferring delivery"),
        }
    }

    /// Publishes on `matches/{matchId}/events`, fanning out to every
    /// subscriber (both the Host's and, in a cross-server match, any bridge
    /// forwarding to the Shadow's local player).
    pub fn publish_match_event(&self, match_id: &str, envelope: ClientEventEnvelope) {
        if let Some(tx) = self.match_channels.get(match_id) {
            let _ = tx.send(envelope);
        }
    }

    pub fn subscribe_match(&self, match_id: &str) -> broadcast::Receiver<ClientEventEnvelope> {
        self.match_channels
            .entry(match_id.to_string())
            .or_insert_with(|| broadcast::channel(MATCH_TOPIC_CAPACITY).0)
            .subscribe()
    }

    pub fn drop_match(&self, match_id: &str) {
        self.match_channels.remove(match_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_before_connect_is_silently_dropped() {
        let broker = BrokerAdapter::new();
        broker.publish_client_event("c1", ClientEventEnvelope::error("late"));
    }

    #[tokio::test]
    async fn connected_client_receives_published_event() {
        let broker = BrokerAdapter::new();
        let mut rx = broker.connect_client("c1");
        broker.publish_client_event("c1", ClientEventEnvelope::new("WAITING_OPPONENT", serde_json::json!({})));
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.comando, "WAITING_OPPONENT");
    }

    #[tokio::test]
    async fn match_topic_fans_out_to_all_subscribers() {
        let broker = BrokerAdapter::new();
        let mut a = broker.subscribe_match("m1");
        let mut b = broker.subscribe_match("m1");
        broker.publish_match_event("m1", ClientEventEnvelope::new("CHAT_RECEIVED", serde_json::json!({})));
        assert_eq!(a.recv().await.unwrap().comando, "CHAT_RECEIVED");
        assert_eq!(b.recv().await.unwrap().comando, "CHAT_RECEIVED");
    }
}
