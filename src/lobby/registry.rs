use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::ids::{LobbyId, SubscriberId};

use super::events::LobbyEvent;

const LOG_TARGET: &str = "lobby::registry";

/// Events buffered per subscriber before a slow reader is considered dead.
const SUBSCRIBER_BUFFER: usize = 64;

/// Subscription registry fanning lobby events out to concurrent
/// listeners. Sends are non-blocking; a subscriber whose channel is full
/// or closed is evicted on the spot. There is no replay; late or lagging
/// clients recover through the lobby status snapshot.
pub struct LobbyEventRegistry {
    lobbies: Mutex<HashMap<LobbyId, HashMap<SubscriberId, mpsc::Sender<LobbyEvent>>>>,
}

impl LobbyEventRegistry {
    pub fn new() -> Self {
        Self {
            lobbies: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, lobby_id: &LobbyId) -> (SubscriberId, mpsc::Receiver<LobbyEvent>) {
        let subscriber_id = SubscriberId::generate();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.lobbies
            .lock()
            .entry(lobby_id.clone())
            .or_default()
            .insert(subscriber_id.clone(), tx);
        (subscriber_id, rx)
    }

    pub fn unsubscribe(&self, lobby_id: &LobbyId, subscriber_id: &SubscriberId) {
        let mut lobbies = self.lobbies.lock();
        if let Some(sinks) = lobbies.get_mut(lobby_id) {
            sinks.remove(subscriber_id);
            if sinks.is_empty() {
                lobbies.remove(lobby_id);
            }
        }
    }

    /// Deliver `event` to every live sink for the lobby. Holding the lock
    /// across the whole fan-out makes concurrent broadcasts observe a
    /// single total order: the order `broadcast` was invoked.
    /// Returns the number of sinks that accepted the event.
    pub fn broadcast(&self, lobby_id: &LobbyId, event: LobbyEvent) -> usize {
        let mut lobbies = self.lobbies.lock();
        let Some(sinks) = lobbies.get_mut(lobby_id) else {
            return 0;
        };
        let mut delivered = 0;
        sinks.retain(|subscriber_id, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(err) => {
                debug!(
                    target = LOG_TARGET,
                    %lobby_id,
                    %subscriber_id,
                    kind = event.kind(),
                    reason = %err,
                    "evicting lobby subscriber"
                );
                false
            }
        });
        if sinks.is_empty() {
            lobbies.remove(lobby_id);
        }
        delivered
    }

    /// Drop every sink for a lobby, typically after `lobby_closed`.
    pub fn close_lobby(&self, lobby_id: &LobbyId) {
        self.lobbies.lock().remove(lobby_id);
    }

    pub fn subscriber_count(&self, lobby_id: &LobbyId) -> usize {
        self.lobbies
            .lock()
            .get(lobby_id)
            .map(|sinks| sinks.len())
            .unwrap_or(0)
    }
}

impl Default for LobbyEventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::UserId;

    fn left(user: &str) -> LobbyEvent {
        LobbyEvent::PlayerLeft {
            player_id: UserId::from(user),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber_in_order() {
        let registry = LobbyEventRegistry::new();
        let lobby = LobbyId::generate();
        let (_id_a, mut rx_a) = registry.subscribe(&lobby);
        let (_id_b, mut rx_b) = registry.subscribe(&lobby);

        assert_eq!(registry.broadcast(&lobby, left("usr_1")), 2);
        assert_eq!(registry.broadcast(&lobby, left("usr_2")), 2);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.recv().await.unwrap(), left("usr_1"));
            assert_eq!(rx.recv().await.unwrap(), left("usr_2"));
        }
    }

    #[tokio::test]
    async fn dropped_subscribers_are_evicted_on_next_broadcast() {
        let registry = LobbyEventRegistry::new();
        let lobby = LobbyId::generate();
        let (_id_a, rx_a) = registry.subscribe(&lobby);
        let (_id_b, mut rx_b) = registry.subscribe(&lobby);
        assert_eq!(registry.subscriber_count(&lobby), 2);

        drop(rx_a);
        assert_eq!(registry.broadcast(&lobby, left("usr_1")), 1);
        assert_eq!(registry.subscriber_count(&lobby), 1);
        assert_eq!(rx_b.recv().await.unwrap(), left("usr_1"));
    }

    #[tokio::test]
    async fn slow_subscribers_are_evicted_once_their_buffer_fills() {
        let registry = LobbyEventRegistry::new();
        let lobby = LobbyId::generate();
        let (_id, _rx) = registry.subscribe(&lobby);

        // Never reading: the buffer absorbs SUBSCRIBER_BUFFER events, the
        // next send fails and evicts.
        for _ in 0..SUBSCRIBER_BUFFER {
            assert_eq!(registry.broadcast(&lobby, left("usr_1")), 1);
        }
        assert_eq!(registry.broadcast(&lobby, left("usr_1")), 0);
        assert_eq!(registry.subscriber_count(&lobby), 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_the_sink() {
        let registry = LobbyEventRegistry::new();
        let lobby = LobbyId::generate();
        let (id, _rx) = registry.subscribe(&lobby);
        registry.unsubscribe(&lobby, &id);
        assert_eq!(registry.subscriber_count(&lobby), 0);
        assert_eq!(registry.broadcast(&lobby, left("usr_1")), 0);
    }
}
