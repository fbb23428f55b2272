use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::realtime::events::RealtimeEvent;

pub type ConnectionId = Uuid;

/// A broadcast frame. `target` narrows delivery to sockets authenticated as
/// that user; it is set when a targeted push found no bound connection.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub target: Option<Uuid>,
    pub event: RealtimeEvent,
}

impl Envelope {
    pub fn is_for(&self, user_id: Uuid) -> bool {
        self.target.is_none_or(|target| target == user_id)
    }
}

/// How a targeted push was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Direct(ConnectionId),
    Fallback,
}

/// Receiving ends handed to a freshly opened socket.
pub struct Connection {
    pub id: ConnectionId,
    pub direct: mpsc::Receiver<RealtimeEvent>,
    pub broadcast: broadcast::Receiver<Envelope>,
}

/// Owns the user -> connection bindings and the event fan-out.
///
/// One connection per user: the latest `bind` wins, and `unbind` only
/// removes entries still pointing at the closing connection, so a user who
/// reconnected is not unbound by their old socket going away.
pub struct Dispatcher {
    events_tx: broadcast::Sender<Envelope>,
    connections: DashMap<ConnectionId, mpsc::Sender<RealtimeEvent>>,
    bindings: DashMap<Uuid, ConnectionId>,
    connection_buffer: usize,
}

impl Dispatcher {
    pub fn new(event_buffer_size: usize, connection_buffer_size: usize) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        Self {
            events_tx,
            connections: DashMap::new(),
            bindings: DashMap::new(),
            connection_buffer: connection_buffer_size,
        }
    }

    pub fn connect(&self) -> Connection {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.connection_buffer);
        self.connections.insert(id, tx);

        Connection {
            id,
            direct: rx,
            broadcast: self.events_tx.subscribe(),
        }
    }

    pub fn disconnect(&self, conn_id: ConnectionId) {
        self.connections.remove(&conn_id);
        let unbound = self.unbind(conn_id);
        debug!(conn_id = %conn_id, unbound, "connection released");
    }

    /// Returns the connection previously bound to `user_id`, if any.
    pub fn bind(&self, user_id: Uuid, conn_id: ConnectionId) -> Option<ConnectionId> {
        let previous = self.bindings.insert(user_id, conn_id);
        info!(user_id = %user_id, conn_id = %conn_id, "user bound to connection");
        previous
    }

    /// Drops every binding that points at `conn_id`; returns how many.
    pub fn unbind(&self, conn_id: ConnectionId) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|_, bound| *bound != conn_id);
        before.saturating_sub(self.bindings.len())
    }

    pub fn resolve(&self, user_id: Uuid) -> Option<ConnectionId> {
        self.bindings.get(&user_id).map(|entry| *entry.value())
    }

    /// Returns the number of live subscribers that will see the event.
    pub fn broadcast(&self, event: RealtimeEvent) -> usize {
        let name = event.name();
        let receivers = self
            .events_tx
            .send(Envelope {
                target: None,
                event,
            })
            .unwrap_or(0);
        debug!(event = name, receivers, "event broadcast");
        receivers
    }

    /// Pushes to the user's bound connection, falling back to an addressed
    /// broadcast when the user has no binding or its queue is unavailable.
    pub fn send_to_user(&self, user_id: Uuid, event: RealtimeEvent) -> Delivery {
        let direct = self.resolve(user_id).and_then(|conn_id| {
            self.connections
                .get(&conn_id)
                .map(|sender| (conn_id, sender.value().clone()))
        });

        let event = match direct {
            Some((conn_id, sender)) => match sender.try_send(event) {
                Ok(()) => return Delivery::Direct(conn_id),
                Err(mpsc::error::TrySendError::Full(event))
                | Err(mpsc::error::TrySendError::Closed(event)) => event,
            },
            None => event,
        };

        let _ = self.events_tx.send(Envelope {
            target: Some(user_id),
            event,
        });
        Delivery::Fallback
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.events_tx.subscribe()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::tracking::GeoPoint;
    use crate::models::user::{Role, User};

    fn agent(id: Uuid) -> User {
        let now = Utc::now();
        User {
            id,
            name: "Karim".to_string(),
            email: "karim@example.com".to_string(),
            phone: None,
            address: None,
            role: Role::Agent,
            is_active: true,
            password_hash: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn last_binding_wins() {
        let dispatcher = Dispatcher::new(16, 4);
        let user = Uuid::from_u128(1);
        let first = dispatcher.connect();
        let second = dispatcher.connect();

        assert_eq!(dispatcher.bind(user, first.id), None);
        assert_eq!(dispatcher.bind(user, second.id), Some(first.id));
        assert_eq!(dispatcher.resolve(user), Some(second.id));
    }

    #[test]
    fn stale_disconnect_keeps_newer_binding() {
        let dispatcher = Dispatcher::new(16, 4);
        let user = Uuid::from_u128(1);
        let old = dispatcher.connect();
        let new = dispatcher.connect();

        dispatcher.bind(user, old.id);
        dispatcher.bind(user, new.id);
        dispatcher.disconnect(old.id);

        assert_eq!(dispatcher.resolve(user), Some(new.id));

        dispatcher.disconnect(new.id);
        assert_eq!(dispatcher.resolve(user), None);
        assert_eq!(dispatcher.connection_count(), 0);
    }

    #[tokio::test]
    async fn targeted_push_uses_bound_connection() {
        let dispatcher = Dispatcher::new(16, 4);
        let user = Uuid::from_u128(9);
        let mut conn = dispatcher.connect();
        dispatcher.bind(user, conn.id);

        let delivery = dispatcher.send_to_user(user, RealtimeEvent::UserStatusUpdated(agent(user)));
        assert_eq!(delivery, Delivery::Direct(conn.id));

        let event = conn.direct.recv().await.unwrap();
        assert_eq!(event.name(), "user:status-updated");
        assert!(conn.broadcast.try_recv().is_err());
    }

    #[tokio::test]
    async fn unbound_user_gets_addressed_broadcast() {
        let dispatcher = Dispatcher::new(16, 4);
        let user = Uuid::from_u128(9);
        let mut rx = dispatcher.subscribe();

        let delivery = dispatcher.send_to_user(user, RealtimeEvent::UserStatusUpdated(agent(user)));
        assert_eq!(delivery, Delivery::Fallback);

        let envelope = rx.recv().await.unwrap();
        assert!(envelope.is_for(user));
        assert!(!envelope.is_for(Uuid::from_u128(10)));
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let dispatcher = Dispatcher::new(16, 4);
        let mut a = dispatcher.connect();
        let mut b = dispatcher.connect();

        let receivers = dispatcher.broadcast(RealtimeEvent::TrackingUpdated {
            parcel_id: "P1".to_string(),
            coordinates: GeoPoint { lat: 1.0, lng: 2.0 },
        });
        assert_eq!(receivers, 2);

        for conn in [&mut a, &mut b] {
            let envelope = conn.broadcast.recv().await.unwrap();
            assert!(envelope.target.is_none());
            assert_eq!(envelope.event.name(), "tracking:updated");
        }
    }
}
