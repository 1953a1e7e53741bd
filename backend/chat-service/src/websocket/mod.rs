//! In-memory connection registry and group router.
//!
//! Every live connection owns a bounded outbound queue. Groups map to the
//! set of connection queues subscribed to them. Publishing serializes the
//! event once and does a non-blocking enqueue per subscriber, so a slow
//! client can never stall a group.

use crate::metrics::{
    DELIVERIES_DROPPED_TOTAL, EVENTS_PUBLISHED_TOTAL, GROUPS_ACTIVE, WS_CONNECTIONS_ACTIVE,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use message_types::WsOutboundEvent;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

pub mod message_types;
pub mod session;

/// Serialized frame shared by every subscriber of one publish
pub type Frame = Arc<str>;
pub type OutboundSender = mpsc::Sender<Frame>;
pub type OutboundReceiver = mpsc::Receiver<Frame>;

/// Opaque handle of one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named multicast channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    /// Personal group every authenticated connection of a user joins
    User(Uuid),
    Conversation(Uuid),
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Group::User(id) => write!(f, "user:{id}"),
            Group::Conversation(id) => write!(f, "conversation:{id}"),
        }
    }
}

/// What a session needs to talk to its own connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: Uuid,
    sender: OutboundSender,
}

impl ConnectionHandle {
    /// Send an event to this connection only, waiting at most `timeout`
    /// for queue space. Returns `false` when the event was not enqueued.
    pub async fn send(&self, event: &WsOutboundEvent, timeout: Duration) -> bool {
        let frame: Frame = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outbound event");
                return false;
            }
        };

        match self.sender.send_timeout(frame, timeout).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    connection_id = %self.id,
                    error = %e,
                    "direct send to own connection failed"
                );
                false
            }
        }
    }
}

struct ConnectionEntry {
    user_id: Uuid,
    sender: OutboundSender,
    groups: HashSet<Group>,
}

struct RegistryInner {
    groups: DashMap<Group, HashMap<ConnectionId, OutboundSender>>,
    connections: DashMap<ConnectionId, ConnectionEntry>,
    users: DashMap<Uuid, HashSet<ConnectionId>>,
    outbound_buffer: usize,
}

/// Connection registry + group router.
///
/// Cloning is cheap and every clone shares state. Mutations of one group
/// are serialized by the group's map entry; unrelated groups proceed
/// independently.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new(outbound_buffer: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                groups: DashMap::new(),
                connections: DashMap::new(),
                users: DashMap::new(),
                outbound_buffer: outbound_buffer.max(1),
            }),
        }
    }

    /// Track a new connection of `user_id` with its own bounded outbound queue
    pub fn register(&self, user_id: Uuid) -> (ConnectionHandle, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(self.inner.outbound_buffer);
        let id = ConnectionId::new();

        self.inner.connections.insert(
            id,
            ConnectionEntry {
                user_id,
                sender: tx.clone(),
                groups: HashSet::new(),
            },
        );
        self.inner.users.entry(user_id).or_default().insert(id);
        WS_CONNECTIONS_ACTIVE.inc();

        tracing::debug!(connection_id = %id, user_id = %user_id, "connection registered");

        (
            ConnectionHandle {
                id,
                user_id,
                sender: tx,
            },
            rx,
        )
    }

    /// Subscribe a connection to a group. Idempotent; returns `false` for an
    /// unknown connection.
    pub fn join(&self, group: Group, connection: ConnectionId) -> bool {
        let sender = match self.inner.connections.get(&connection) {
            Some(entry) => entry.sender.clone(),
            None => return false,
        };

        match self.inner.groups.entry(group) {
            Entry::Occupied(mut subscribers) => {
                subscribers.get_mut().insert(connection, sender);
            }
            Entry::Vacant(slot) => {
                slot.insert(HashMap::from([(connection, sender)]));
                GROUPS_ACTIVE.inc();
            }
        }

        match self.inner.connections.get_mut(&connection) {
            Some(mut entry) => {
                entry.groups.insert(group);
            }
            None => {
                // Disconnected concurrently; undo.
                self.remove_subscriber(group, connection);
                return false;
            }
        }

        tracing::debug!(connection_id = %connection, group = %group, "joined group");
        true
    }

    /// Unsubscribe a connection from a group. No-op if absent.
    pub fn leave(&self, group: Group, connection: ConnectionId) {
        self.remove_subscriber(group, connection);
        if let Some(mut entry) = self.inner.connections.get_mut(&connection) {
            entry.groups.remove(&group);
        }
        tracing::debug!(connection_id = %connection, group = %group, "left group");
    }

    /// Deliver `event` to every subscriber of `group` except `except`.
    ///
    /// Each delivery is a non-blocking enqueue: full queues drop the event
    /// for that subscriber, closed queues are pruned. Returns the number of
    /// subscribers the event was enqueued for.
    pub fn publish(
        &self,
        group: Group,
        event: &WsOutboundEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        let frame: Frame = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(error = %e, group = %group, "failed to serialize event");
                return 0;
            }
        };
        EVENTS_PUBLISHED_TOTAL
            .with_label_values(&[event.kind()])
            .inc();

        let mut delivered = 0;
        let mut closed = Vec::new();

        if let Some(subscribers) = self.inner.groups.get(&group) {
            for (id, sender) in subscribers.iter() {
                if Some(*id) == except {
                    continue;
                }
                match sender.try_send(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        DELIVERIES_DROPPED_TOTAL.with_label_values(&["full"]).inc();
                        tracing::warn!(
                            connection_id = %id,
                            group = %group,
                            "outbound queue full, dropping delivery"
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        DELIVERIES_DROPPED_TOTAL
                            .with_label_values(&["closed"])
                            .inc();
                        closed.push(*id);
                    }
                }
            }
        }

        for id in closed {
            self.leave(group, id);
        }

        delivered
    }

    /// Tear down a connection: leave every group it belongs to and forget it.
    /// Returns the groups that were released.
    pub fn disconnect(&self, connection: ConnectionId) -> Vec<Group> {
        let Some((_, entry)) = self.inner.connections.remove(&connection) else {
            return Vec::new();
        };

        let groups: Vec<Group> = entry.groups.into_iter().collect();
        for group in &groups {
            self.remove_subscriber(*group, connection);
        }

        if let Entry::Occupied(mut ids) = self.inner.users.entry(entry.user_id) {
            ids.get_mut().remove(&connection);
            if ids.get().is_empty() {
                ids.remove();
            }
        }
        WS_CONNECTIONS_ACTIVE.dec();

        tracing::debug!(
            connection_id = %connection,
            user_id = %entry.user_id,
            groups = groups.len(),
            "connection torn down"
        );
        groups
    }

    pub fn subscriber_count(&self, group: Group) -> usize {
        self.inner
            .groups
            .get(&group)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub fn groups_of(&self, connection: ConnectionId) -> Vec<Group> {
        self.inner
            .connections
            .get(&connection)
            .map(|e| e.groups.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn connections_of(&self, user_id: Uuid) -> Vec<ConnectionId> {
        self.inner
            .users
            .get(&user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.inner
            .users
            .get(&user_id)
            .is_some_and(|ids| !ids.is_empty())
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    fn remove_subscriber(&self, group: Group, connection: ConnectionId) {
        if let Entry::Occupied(mut subscribers) = self.inner.groups.entry(group) {
            subscribers.get_mut().remove(&connection);
            if subscribers.get().is_empty() {
                subscribers.remove();
                GROUPS_ACTIVE.dec();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing(user_id: Uuid) -> WsOutboundEvent {
        WsOutboundEvent::Typing {
            user_id,
            username: "alice".into(),
            is_typing: true,
        }
    }

    #[test]
    fn group_names_render_with_prefix() {
        let id = Uuid::nil();
        assert_eq!(
            Group::User(id).to_string(),
            "user:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            Group::Conversation(id).to_string(),
            "conversation:00000000-0000-0000-0000-000000000000"
        );
    }

    #[tokio::test]
    async fn join_is_idempotent_and_leave_is_noop_when_absent() {
        let registry = ConnectionRegistry::new(8);
        let (conn, _rx) = registry.register(Uuid::new_v4());
        let group = Group::Conversation(Uuid::new_v4());

        assert!(registry.join(group, conn.id));
        assert!(registry.join(group, conn.id));
        assert_eq!(registry.subscriber_count(group), 1);

        registry.leave(group, conn.id);
        registry.leave(group, conn.id);
        assert_eq!(registry.subscriber_count(group), 0);
        assert!(registry.groups_of(conn.id).is_empty());
    }

    #[tokio::test]
    async fn publish_reaches_subscribers_except_excluded() {
        let registry = ConnectionRegistry::new(8);
        let user = Uuid::new_v4();
        let (a, mut rx_a) = registry.register(user);
        let (b, mut rx_b) = registry.register(Uuid::new_v4());
        let group = Group::Conversation(Uuid::new_v4());
        registry.join(group, a.id);
        registry.join(group, b.id);

        let delivered = registry.publish(group, &typing(user), Some(a.id));
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err());
        let frame = rx_b.try_recv().expect("b receives");
        assert!(frame.contains("\"type\":\"typing\""));
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking_others() {
        let registry = ConnectionRegistry::new(1);
        let (slow, _slow_rx) = registry.register(Uuid::new_v4());
        let (fast, mut fast_rx) = registry.register(Uuid::new_v4());
        let group = Group::Conversation(Uuid::new_v4());
        registry.join(group, slow.id);
        registry.join(group, fast.id);

        let event = typing(Uuid::new_v4());
        assert_eq!(registry.publish(group, &event, None), 2);
        fast_rx.try_recv().expect("first frame");
        // slow never drains: its second delivery is dropped
        assert_eq!(registry.publish(group, &event, None), 1);
        fast_rx.try_recv().expect("second frame");
        assert_eq!(registry.subscriber_count(group), 2);
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let registry = ConnectionRegistry::new(4);
        let (gone, gone_rx) = registry.register(Uuid::new_v4());
        let group = Group::Conversation(Uuid::new_v4());
        registry.join(group, gone.id);
        drop(gone_rx);

        assert_eq!(registry.publish(group, &typing(Uuid::new_v4()), None), 0);
        assert_eq!(registry.subscriber_count(group), 0);
        assert!(registry.groups_of(gone.id).is_empty());
    }

    #[tokio::test]
    async fn disconnect_releases_every_group() {
        let registry = ConnectionRegistry::new(4);
        let user = Uuid::new_v4();
        let (conn, mut rx) = registry.register(user);
        let personal = Group::User(user);
        let conversation = Group::Conversation(Uuid::new_v4());
        registry.join(personal, conn.id);
        registry.join(conversation, conn.id);
        assert!(registry.is_online(user));

        let mut released = registry.disconnect(conn.id);
        released.sort_by_key(|g| g.to_string());
        assert_eq!(released.len(), 2);

        assert_eq!(registry.subscriber_count(personal), 0);
        assert_eq!(registry.subscriber_count(conversation), 0);
        assert_eq!(registry.publish(personal, &typing(user), None), 0);
        assert!(rx.try_recv().is_err());
        assert!(!registry.is_online(user));
        assert!(registry.disconnect(conn.id).is_empty());
        assert!(!registry.join(conversation, conn.id));
    }

    #[tokio::test]
    async fn multi_device_users_are_indexed() {
        let registry = ConnectionRegistry::new(4);
        let user = Uuid::new_v4();
        let (phone, _p) = registry.register(user);
        let (laptop, _l) = registry.register(user);

        let mut conns = registry.connections_of(user);
        conns.sort_by_key(|c| c.to_string());
        assert_eq!(conns.len(), 2);
        assert_eq!(registry.connection_count(), 2);

        registry.disconnect(phone.id);
        assert_eq!(registry.connections_of(user), vec![laptop.id]);
        assert!(registry.is_online(user));
    }

    #[tokio::test]
    async fn publish_preserves_order_per_subscriber() {
        let registry = ConnectionRegistry::new(64);
        let (conn, mut rx) = registry.register(Uuid::new_v4());
        let group = Group::Conversation(Uuid::new_v4());
        registry.join(group, conn.id);

        for i in 0..10 {
            registry.publish(
                group,
                &WsOutboundEvent::Error {
                    message: format!("n{i}"),
                },
                None,
            );
        }
        for i in 0..10 {
            let frame = rx.try_recv().expect("frame");
            assert!(frame.contains(&format!("\"n{i}\"")));
        }
    }
}
