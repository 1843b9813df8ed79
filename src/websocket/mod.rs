use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::config::HubConfig;
use crate::metrics;

pub mod events;
pub mod session;

pub use events::HubEvent;

/// Unique identifier for one live connection
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

/// Handle returned by `connect`: the receiving end of the connection's bounded buffer.
pub struct HubConnection {
    pub id: ConnectionId,
    pub user_id: Uuid,
    pub receiver: mpsc::Receiver<Arc<str>>,
}

struct Connection {
    user_id: Uuid,
    sender: mpsc::Sender<Arc<str>>,
    channels: HashSet<Uuid>,
}

#[derive(Default)]
struct Registry {
    // conversation_id -> subscribed connections
    channels: HashMap<Uuid, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, Connection>,
    // user_id -> connections, oldest first
    by_user: HashMap<Uuid, Vec<ConnectionId>>,
}

impl Registry {
    fn remove_connection(&mut self, id: ConnectionId) -> bool {
        let Some(conn) = self.connections.remove(&id) else {
            return false;
        };
        for channel in &conn.channels {
            if let Some(members) = self.channels.get_mut(channel) {
                members.remove(&id);
                if members.is_empty() {
                    self.channels.remove(channel);
                }
            }
        }
        if let Some(ids) = self.by_user.get_mut(&conn.user_id) {
            ids.retain(|c| *c != id);
            if ids.is_empty() {
                self.by_user.remove(&conn.user_id);
            }
        }
        metrics::HUB_CONNECTIONS.dec();
        true
    }

    fn subscribe(&mut self, channel: Uuid, id: ConnectionId) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };
        conn.channels.insert(channel);
        self.channels.entry(channel).or_default().insert(id);
        true
    }

    fn unsubscribe(&mut self, channel: Uuid, id: ConnectionId) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.channels.remove(&channel);
        }
        if let Some(members) = self.channels.get_mut(&channel) {
            members.remove(&id);
            if members.is_empty() {
                self.channels.remove(&channel);
            }
        }
    }
}

/// Per-delivery outcome of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// In-memory pub/sub registry for live delivery.
///
/// One channel per conversation. Every operation is synchronous and bounded:
/// `broadcast` enqueues with `try_send` and drops connections whose buffer is
/// full or closed. Constructed at startup and shared by clone.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<RwLock<Registry>>,
    config: HubConfig,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Registry::default())),
            config,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a connection. When the user already holds the maximum number of
    /// connections, the oldest one is evicted.
    pub fn connect(&self, user_id: Uuid) -> HubConnection {
        let (sender, receiver) = mpsc::channel(self.config.connection_buffer.max(1));
        let id = ConnectionId::new();

        let mut registry = self.write();
        let max = self.config.max_connections_per_user.max(1);
        while registry.by_user.get(&user_id).map_or(0, Vec::len) >= max {
            let Some(oldest) = registry.by_user.get(&user_id).and_then(|ids| ids.first().copied())
            else {
                break;
            };
            registry.remove_connection(oldest);
            metrics::HUB_CONNECTIONS_DROPPED
                .with_label_values(&["evicted"])
                .inc();
            tracing::debug!(user_id = %user_id, connection = ?oldest, "evicted oldest connection");
        }

        registry.connections.insert(
            id,
            Connection {
                user_id,
                sender,
                channels: HashSet::new(),
            },
        );
        registry.by_user.entry(user_id).or_default().push(id);
        metrics::HUB_CONNECTIONS.inc();

        HubConnection {
            id,
            user_id,
            receiver,
        }
    }

    pub fn disconnect(&self, id: ConnectionId) {
        if self.write().remove_connection(id) {
            tracing::debug!(connection = ?id, "connection removed from hub");
        }
    }

    /// Returns false when the connection is not registered.
    pub fn subscribe(&self, channel: Uuid, id: ConnectionId) -> bool {
        self.write().subscribe(channel, id)
    }

    pub fn unsubscribe(&self, channel: Uuid, id: ConnectionId) {
        self.write().unsubscribe(channel, id);
    }

    /// Subscribes every live connection of `user_id`; returns how many.
    pub fn subscribe_user(&self, channel: Uuid, user_id: Uuid) -> usize {
        let mut registry = self.write();
        let ids = registry.by_user.get(&user_id).cloned().unwrap_or_default();
        ids.into_iter()
            .filter(|id| registry.subscribe(channel, *id))
            .count()
    }

    pub fn unsubscribe_user(&self, channel: Uuid, user_id: Uuid) {
        let mut registry = self.write();
        let ids = registry.by_user.get(&user_id).cloned().unwrap_or_default();
        for id in ids {
            registry.unsubscribe(channel, id);
        }
    }

    /// Delivers `event` to every subscriber of `channel` except connections of
    /// `exclude_user`. Never waits: a full or closed buffer drops that connection.
    pub fn broadcast(
        &self,
        channel: Uuid,
        event: &HubEvent,
        exclude_user: Option<Uuid>,
    ) -> BroadcastReport {
        let frame: Arc<str> = match event.to_frame() {
            Ok(frame) => frame.into(),
            Err(e) => {
                tracing::error!(error = %e, event = event.event_type(), "failed to encode frame");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        {
            let registry = self.read();
            let Some(members) = registry.channels.get(&channel) else {
                return report;
            };
            for id in members {
                let Some(conn) = registry.connections.get(id) else {
                    continue;
                };
                if Some(conn.user_id) == exclude_user {
                    continue;
                }
                match conn.sender.try_send(Arc::clone(&frame)) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => failed.push((*id, "overflow")),
                    Err(TrySendError::Closed(_)) => failed.push((*id, "closed")),
                }
            }
        }

        if !failed.is_empty() {
            let mut registry = self.write();
            for (id, reason) in failed {
                if registry.remove_connection(id) {
                    report.dropped += 1;
                    metrics::HUB_CONNECTIONS_DROPPED
                        .with_label_values(&[reason])
                        .inc();
                    tracing::warn!(
                        connection = ?id,
                        conversation_id = %channel,
                        reason,
                        "dropping live connection"
                    );
                }
            }
        }

        if report.delivered > 0 {
            metrics::HUB_FRAMES_DELIVERED
                .with_label_values(&[event.event_type()])
                .inc_by(report.delivered as u64);
        }
        report
    }

    pub fn subscriber_count(&self, channel: Uuid) -> usize {
        self.read().channels.get(&channel).map_or(0, HashSet::len)
    }

    pub fn channel_count(&self) -> usize {
        self.read().channels.len()
    }

    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }

    pub fn connections_for(&self, user_id: Uuid) -> usize {
        self.read().by_user.get(&user_id).map_or(0, Vec::len)
    }

    /// Drops every connection; their receivers observe end of stream.
    pub fn shutdown(&self) {
        let mut registry = self.write();
        let count = registry.connections.len();
        metrics::HUB_CONNECTIONS.sub(count as i64);
        registry.connections.clear();
        registry.channels.clear();
        registry.by_user.clear();
        tracing::info!(connections = count, "broadcast hub shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentType, MessageView, NewMessage};
    use chrono::Utc;
    use tokio::sync::mpsc::error::TryRecvError;

    fn hub(buffer: usize, per_user: usize) -> BroadcastHub {
        BroadcastHub::new(HubConfig {
            connection_buffer: buffer,
            max_connections_per_user: per_user,
        })
    }

    fn event(conversation_id: Uuid) -> HubEvent {
        let message = NewMessage {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: Uuid::new_v4(),
            content: "hi".into(),
            content_type: ContentType::Text,
            media: vec![],
            reply_to_id: None,
            sent_at: Utc::now(),
        }
        .into_message(1);
        HubEvent::MessageNew(MessageView::bare(message))
    }

    #[test]
    fn empty_channels_are_collected() {
        let hub = hub(4, 5);
        let channel = Uuid::new_v4();
        let conn = hub.connect(Uuid::new_v4());

        assert!(hub.subscribe(channel, conn.id));
        assert_eq!(hub.channel_count(), 1);
        hub.unsubscribe(channel, conn.id);
        assert_eq!(hub.channel_count(), 0);

        hub.subscribe(channel, conn.id);
        hub.disconnect(conn.id);
        assert_eq!(hub.channel_count(), 0);
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn oldest_connection_is_evicted_at_cap() {
        let hub = hub(4, 2);
        let user = Uuid::new_v4();
        let mut first = hub.connect(user);
        let _second = hub.connect(user);
        let _third = hub.connect(user);

        assert_eq!(hub.connections_for(user), 2);
        assert_eq!(first.receiver.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn full_buffer_drops_the_connection() {
        let hub = hub(1, 5);
        let channel = Uuid::new_v4();
        let conn = hub.connect(Uuid::new_v4());
        hub.subscribe(channel, conn.id);

        let first = hub.broadcast(channel, &event(channel), None);
        let second = hub.broadcast(channel, &event(channel), None);

        assert_eq!(first, BroadcastReport { delivered: 1, dropped: 0 });
        assert_eq!(second, BroadcastReport { delivered: 0, dropped: 1 });
        assert_eq!(hub.subscriber_count(channel), 0);
    }
}
