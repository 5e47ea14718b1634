use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::domain::notification::Notification;

pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

type Payload = Arc<str>;

/// Identifies one live connection of one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub user_id: Uuid,
}

/// Receiving side of a connection's bounded queue.
///
/// Yields `None` once the hub has dropped the connection and the queued
/// messages are drained.
pub struct Mailbox {
    rx: mpsc::Receiver<Payload>,
}

impl Mailbox {
    pub async fn recv(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }

    /// Waits for one message, then takes everything else already queued,
    /// joined with newlines.
    pub async fn next_batch(&mut self) -> Option<String> {
        let first = self.recv().await?;
        let mut batch = String::from(&*first);
        while let Ok(next) = self.rx.try_recv() {
            batch.push('\n');
            batch.push_str(&next);
        }
        Some(batch)
    }
}

/// Registry of live connections grouped per user.
///
/// A connection whose mailbox is full when a message arrives is treated as a
/// slow consumer: it is removed and its mailbox closed. A user never has an
/// empty bucket.
pub struct ConnectionHub {
    connections: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::Sender<Payload>>>>,
    mailbox_capacity: usize,
}

impl ConnectionHub {
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            mailbox_capacity: mailbox_capacity.max(1),
        }
    }

    pub async fn register(&self, user_id: Uuid) -> (ConnectionHandle, Mailbox) {
        let (tx, rx) = mpsc::channel(self.mailbox_capacity);
        let handle = ConnectionHandle { id: Uuid::new_v4(), user_id };

        let mut connections = self.connections.write().await;
        connections.entry(user_id).or_default().insert(handle.id, tx);
        metrics::gauge!("ws_connections").increment(1.0);

        tracing::info!(
            user_id = %user_id,
            connection_id = %handle.id,
            user_connections = connections.get(&user_id).map_or(0, HashMap::len),
            "connection registered"
        );

        (handle, Mailbox { rx })
    }

    /// Removes the connection if still present. Safe to call more than once.
    pub async fn unregister(&self, handle: &ConnectionHandle) {
        let mut connections = self.connections.write().await;
        let Some(bucket) = connections.get_mut(&handle.user_id) else {
            return;
        };
        if bucket.remove(&handle.id).is_none() {
            return;
        }
        if bucket.is_empty() {
            connections.remove(&handle.user_id);
        }
        metrics::gauge!("ws_connections").decrement(1.0);

        tracing::info!(
            user_id = %handle.user_id,
            connection_id = %handle.id,
            "connection unregistered"
        );
    }

    /// Queues the serialized record on every live connection of the user.
    ///
    /// Never blocks on a consumer. Returns how many connections accepted it.
    pub async fn notify(&self, user_id: Uuid, notification: &Notification) -> usize {
        let payload: Payload = match serde_json::to_string(notification) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(error = %e, notification_id = %notification.id, "failed to serialize notification");
                return 0;
            }
        };

        let mut connections = self.connections.write().await;
        let Some(bucket) = connections.get_mut(&user_id) else {
            tracing::debug!(user_id = %user_id, "no live connections");
            return 0;
        };

        let mut delivered = 0;
        bucket.retain(|connection_id, tx| match tx.try_send(Arc::clone(&payload)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    user_id = %user_id,
                    connection_id = %connection_id,
                    "mailbox full, dropping slow consumer"
                );
                metrics::counter!("ws_slow_consumers_dropped_total").increment(1);
                metrics::gauge!("ws_connections").decrement(1.0);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                metrics::gauge!("ws_connections").decrement(1.0);
                false
            }
        });

        if bucket.is_empty() {
            connections.remove(&user_id);
        }
        delivered
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.connections.read().await.contains_key(&user_id)
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.connections.read().await.get(&user_id).map_or(0, HashMap::len)
    }

    pub async fn connected_users(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn total_connections(&self) -> usize {
        self.connections.read().await.values().map(HashMap::len).sum()
    }

    /// Drops every connection; each mailbox closes once drained.
    pub async fn shutdown(&self) {
        let mut connections = self.connections.write().await;
        let count: usize = connections.values().map(HashMap::len).sum();
        connections.clear();
        metrics::gauge!("ws_connections").set(0.0);
        tracing::info!(count, "closed all websocket connections");
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::notification::{ChannelType, Metadata};

    fn make_notification(user_id: Uuid, title: &str) -> Notification {
        Notification::new(
            user_id,
            ChannelType::InApp,
            "general".to_string(),
            title.to_string(),
            "body".to_string(),
            Metadata::new(),
        )
    }

    fn title_of(payload: &str) -> String {
        let value: serde_json::Value = serde_json::from_str(payload).unwrap();
        value["title"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_notify_fans_out_to_every_connection_in_order() {
        let hub = ConnectionHub::default();
        let user_id = Uuid::new_v4();
        let (_h1, mut m1) = hub.register(user_id).await;
        let (_h2, mut m2) = hub.register(user_id).await;

        assert_eq!(hub.notify(user_id, &make_notification(user_id, "first")).await, 2);
        assert_eq!(hub.notify(user_id, &make_notification(user_id, "second")).await, 2);

        for mailbox in [&mut m1, &mut m2] {
            assert_eq!(title_of(&mailbox.recv().await.unwrap()), "first");
            assert_eq!(title_of(&mailbox.recv().await.unwrap()), "second");
        }
    }

    #[tokio::test]
    async fn test_notify_without_connections_is_noop() {
        let hub = ConnectionHub::default();
        let user_id = Uuid::new_v4();

        assert_eq!(hub.notify(user_id, &make_notification(user_id, "x")).await, 0);
        assert!(!hub.is_online(user_id).await);
    }

    #[tokio::test]
    async fn test_other_users_do_not_receive() {
        let hub = ConnectionHub::default();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (_ha, mut ma) = hub.register(alice).await;
        let (_hb, _mb) = hub.register(bob).await;

        hub.notify(bob, &make_notification(bob, "for bob")).await;

        assert!(ma.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_only_that_connection() {
        let hub = ConnectionHub::new(2);
        let user_id = Uuid::new_v4();
        let (slow, mut slow_mailbox) = hub.register(user_id).await;
        let (_fast, mut fast_mailbox) = hub.register(user_id).await;

        hub.notify(user_id, &make_notification(user_id, "1")).await;
        hub.notify(user_id, &make_notification(user_id, "2")).await;
        // fast consumer keeps up
        fast_mailbox.recv().await.unwrap();
        fast_mailbox.recv().await.unwrap();

        assert_eq!(hub.notify(user_id, &make_notification(user_id, "3")).await, 1);
        assert_eq!(hub.connection_count(user_id).await, 1);

        // queued messages survive, then the mailbox reports closed
        assert_eq!(title_of(&slow_mailbox.recv().await.unwrap()), "1");
        assert_eq!(title_of(&slow_mailbox.recv().await.unwrap()), "2");
        assert!(slow_mailbox.recv().await.is_none());
        assert_eq!(title_of(&fast_mailbox.recv().await.unwrap()), "3");

        hub.unregister(&slow).await;
        assert_eq!(hub.connection_count(user_id).await, 1);
    }

    #[tokio::test]
    async fn test_last_dropped_connection_removes_user() {
        let hub = ConnectionHub::new(1);
        let user_id = Uuid::new_v4();
        let (_handle, _mailbox) = hub.register(user_id).await;

        hub.notify(user_id, &make_notification(user_id, "1")).await;
        hub.notify(user_id, &make_notification(user_id, "2")).await;

        assert!(!hub.is_online(user_id).await);
        assert_eq!(hub.connected_users().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = ConnectionHub::default();
        let user_id = Uuid::new_v4();
        let (first, _m1) = hub.register(user_id).await;
        let (_second, _m2) = hub.register(user_id).await;

        hub.unregister(&first).await;
        hub.unregister(&first).await;

        assert_eq!(hub.connection_count(user_id).await, 1);
        assert_eq!(hub.total_connections().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_last_connection_removes_bucket() {
        let hub = ConnectionHub::default();
        let user_id = Uuid::new_v4();
        let (handle, _mailbox) = hub.register(user_id).await;

        hub.unregister(&handle).await;

        assert!(!hub.is_online(user_id).await);
    }

    #[tokio::test]
    async fn test_next_batch_joins_queued_messages() {
        let hub = ConnectionHub::default();
        let user_id = Uuid::new_v4();
        let (_handle, mut mailbox) = hub.register(user_id).await;

        hub.notify(user_id, &make_notification(user_id, "a")).await;
        hub.notify(user_id, &make_notification(user_id, "b")).await;

        let batch = mailbox.next_batch().await.unwrap();
        let titles: Vec<String> = batch.split('\n').map(title_of).collect();
        assert_eq!(titles, vec!["a", "b"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_churn_leaves_registry_consistent() {
        const USERS: usize = 4;
        const CHURN_PER_USER: usize = 25;
        const NOTIFIES_PER_USER: usize = 20;

        let hub = Arc::new(ConnectionHub::new(1024));
        let users: Vec<Uuid> = (0..USERS).map(|_| Uuid::new_v4()).collect();

        let mut observers = Vec::new();
        for user_id in &users {
            observers.push(hub.register(*user_id).await);
        }

        let mut tasks = Vec::new();
        for user_id in users.clone() {
            for _ in 0..CHURN_PER_USER {
                let hub = hub.clone();
                tasks.push(tokio::spawn(async move {
                    let (handle, _mailbox) = hub.register(user_id).await;
                    tokio::task::yield_now().await;
                    hub.unregister(&handle).await;
                    hub.unregister(&handle).await;
                }));
            }
            for i in 0..NOTIFIES_PER_USER {
                let hub = hub.clone();
                tasks.push(tokio::spawn(async move {
                    hub.notify(user_id, &make_notification(user_id, &i.to_string())).await;
                }));
            }
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(hub.total_connections().await, USERS);
        assert_eq!(hub.connected_users().await, USERS);

        for (handle, mut mailbox) in observers {
            let mut received = 0;
            while let Ok(payload) = mailbox.rx.try_recv() {
                let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
                assert_eq!(value["user_id"], handle.user_id.to_string());
                received += 1;
            }
            assert_eq!(received, NOTIFIES_PER_USER);

            hub.unregister(&handle).await;
            assert!(!hub.is_online(handle.user_id).await);
        }

        assert_eq!(hub.total_connections().await, 0);
        assert_eq!(hub.connected_users().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_mailboxes() {
        let hub = ConnectionHub::default();
        let user_id = Uuid::new_v4();
        let (_handle, mut mailbox) = hub.register(user_id).await;

        hub.shutdown().await;

        assert!(mailbox.next_batch().await.is_none());
        assert_eq!(hub.total_connections().await, 0);
    }
}
