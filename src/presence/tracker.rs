use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::{ConnectionId, ConnectionRecord, Identity, PresenceEvent, Role};

/// Bounded outbound queue of a single hub connection.
pub type Outbox = mpsc::Sender<PresenceEvent>;

/// Everything guarded by the tracker lock. `privileged` is a secondary
/// index over `outboxes` and is only ever touched together with `records`.
#[derive(Default)]
struct Registry {
    records: HashMap<ConnectionId, ConnectionRecord>,
    outboxes: HashMap<ConnectionId, Outbox>,
    privileged: HashSet<ConnectionId>,
}

impl Registry {
    fn privileged_outboxes(&self) -> Vec<(ConnectionId, Outbox)> {
        self.privileged
            .iter()
            .filter_map(|id| self.outboxes.get(id).map(|tx| (*id, tx.clone())))
            .collect()
    }
}

/// Authoritative registry of identified hub connections.
///
/// Cloning is cheap; all clones share the same registry.
#[derive(Clone, Default)]
pub struct PresenceTracker {
    inner: Arc<Mutex<Registry>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A panic while holding the lock must not take the hub down with it.
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make a freshly opened socket addressable by id. Anonymous sockets are
    /// attached too; they just never get a record.
    pub fn attach(&self, connection_id: ConnectionId, outbox: Outbox) {
        self.lock().outboxes.insert(connection_id, outbox);
    }

    /// Track an identified connection and announce it to the privileged group.
    ///
    /// Re-registering an id overwrites the previous record.
    pub fn register(&self, connection_id: ConnectionId, identity: Identity) -> ConnectionRecord {
        let record = ConnectionRecord {
            connection_id,
            username: identity.username,
            role: identity.role,
            connected_at: Utc::now(),
        };

        let recipients = {
            let mut registry = self.lock();
            registry.records.insert(connection_id, record.clone());
            // Snapshot before joining so an admin is not told about itself.
            let recipients = registry.privileged_outboxes();
            if record.role.is_admin() {
                registry.privileged.insert(connection_id);
            } else {
                registry.privileged.remove(&connection_id);
            }
            recipients
        };

        tracing::info!(
            connection_id = %connection_id,
            username = %record.username,
            role = %record.role,
            observers = recipients.len(),
            "Connection registered"
        );

        fan_out(&recipients, &PresenceEvent::UserConnected(record.clone()));
        record
    }

    /// Forget a connection. Safe to call for ids that were never registered
    /// or were already removed; only tracked connections are announced.
    pub fn deregister(&self, connection_id: ConnectionId) -> Option<ConnectionRecord> {
        let (removed, recipients) = {
            let mut registry = self.lock();
            registry.outboxes.remove(&connection_id);
            registry.privileged.remove(&connection_id);
            let removed = registry.records.remove(&connection_id);
            let recipients = match removed {
                Some(_) => registry.privileged_outboxes(),
                None => Vec::new(),
            };
            (removed, recipients)
        };

        let record = removed?;

        tracing::info!(
            connection_id = %connection_id,
            username = %record.username,
            observers = recipients.len(),
            "Connection deregistered"
        );

        fan_out(
            &recipients,
            &PresenceEvent::UserDisconnected(record.username.clone()),
        );
        Some(record)
    }

    /// Roster snapshot for admins. Any other role gets `None` and nothing
    /// else happens.
    pub fn list_connected(&self, requesting_role: Role) -> Option<Vec<ConnectionRecord>> {
        if !requesting_role.is_admin() {
            return None;
        }
        Some(self.lock().records.values().cloned().collect())
    }

    /// Subscribe an attached connection to privileged broadcasts. Returns
    /// whether the connection is now a member.
    pub fn join_privileged_group(&self, connection_id: ConnectionId, requesting_role: Role) -> bool {
        if !requesting_role.is_admin() {
            return false;
        }
        let mut registry = self.lock();
        if !registry.outboxes.contains_key(&connection_id) {
            return false;
        }
        registry.privileged.insert(connection_id);
        true
    }

    pub fn is_privileged(&self, connection_id: ConnectionId) -> bool {
        self.lock().privileged.contains(&connection_id)
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<ConnectionRecord> {
        self.lock().records.get(&connection_id).cloned()
    }

    /// Number of identified connections.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }
}

/// Best-effort delivery. A full or closed queue drops the event for that
/// recipient only.
fn fan_out(recipients: &[(ConnectionId, Outbox)], event: &PresenceEvent) {
    for (connection_id, outbox) in recipients {
        match outbox.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    event = event.name(),
                    "Observer queue full, event dropped"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    event = event.name(),
                    "Observer already closed, event dropped"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::Receiver;

    fn attach(tracker: &PresenceTracker) -> (ConnectionId, Receiver<PresenceEvent>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(16);
        tracker.attach(id, tx);
        (id, rx)
    }

    fn drain(rx: &mut Receiver<PresenceEvent>) -> Vec<PresenceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_registry_tracks_live_connections() {
        let tracker = PresenceTracker::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let c = ConnectionId::new();

        tracker.register(a, Identity::new("alice", Role::Customer));
        tracker.register(b, Identity::new("bob", Role::Customer));
        tracker.register(c, Identity::new("carol", Role::Customer));
        assert!(tracker.deregister(b).is_some());

        let mut ids: Vec<_> = tracker
            .list_connected(Role::Admin)
            .unwrap()
            .into_iter()
            .map(|r| r.connection_id)
            .collect();
        ids.sort_by_key(|id| id.to_string());
        let mut expected = vec![a, c];
        expected.sort_by_key(|id| id.to_string());
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let tracker = PresenceTracker::new();
        let a = ConnectionId::new();
        tracker.register(a, Identity::new("alice", Role::Customer));

        assert!(tracker.deregister(ConnectionId::new()).is_none());
        assert_eq!(tracker.len(), 1);

        assert!(tracker.deregister(a).is_some());
        assert!(tracker.deregister(a).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_register_twice_last_write_wins() {
        let tracker = PresenceTracker::new();
        let a = ConnectionId::new();
        tracker.register(a, Identity::new("alice", Role::Customer));
        tracker.register(a, Identity::new("alice2", Role::Admin));

        assert_eq!(tracker.len(), 1);
        let record = tracker.get(a).unwrap();
        assert_eq!(record.username, "alice2");
        assert_eq!(record.role, Role::Admin);
    }

    #[test]
    fn test_list_connected_denied_for_customer() {
        let tracker = PresenceTracker::new();
        tracker.register(ConnectionId::new(), Identity::new("alice", Role::Customer));
        tracker.register(ConnectionId::new(), Identity::new("bob", Role::Admin));

        assert!(tracker.list_connected(Role::Customer).is_none());
        assert_eq!(tracker.list_connected(Role::Admin).unwrap().len(), 2);
    }

    #[test]
    fn test_admin_observes_later_connections() {
        let tracker = PresenceTracker::new();
        let (admin, mut admin_rx) = attach(&tracker);
        tracker.register(admin, Identity::new("root", Role::Admin));
        assert!(tracker.is_privileged(admin));
        assert!(drain(&mut admin_rx).is_empty());

        let (other, _other_rx) = attach(&tracker);
        let record = tracker.register(other, Identity::new("dave", Role::Customer));

        assert_eq!(drain(&mut admin_rx), vec![PresenceEvent::UserConnected(record)]);
    }

    #[test]
    fn test_deregistered_admin_gets_nothing_more() {
        let tracker = PresenceTracker::new();
        let (admin, mut admin_rx) = attach(&tracker);
        tracker.register(admin, Identity::new("root", Role::Admin));
        tracker.deregister(admin);
        assert!(!tracker.is_privileged(admin));

        let (other, _other_rx) = attach(&tracker);
        tracker.register(other, Identity::new("dave", Role::Customer));
        tracker.deregister(other);

        assert!(drain(&mut admin_rx).is_empty());
    }

    #[test]
    fn test_customers_receive_no_presence_events() {
        let tracker = PresenceTracker::new();
        let (customer, mut customer_rx) = attach(&tracker);
        tracker.register(customer, Identity::new("alice", Role::Customer));

        let (other, _other_rx) = attach(&tracker);
        tracker.register(other, Identity::new("erin", Role::Customer));
        tracker.deregister(other);

        assert!(drain(&mut customer_rx).is_empty());
    }

    #[test]
    fn test_alice_bob_carol_scenario() {
        let tracker = PresenceTracker::new();
        let (conn1, _rx1) = attach(&tracker);
        let (conn2, mut rx2) = attach(&tracker);
        let (conn3, _rx3) = attach(&tracker);

        tracker.register(conn1, Identity::new("alice", Role::Customer));
        tracker.register(conn2, Identity::new("bob", Role::Admin));
        let carol = tracker.register(conn3, Identity::new("carol", Role::Customer));

        assert_eq!(drain(&mut rx2), vec![PresenceEvent::UserConnected(carol)]);

        tracker.deregister(conn1);
        assert_eq!(
            drain(&mut rx2),
            vec![PresenceEvent::UserDisconnected("alice".to_string())]
        );

        let mut names: Vec<_> = tracker
            .list_connected(Role::Admin)
            .unwrap()
            .into_iter()
            .map(|r| r.username)
            .collect();
        names.sort();
        assert_eq!(names, vec!["bob".to_string(), "carol".to_string()]);
    }

    #[test]
    fn test_join_privileged_group_requires_admin() {
        let tracker = PresenceTracker::new();
        let (anon, mut anon_rx) = attach(&tracker);

        assert!(!tracker.join_privileged_group(anon, Role::Customer));
        assert!(!tracker.is_privileged(anon));

        assert!(tracker.join_privileged_group(anon, Role::Admin));
        assert!(tracker.is_privileged(anon));

        let record = tracker.register(ConnectionId::new(), Identity::new("frank", Role::Customer));
        assert_eq!(drain(&mut anon_rx), vec![PresenceEvent::UserConnected(record)]);
    }

    #[test]
    fn test_join_unattached_connection_is_noop() {
        let tracker = PresenceTracker::new();
        let id = ConnectionId::new();
        assert!(!tracker.join_privileged_group(id, Role::Admin));
        assert!(!tracker.is_privileged(id));
    }

    #[test]
    fn test_failed_delivery_does_not_block_others() {
        let tracker = PresenceTracker::new();

        // Closed observer
        let (closed, closed_rx) = attach(&tracker);
        tracker.register(closed, Identity::new("gone", Role::Admin));
        drop(closed_rx);

        // Saturated observer
        let stalled = ConnectionId::new();
        let (stalled_tx, mut stalled_rx) = mpsc::channel(1);
        tracker.attach(stalled, stalled_tx);
        tracker.register(stalled, Identity::new("slow", Role::Admin));

        let (healthy, mut healthy_rx) = attach(&tracker);
        tracker.register(healthy, Identity::new("fast", Role::Admin));

        for name in ["u1", "u2", "u3"] {
            tracker.register(ConnectionId::new(), Identity::new(name, Role::Customer));
        }

        // stalled saw "fast" first and then had no room left
        assert_eq!(drain(&mut stalled_rx).len(), 1);
        assert_eq!(drain(&mut healthy_rx).len(), 3);
        assert_eq!(tracker.len(), 6);
    }

    #[test]
    fn test_demoted_registration_leaves_group() {
        let tracker = PresenceTracker::new();
        let (id, _rx) = attach(&tracker);
        tracker.register(id, Identity::new("root", Role::Admin));
        assert!(tracker.is_privileged(id));

        tracker.register(id, Identity::new("root", Role::Customer));
        assert!(!tracker.is_privileged(id));
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let tracker = PresenceTracker::new();
        let a = ConnectionId::new();
        tracker.register(a, Identity::new("alice", Role::Customer));

        let poisoner = tracker.clone();
        let result = std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("panic while holding the registry lock");
        })
        .join();
        assert!(result.is_err());
        assert!(tracker.inner.is_poisoned());

        let b = ConnectionId::new();
        tracker.register(b, Identity::new("bob", Role::Admin));
        assert_eq!(tracker.list_connected(Role::Admin).unwrap().len(), 2);
        assert!(tracker.is_privileged(b));
        assert!(tracker.deregister(a).is_some());
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_register_deregister() {
        let tracker = PresenceTracker::new();
        let (admin, mut admin_rx) = {
            let id = ConnectionId::new();
            let (tx, rx) = mpsc::channel(1024);
            tracker.attach(id, tx);
            (id, rx)
        };
        tracker.register(admin, Identity::new("root", Role::Admin));

        let mut handles = Vec::new();
        for i in 0..32 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                let id = ConnectionId::new();
                tracker.register(id, Identity::new(format!("user{i}"), Role::Customer));
                if i % 2 == 0 {
                    tracker.deregister(id);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // admin + 16 survivors
        assert_eq!(tracker.len(), 17);
        // 32 connects + 16 disconnects
        assert_eq!(drain(&mut admin_rx).len(), 48);
    }
}
