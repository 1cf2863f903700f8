//! ConnectionRegistry: the hub's client registry and broadcast policy.
//!
//! The registry is deliberately synchronous and `&mut self`: it is owned by a
//! single hub task (see `infrastructure::hub`) that applies register,
//! unregister, and broadcast commands one at a time.  Because only that task
//! can reach the registry, no lock guards it, and every mutation is observed
//! by later commands as one complete step.
//!
//! # Policies
//!
//! - **Mobile exclusivity**: at most one `Remote` connection may be
//!   registered.  A second remote registration is rejected *before* a
//!   connection is created, so a rejected request leaves nothing behind.
//! - **Drop slow consumers**: broadcasting never waits.  A connection whose
//!   outbox is full is closed and removed instead of stalling delivery to
//!   everyone else.
//! - **Derived notifications**: when a remote device appears or disappears,
//!   a `show_code` message is broadcast (hide the pairing code while a phone
//!   is connected).  When the number of local connections changes, the
//!   [`HubListener`] is told the new count.
//!
//! Derived notifications raised while a broadcast is in progress (because a
//! slow remote consumer was dropped) are queued and delivered after it, so
//! the registry never recurses into itself.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;

use airinput_core::{Message, Origin};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, ConnectionId, EnqueueError, Subscription};

/// Why a registration was refused.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// A remote device is already connected.
    #[error("a remote device is already connected")]
    AlreadyBusy,
}

/// Observer notified from inside the hub's serialized processing.
///
/// Implementations must return quickly: they run on the hub task.
pub trait HubListener: Send + Sync {
    /// The number of local (desktop) connections changed to `count`.
    fn local_count_changed(&self, count: usize);
}

/// A [`HubListener`] that writes each change to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl HubListener for LoggingListener {
    fn local_count_changed(&self, count: usize) {
        info!("desktop connections: {count}");
    }
}

/// Outcome of delivering one broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections that received the message.
    pub delivered: usize,
    /// Connections dropped because their outbox was full or gone.
    pub dropped: Vec<ConnectionId>,
}

/// Point-in-time view of the registry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub total: usize,
    pub local: usize,
    pub remote: usize,
}

/// Client registry with exclusivity and backpressure policies.
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ClientConnection>,
    outbox_capacity: usize,
    listener: Arc<dyn HubListener>,
    /// Derived notifications awaiting delivery.
    pending: VecDeque<Message>,
}

impl ConnectionRegistry {
    pub fn new(outbox_capacity: usize, listener: Arc<dyn HubListener>) -> Self {
        Self {
            connections: HashMap::new(),
            outbox_capacity,
            listener,
            pending: VecDeque::new(),
        }
    }

    /// Admits and registers a new connection under `id`.
    ///
    /// The caller picks the id so it can arrange an unregister before the
    /// registration is applied.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::AlreadyBusy`] if `origin` is remote and a remote
    /// connection is already registered.  Nothing is created in that case.
    pub fn register(
        &mut self,
        id: ConnectionId,
        origin: Origin,
        client_ip: Option<IpAddr>,
    ) -> Result<Subscription, AdmissionError> {
        if origin.is_remote() && self.has_remote() {
            warn!(
                "[{}] rejected {}: a remote device is already connected",
                origin.label(),
                display_ip(client_ip)
            );
            return Err(AdmissionError::AlreadyBusy);
        }

        let (conn, sub) = ClientConnection::open(id, origin, client_ip, self.outbox_capacity);
        self.connections.insert(conn.id(), conn);

        info!(
            "[{}] {} connected from {}, connections: {}",
            origin.label(),
            sub.id,
            display_ip(client_ip),
            self.connections.len()
        );

        match origin {
            Origin::Remote => self.pending.push_back(Message::show_code(false)),
            Origin::Local => {
                self.listener.local_count_changed(self.local_count());
                // A desktop joining while the phone is active must hide its code too.
                if self.has_remote() {
                    self.pending.push_back(Message::show_code(false));
                }
            }
        }
        self.flush();

        Ok(sub)
    }

    /// Removes a connection.  Unknown ids are ignored.
    ///
    /// Returns `true` if the connection was registered.
    pub fn unregister(&mut self, id: ConnectionId) -> bool {
        let removed = self.remove(id);
        self.flush();
        removed
    }

    /// Queues `message` on every registered connection without waiting.
    pub fn broadcast(&mut self, message: Message) -> BroadcastReport {
        let report = self.deliver(&message);
        self.flush();
        report
    }

    /// Closes and removes every connection.  Used on shutdown, so no
    /// `show_code` notification is sent.
    pub fn close_all(&mut self) -> usize {
        let count = self.connections.len();
        let had_local = self.local_count() > 0;
        for (_, mut conn) in self.connections.drain() {
            conn.close();
        }
        self.pending.clear();
        if had_local {
            self.listener.local_count_changed(0);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn has_remote(&self) -> bool {
        self.connections.values().any(|c| c.origin().is_remote())
    }

    pub fn local_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| !c.origin().is_remote())
            .count()
    }

    pub fn stats(&self) -> RegistryStats {
        let local = self.local_count();
        RegistryStats {
            total: self.connections.len(),
            local,
            remote: self.connections.len() - local,
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Closes and removes `id`, queueing any derived notifications.
    fn remove(&mut self, id: ConnectionId) -> bool {
        let Some(mut conn) = self.connections.remove(&id) else {
            return false;
        };
        conn.close();

        info!(
            "[{}] {} disconnected, connections: {}",
            conn.origin().label(),
            id,
            self.connections.len()
        );

        match conn.origin() {
            Origin::Remote => {
                if !self.has_remote() {
                    self.pending.push_back(Message::show_code(true));
                }
            }
            Origin::Local => self.listener.local_count_changed(self.local_count()),
        }
        true
    }

    /// Enqueues one message everywhere, dropping connections that cannot
    /// accept it.
    fn deliver(&mut self, message: &Message) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (id, conn) in &self.connections {
            match conn.enqueue(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(EnqueueError::Full) => {
                    warn!("{id}: outbox full, dropping slow consumer");
                    report.dropped.push(*id);
                }
                Err(EnqueueError::Closed) => {
                    debug!("{id}: consumer gone, removing");
                    report.dropped.push(*id);
                }
            }
        }

        for id in &report.dropped {
            self.remove(*id);
        }

        debug!(
            "broadcast {} to {} connection(s)",
            message.kind(),
            report.delivered
        );
        report
    }

    /// Delivers queued derived notifications, including any raised while
    /// delivering them.
    fn flush(&mut self) {
        while let Some(message) = self.pending.pop_front() {
            self.deliver(&message);
        }
    }
}

fn display_ip(ip: Option<IpAddr>) -> String {
    ip.map_or_else(|| "unknown".to_string(), |ip| ip.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use airinput_core::MessageKind;
    use std::sync::Mutex;

    // ── Test doubles ──────────────────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingListener {
        counts: Mutex<Vec<usize>>,
    }

    impl HubListener for RecordingListener {
        fn local_count_changed(&self, count: usize) {
            self.counts.lock().unwrap().push(count);
        }
    }

    fn make_registry(capacity: usize) -> (ConnectionRegistry, Arc<RecordingListener>) {
        let listener = Arc::new(RecordingListener::default());
        let registry = ConnectionRegistry::new(capacity, listener.clone());
        (registry, listener)
    }

    fn drain(sub: &mut Subscription) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(m) = sub.outbox.try_recv() {
            out.push(m);
        }
        out
    }

    fn lan_ip() -> Option<IpAddr> {
        Some("192.168.1.50".parse().unwrap())
    }

    // ── Admission ─────────────────────────────────────────────────────────────

    #[test]
    fn test_second_remote_is_rejected_and_registry_unchanged() {
        // Arrange
        let (mut reg, _l) = make_registry(8);
        let _phone = reg.register(ConnectionId::new(), Origin::Remote, lan_ip()).unwrap();
        let before = reg.stats();

        // Act
        let result = reg.register(ConnectionId::new(), Origin::Remote, lan_ip());

        // Assert
        assert_eq!(result.unwrap_err(), AdmissionError::AlreadyBusy);
        assert_eq!(reg.stats(), before);
    }

    #[test]
    fn test_many_locals_are_admitted() {
        let (mut reg, _l) = make_registry(8);
        for _ in 0..5 {
            reg.register(ConnectionId::new(), Origin::Local, None).unwrap();
        }
        assert_eq!(reg.local_count(), 5);
    }

    #[test]
    fn test_remote_admitted_again_after_previous_unregisters() {
        let (mut reg, _l) = make_registry(8);
        let phone = reg.register(ConnectionId::new(), Origin::Remote, lan_ip()).unwrap();
        reg.unregister(phone.id);
        assert!(reg.register(ConnectionId::new(), Origin::Remote, lan_ip()).is_ok());
    }

    // ── Unregister ────────────────────────────────────────────────────────────

    #[test]
    fn test_unregister_is_idempotent() {
        let (mut reg, _l) = make_registry(8);
        let sub = reg.register(ConnectionId::new(), Origin::Local, None).unwrap();
        assert!(reg.unregister(sub.id));
        assert!(!reg.unregister(sub.id));
        assert!(!reg.unregister(ConnectionId::new()));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_unregister_closes_the_subscription() {
        let (mut reg, _l) = make_registry(8);
        let sub = reg.register(ConnectionId::new(), Origin::Local, None).unwrap();
        reg.unregister(sub.id);
        assert!(!sub.is_active());
        assert!(sub.closed.is_cancelled());
    }

    // ── Broadcast ─────────────────────────────────────────────────────────────

    #[test]
    fn test_broadcast_reaches_every_connection_in_order() {
        let (mut reg, _l) = make_registry(8);
        let mut a = reg.register(ConnectionId::new(), Origin::Local, None).unwrap();
        let mut b = reg.register(ConnectionId::new(), Origin::Local, None).unwrap();

        reg.broadcast(Message::text("1"));
        reg.broadcast(Message::text("2"));

        for sub in [&mut a, &mut b] {
            let texts: Vec<_> = drain(sub)
                .into_iter()
                .filter(|m| m.kind() == MessageKind::Text)
                .map(|m| m.data().to_string())
                .collect();
            assert_eq!(texts, vec!["1", "2"]);
        }
    }

    #[test]
    fn test_broadcast_drops_connection_with_full_outbox() {
        // Arrange: capacity 1, and the slow consumer never drains.
        let (mut reg, _l) = make_registry(1);
        let slow = reg.register(ConnectionId::new(), Origin::Local, None).unwrap();
        let mut fast = reg.register(ConnectionId::new(), Origin::Local, None).unwrap();
        reg.broadcast(Message::text("fills"));
        drain(&mut fast);

        // Act
        let report = reg.broadcast(Message::text("overflows"));

        // Assert
        assert_eq!(report.dropped, vec![slow.id]);
        assert!(!reg.contains(slow.id));
        assert!(reg.contains(fast.id));
        assert!(slow.closed.is_cancelled());
    }

    #[test]
    fn test_broadcast_removes_connection_whose_consumer_went_away() {
        let (mut reg, _l) = make_registry(8);
        let sub = reg.register(ConnectionId::new(), Origin::Local, None).unwrap();
        let id = sub.id;
        drop(sub);

        let report = reg.broadcast(Message::text("x"));

        assert_eq!(report.delivered, 0);
        assert!(!reg.contains(id));
    }

    // ── Derived notifications ─────────────────────────────────────────────────

    #[test]
    fn test_remote_arrival_broadcasts_hide_code() {
        let (mut reg, _l) = make_registry(8);
        let mut desk = reg.register(ConnectionId::new(), Origin::Local, None).unwrap();

        let _phone = reg.register(ConnectionId::new(), Origin::Remote, lan_ip()).unwrap();

        assert_eq!(drain(&mut desk), vec![Message::show_code(false)]);
    }

    #[test]
    fn test_remote_departure_broadcasts_show_code() {
        let (mut reg, _l) = make_registry(8);
        let mut desk = reg.register(ConnectionId::new(), Origin::Local, None).unwrap();
        let phone = reg.register(ConnectionId::new(), Origin::Remote, lan_ip()).unwrap();
        drain(&mut desk);

        reg.unregister(phone.id);

        assert_eq!(drain(&mut desk), vec![Message::show_code(true)]);
    }

    #[test]
    fn test_desktop_joining_during_remote_session_gets_hide_code() {
        let (mut reg, _l) = make_registry(8);
        let _phone = reg.register(ConnectionId::new(), Origin::Remote, lan_ip()).unwrap();

        let mut late_desk = reg.register(ConnectionId::new(), Origin::Local, None).unwrap();

        assert_eq!(drain(&mut late_desk), vec![Message::show_code(false)]);
    }

    #[test]
    fn test_dropping_slow_remote_during_broadcast_then_shows_code() {
        // Arrange: the phone's outbox holds two messages and is never drained.
        let (mut reg, _l) = make_registry(2);
        let mut desk = reg.register(ConnectionId::new(), Origin::Local, None).unwrap();
        let phone = reg.register(ConnectionId::new(), Origin::Remote, lan_ip()).unwrap();
        drain(&mut desk);
        reg.broadcast(Message::text("a"));
        drain(&mut desk);

        // Act: the phone overflows and is dropped mid-broadcast.
        reg.broadcast(Message::text("b"));

        // Assert: the desktop sees the broadcast, then the derived show_code.
        assert!(!reg.contains(phone.id));
        assert_eq!(
            drain(&mut desk),
            vec![Message::text("b"), Message::show_code(true)]
        );
    }

    #[test]
    fn test_listener_sees_local_count_changes() {
        let (mut reg, listener) = make_registry(8);
        let a = reg.register(ConnectionId::new(), Origin::Local, None).unwrap();
        let _b = reg.register(ConnectionId::new(), Origin::Local, None).unwrap();
        let _phone = reg.register(ConnectionId::new(), Origin::Remote, lan_ip()).unwrap();
        reg.unregister(a.id);

        assert_eq!(*listener.counts.lock().unwrap(), vec![1, 2, 1]);
    }

    #[test]
    fn test_close_all_empties_registry_and_cancels_streams() {
        let (mut reg, listener) = make_registry(8);
        let a = reg.register(ConnectionId::new(), Origin::Local, None).unwrap();
        let b = reg.register(ConnectionId::new(), Origin::Remote, lan_ip()).unwrap();

        assert_eq!(reg.close_all(), 2);

        assert!(reg.is_empty());
        assert!(a.closed.is_cancelled());
        assert!(b.closed.is_cancelled());
        assert_eq!(listener.counts.lock().unwrap().last(), Some(&0));
    }
}
