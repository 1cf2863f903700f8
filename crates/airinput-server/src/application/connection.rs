//! ClientConnection: one streaming client, split into a hub half and a
//! transport half.
//!
//! ```text
//!            ConnectionRegistry (hub task)              send loop (per connection)
//!            ────────────────────────────              ──────────────────────────
//!  ClientConnection ── outbox: mpsc::Sender ─────────►  Subscription.outbox: Receiver
//!                   ── close: CancellationToken ─────►  Subscription.closed
//!                   ── state: Arc<Mutex<State>> ◄────►  Subscription.state
//! ```
//!
//! The hub half ([`ClientConnection`]) is owned exclusively by the registry.
//! The transport half ([`Subscription`]) is handed to the stream that drains
//! the outbox.  The only state both halves touch is the lifecycle
//! [`ConnectionState`], which moves forward exactly once:
//!
//! ```text
//! Active ──► Closing ──► Closed
//! ```
//!
//! Every operation on a connection that is not `Active` is a no-op, so a
//! double close, or a send racing a close, needs no extra reasoning by callers.

use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use airinput_core::{Message, Origin};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opaque, process-unique connection identifier.
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
        write!(f, "client_{}", self.0.simple())
    }
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered; messages are delivered.
    Active,
    /// Close in progress; the outbox is being released.
    Closing,
    /// Terminal.
    Closed,
}

/// Why a message could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The outbox is at capacity: the consumer is stalled.
    Full,
    /// The connection is closed, or its consumer has gone away.
    Closed,
}

/// The hub-owned half of a connection.
#[derive(Debug)]
pub struct ClientConnection {
    id: ConnectionId,
    origin: Origin,
    client_ip: Option<IpAddr>,
    outbox: Option<mpsc::Sender<Message>>,
    state: Arc<Mutex<ConnectionState>>,
    close: CancellationToken,
}

/// The transport-facing half of a connection.
#[derive(Debug)]
pub struct Subscription {
    pub id: ConnectionId,
    pub origin: Origin,
    pub client_ip: Option<IpAddr>,
    pub outbox: mpsc::Receiver<Message>,
    pub closed: CancellationToken,
    state: Arc<Mutex<ConnectionState>>,
}

impl ClientConnection {
    /// Creates both halves of a new, `Active` connection.
    pub fn open(
        id: ConnectionId,
        origin: Origin,
        client_ip: Option<IpAddr>,
        outbox_capacity: usize,
    ) -> (Self, Subscription) {
        // tokio panics on a zero-capacity channel.
        let (tx, rx) = mpsc::channel(outbox_capacity.max(1));
        let state = Arc::new(Mutex::new(ConnectionState::Active));
        let close = CancellationToken::new();

        let conn = Self {
            id,
            origin,
            client_ip,
            outbox: Some(tx),
            state: Arc::clone(&state),
            close: close.clone(),
        };
        let sub = Subscription {
            id,
            origin,
            client_ip,
            outbox: rx,
            closed: close,
            state,
        };
        (conn, sub)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    pub fn state(&self) -> ConnectionState {
        read_state(&self.state)
    }

    /// Queues `message` without waiting.
    ///
    /// # Errors
    ///
    /// [`EnqueueError::Full`] when the consumer has fallen `capacity` messages
    /// behind; [`EnqueueError::Closed`] when the connection is no longer active.
    pub fn enqueue(&self, message: Message) -> Result<(), EnqueueError> {
        if self.state() != ConnectionState::Active {
            return Err(EnqueueError::Closed);
        }
        let outbox = self.outbox.as_ref().ok_or(EnqueueError::Closed)?;
        outbox.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Performs the single `Active → Closing → Closed` transition.
    ///
    /// Releases the outbox and fires the close signal.  Returns `false` if
    /// the connection had already left `Active`.
    pub fn close(&mut self) -> bool {
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if *state != ConnectionState::Active {
                return false;
            }
            *state = ConnectionState::Closing;
        }

        self.outbox = None;
        self.close.cancel();

        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = ConnectionState::Closed;
        true
    }
}

impl Subscription {
    /// `true` while the hub still considers this connection registered.
    pub fn is_active(&self) -> bool {
        read_state(&self.state) == ConnectionState::Active
    }
}

fn read_state(state: &Mutex<ConnectionState>) -> ConnectionState {
    *state.lock().unwrap_or_else(|p| p.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
