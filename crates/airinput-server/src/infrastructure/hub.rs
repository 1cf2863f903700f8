//! The connection hub: a single task that owns the [`ConnectionRegistry`].
//!
//! ```text
//!  HTTP handlers ──┐
//!  send loops ─────┼──► mpsc::Sender<HubCommand> ──► hub task ──► ConnectionRegistry
//!  relay service ──┘        (bounded, FIFO)            (only owner)
//! ```
//!
//! Every register, unregister, broadcast, and close-all request becomes one
//! [`HubCommand`] on a single bounded queue.  The hub task applies them one at
//! a time, so the registry needs no lock and each command is fully applied
//! before the next is looked at.  Using one queue (instead of one per command
//! kind) keeps every producer's commands in the order it sent them: a handler
//! that registers and then broadcasts can never see its broadcast overtake
//! its registration.
//!
//! Callers talk to the task through a cloneable [`HubHandle`].  Requests that
//! need an answer (register, close-all, stats) carry a `oneshot` reply channel.
//!
//! A successful registration comes back as a [`Registration`], which owns an
//! [`UnregisterGuard`].  The guard is armed before the register request is
//! queued, so a caller that goes away at any point (while queueing, while
//! waiting for the reply, or after streaming) always leaves an unregister
//! behind its registration in the queue.

use std::net::IpAddr;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use airinput_core::{Message, Origin};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::connection::{ConnectionId, Subscription};
use crate::application::registry::{
    AdmissionError, ConnectionRegistry, HubListener, RegistryStats,
};
use crate::application::relay_service::Broadcaster;

/// Why a hub request failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// The admission policy refused the registration.
    #[error(transparent)]
    Rejected(#[from] AdmissionError),

    /// The hub task has stopped, or is shutting down.
    #[error("connection hub is not running")]
    Unavailable,
}

/// One request for the hub task.
#[derive(Debug)]
enum HubCommand {
    Register {
        id: ConnectionId,
        origin: Origin,
        client_ip: Option<IpAddr>,
        reply: oneshot::Sender<Result<Subscription, HubError>>,
    },
    Unregister(ConnectionId),
    Broadcast(Message),
    CloseAll {
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<RegistryStats>,
    },
}

/// Cloneable handle to the hub task.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

/// Unregisters a connection from the hub when dropped.
///
/// Unregistering an id the hub does not know is a no-op, so the guard fires
/// unconditionally.
#[derive(Debug)]
pub struct UnregisterGuard {
    hub: HubHandle,
    id: ConnectionId,
}

impl UnregisterGuard {
    pub fn new(hub: HubHandle, id: ConnectionId) -> Self {
        Self { hub, id }
    }
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        debug!("{}: released", self.id);
        self.hub.unregister_detached(self.id);
    }
}

/// A registered connection: its [`Subscription`] plus the guard that
/// unregisters it when dropped.
#[derive(Debug)]
pub struct Registration {
    sub: Subscription,
    guard: UnregisterGuard,
}

impl Registration {
    /// Splits the registration so the subscription's fields can be borrowed
    /// independently.  Keep the guard alive for as long as the connection.
    pub fn into_parts(self) -> (Subscription, UnregisterGuard) {
        (self.sub, self.guard)
    }
}

impl Deref for Registration {
    type Target = Subscription;

    fn deref(&self) -> &Subscription {
        &self.sub
    }
}

impl DerefMut for Registration {
    fn deref_mut(&mut self) -> &mut Subscription {
        &mut self.sub
    }
}

/// Spawns the hub task.
///
/// The task runs until every [`HubHandle`] has been dropped.
///
/// # Parameters
///
/// - `outbox_capacity`  – per-connection outbox size.
/// - `queue_capacity`   – size of the hub's command queue.
/// - `listener`         – told whenever the number of local connections changes.
pub fn spawn_hub(
    outbox_capacity: usize,
    queue_capacity: usize,
    listener: Arc<dyn HubListener>,
) -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(queue_capacity.max(1));
    let registry = ConnectionRegistry::new(outbox_capacity, listener);
    let task = tokio::spawn(run_hub(registry, rx));
    (HubHandle { commands: tx }, task)
}

impl HubHandle {
    /// Admits and registers a connection.
    ///
    /// # Errors
    ///
    /// - [`HubError::Rejected`] when a remote device is already connected.
    /// - [`HubError::Unavailable`] when the hub has stopped or has closed all
    ///   connections for shutdown.
    pub async fn register(
        &self,
        origin: Origin,
        client_ip: Option<IpAddr>,
    ) -> Result<Registration, HubError> {
        let id = ConnectionId::new();
        // Armed first: if this future is dropped after the request is queued,
        // the unregister lands behind it.
        let guard = UnregisterGuard::new(self.clone(), id);
        let (reply, answer) = oneshot::channel();
        self.send(HubCommand::Register {
            id,
            origin,
            client_ip,
            reply,
        })
        .await?;
        let sub = answer.await.map_err(|_| HubError::Unavailable)??;
        Ok(Registration { sub, guard })
    }

    /// Removes a connection.  Unknown ids are ignored by the hub.
    pub async fn unregister(&self, id: ConnectionId) {
        if self.send(HubCommand::Unregister(id)).await.is_err() {
            debug!("{id}: hub already stopped, nothing to unregister");
        }
    }

    /// Unregisters from a synchronous context, such as a `Drop` impl.
    ///
    /// Tries the queue without waiting.  If it is full, the send is handed to
    /// a new task on the current runtime.
    pub fn unregister_detached(&self, id: ConnectionId) {
        match self.commands.try_send(HubCommand::Unregister(id)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("{id}: hub already stopped, nothing to unregister");
            }
            Err(mpsc::error::TrySendError::Full(cmd)) => {
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        let commands = self.commands.clone();
                        runtime.spawn(async move {
                            let _ = commands.send(cmd).await;
                        });
                    }
                    Err(_) => warn!("{id}: hub queue full and no runtime, unregister lost"),
                }
            }
        }
    }

    /// Queues `message` for every registered connection.
    pub async fn broadcast(&self, message: Message) {
        let kind = message.kind();
        if self.send(HubCommand::Broadcast(message)).await.is_err() {
            debug!("hub stopped, {kind} broadcast discarded");
        }
    }

    /// Closes every connection and refuses new registrations.
    ///
    /// Returns how many connections were closed (0 if the hub has stopped).
    pub async fn close_all(&self) -> usize {
        let (reply, answer) = oneshot::channel();
        if self.send(HubCommand::CloseAll { reply }).await.is_err() {
            return 0;
        }
        answer.await.unwrap_or(0)
    }

    /// Current connection counts.
    ///
    /// # Errors
    ///
    /// [`HubError::Unavailable`] when the hub task has stopped.
    pub async fn stats(&self) -> Result<RegistryStats, HubError> {
        let (reply, answer) = oneshot::channel();
        self.send(HubCommand::Stats { reply }).await?;
        answer.await.map_err(|_| HubError::Unavailable)
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Unavailable)
    }
}

#[async_trait]
impl Broadcaster for HubHandle {
    async fn broadcast(&self, message: Message) {
        HubHandle::broadcast(self, message).await;
    }
}

// ── Hub task ──────────────────────────────────────────────────────────────────

/// Applies commands in arrival order until every sender is gone.
async fn run_hub(mut registry: ConnectionRegistry, mut commands: mpsc::Receiver<HubCommand>) {
    debug!("connection hub started");
    // Set by CloseAll; later registrations are refused so a request racing
    // shutdown cannot leave an orphan stream behind.
    let mut closed = false;

    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register {
                id,
                origin,
                client_ip,
                reply,
            } => {
                let result = if closed {
                    Err(HubError::Unavailable)
                } else {
                    registry.register(id, origin, client_ip).map_err(HubError::from)
                };
                // A requester that gave up has already queued its unregister.
                let _ = reply.send(result);
            }
            HubCommand::Unregister(id) => {
                registry.unregister(id);
            }
            HubCommand::Broadcast(message) => {
                registry.broadcast(message);
            }
            HubCommand::CloseAll { reply } => {
                closed = true;
                let count = registry.close_all();
                info!("closed {count} connection(s)");
                let _ = reply.send(count);
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(registry.stats());
            }
        }
    }

    registry.close_all();
    debug!("connection hub stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
