use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use compilify_core::error::CoreError;
use compilify_core::job::CompletionEvent;
use compilify_core::types::{ConnectionId, JobId, Timestamp};
use tokio::sync::{mpsc, RwLock};

use crate::ws::protocol::{OutboundFrame, ServerMessage};

/// Channel sender half for pushing frames to a connection's socket task.
pub type OutboundSender = mpsc::UnboundedSender<OutboundFrame>;

/// Receiver half, drained by the connection's own sender task.
pub type OutboundReceiver = mpsc::UnboundedReceiver<OutboundFrame>;

/// Handle returned by [`ConnectionRegistry::register`].
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    /// Frames queued for this connection: replies, pushed results, pings.
    pub outbound: OutboundReceiver,
}

/// Metadata for a single live connection.
struct ConnectionEntry {
    sender: OutboundSender,
    connected_at: Timestamp,
    /// Outstanding jobs owned by this connection.
    jobs: HashSet<JobId>,
}

enum CorrelationState {
    /// Added but not yet announced to the client. A completion arriving now
    /// is parked until the `accepted` frame has been queued.
    Pending { parked: Option<CompletionEvent> },
    /// The client has been told the job id.
    Confirmed,
}

/// The registry's record linking a job to its owning connection.
struct CorrelationEntry {
    owner: ConnectionId,
    submitted_at: Timestamp,
    /// Set when the owner unregisters; drives the orphan sweep.
    orphaned_since: Option<Instant>,
    state: CorrelationState,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    jobs: HashMap<JobId, CorrelationEntry>,
    admissions_closed: bool,
}

impl RegistryInner {
    /// Drop the correlation for `job_id` and detach it from its owner.
    fn remove_job(&mut self, job_id: &JobId) -> Option<CorrelationEntry> {
        let entry = self.jobs.remove(job_id)?;
        if let Some(conn) = self.connections.get_mut(&entry.owner) {
            conn.jobs.remove(job_id);
        }
        Some(entry)
    }

    /// Remove a connection and start the grace clock on its jobs.
    fn detach_connection(&mut self, conn_id: &ConnectionId, now: Instant) -> Option<ConnectionEntry> {
        let conn = self.connections.remove(conn_id)?;
        for job_id in &conn.jobs {
            if let Some(entry) = self.jobs.get_mut(job_id) {
                entry.orphaned_since = Some(now);
            }
        }
        Some(conn)
    }
}

/// What happened to a completion handed to
/// [`ConnectionRegistry::claim_for_delivery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Pushed to the owner's outbound queue; correlation removed.
    Delivered(ConnectionId),
    /// The owner has not been told the job id yet; the completion is held
    /// and flushed right after the `accepted` frame.
    Parked(ConnectionId),
    /// The owner is gone; correlation removed, completion discarded.
    Orphaned(ConnectionId),
    /// No correlation: already delivered, swept, or never ours.
    Unknown,
}

/// Tracks every open client connection and the jobs each one is waiting on.
///
/// All state sits behind one `RwLock`, so every mutation is atomic with
/// respect to every other and readers never observe a half-written entry.
/// Pushes are non-blocking enqueues, so the write lock is never held across
/// client I/O. Designed to be wrapped in `Arc` and shared by all connection
/// tasks and the completion relay.
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the receiver half of the connection's outbound queue so the
    /// caller can forward frames to the socket.
    pub async fn register(&self, conn_id: ConnectionId) -> Result<Connection, CoreError> {
        let mut inner = self.inner.write().await;
        if inner.admissions_closed {
            return Err(CoreError::Unavailable("relay is shutting down".into()));
        }
        if inner.connections.contains_key(&conn_id) {
            return Err(CoreError::DuplicateConnection(conn_id));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        inner.connections.insert(
            conn_id,
            ConnectionEntry {
                sender: tx,
                connected_at: chrono::Utc::now(),
                jobs: HashSet::new(),
            },
        );
        tracing::debug!(conn_id = %conn_id, "Connection registered");

        Ok(Connection {
            id: conn_id,
            outbound: rx,
        })
    }

    /// Remove a connection.
    ///
    /// Its job correlations stay in place so completions arriving shortly
    /// after the disconnect are still recognised; they are purged by the
    /// relay on delivery or by [`sweep_orphans`](Self::sweep_orphans).
    /// Returns `false` if the connection was not registered.
    pub async fn unregister(&self, conn_id: &ConnectionId) -> bool {
        let mut inner = self.inner.write().await;
        match inner.detach_connection(conn_id, Instant::now()) {
            Some(conn) => {
                let connected_for = chrono::Utc::now() - conn.connected_at;
                tracing::debug!(
                    conn_id = %conn_id,
                    outstanding = conn.jobs.len(),
                    connected_secs = connected_for.num_seconds(),
                    "Connection unregistered",
                );
                true
            }
            None => false,
        }
    }

    /// Whether `conn_id` is currently registered.
    pub async fn is_live(&self, conn_id: &ConnectionId) -> bool {
        self.inner.read().await.connections.contains_key(conn_id)
    }

    /// Record that `conn_id` owns `job_id`.
    ///
    /// The job starts out pending; call [`confirm_job`](Self::confirm_job)
    /// once it has been published.
    pub async fn add_job(&self, conn_id: &ConnectionId, job_id: JobId) -> Result<(), CoreError> {
        let mut inner = self.inner.write().await;
        if inner.admissions_closed {
            return Err(CoreError::Unavailable("relay is shutting down".into()));
        }
        if !inner.connections.contains_key(conn_id) {
            return Err(CoreError::UnknownConnection(*conn_id));
        }
        if inner.jobs.contains_key(&job_id) {
            return Err(CoreError::DuplicateJob(job_id));
        }
        if let Some(conn) = inner.connections.get_mut(conn_id) {
            conn.jobs.insert(job_id);
        }

        inner.jobs.insert(
            job_id,
            CorrelationEntry {
                owner: *conn_id,
                submitted_at: chrono::Utc::now(),
                orphaned_since: None,
                state: CorrelationState::Pending { parked: None },
            },
        );
        Ok(())
    }

    /// Announce a published job to its owner.
    ///
    /// Queues the `accepted` frame, then any completion that was parked while
    /// the job was pending. Returns `false` if the correlation no longer
    /// exists.
    pub async fn confirm_job(&self, job_id: &JobId, request_id: Option<String>) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.jobs.get_mut(job_id) else {
            return false;
        };
        let owner = entry.owner;
        let parked = match std::mem::replace(&mut entry.state, CorrelationState::Confirmed) {
            CorrelationState::Pending { parked } => parked,
            CorrelationState::Confirmed => None,
        };

        let Some(conn) = inner.connections.get(&owner) else {
            // Owner left while the publish was in flight.
            if parked.is_some() {
                inner.remove_job(job_id);
            }
            return true;
        };

        let _ = conn.sender.send(OutboundFrame::Push(ServerMessage::Accepted {
            request_id,
            job_id: *job_id,
        }));

        if let Some(event) = parked {
            let _ = conn.sender.send(OutboundFrame::Push(event.into()));
            inner.remove_job(job_id);
            tracing::debug!(conn_id = %owner, job_id = %job_id, "Flushed parked completion");
        }
        true
    }

    /// Look up the connection that owns `job_id`.
    pub async fn resolve_owner(&self, job_id: &JobId) -> Option<ConnectionId> {
        self.inner.read().await.jobs.get(job_id).map(|e| e.owner)
    }

    /// Drop the correlation for `job_id`. Returns `false` if there was none.
    pub async fn remove_job(&self, job_id: &JobId) -> bool {
        self.inner.write().await.remove_job(job_id).is_some()
    }

    /// Resolve, push, and remove in one atomic step.
    ///
    /// A replayed completion finds no correlation and yields
    /// [`DeliveryOutcome::Unknown`], so each job is pushed at most once.
    pub async fn claim_for_delivery(&self, event: CompletionEvent) -> DeliveryOutcome {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let job_id = event.job_id;

        let Some(entry) = inner.jobs.get_mut(&job_id) else {
            return DeliveryOutcome::Unknown;
        };
        let owner = entry.owner;

        let Some(conn) = inner.connections.get(&owner) else {
            inner.remove_job(&job_id);
            return DeliveryOutcome::Orphaned(owner);
        };

        if let CorrelationState::Pending { parked } = &mut entry.state {
            if parked.is_some() {
                return DeliveryOutcome::Unknown;
            }
            *parked = Some(event);
            return DeliveryOutcome::Parked(owner);
        }

        let sent = conn.sender.send(OutboundFrame::Push(event.into())).is_ok();
        inner.remove_job(&job_id);

        if sent {
            DeliveryOutcome::Delivered(owner)
        } else {
            // The socket task already exited but has not unregistered yet.
            DeliveryOutcome::Orphaned(owner)
        }
    }

    /// Queue a frame for one connection. Returns `false` if it is not live.
    pub async fn send_to(&self, conn_id: &ConnectionId, message: ServerMessage) -> bool {
        self.inner
            .read()
            .await
            .connections
            .get(conn_id)
            .is_some_and(|conn| conn.sender.send(OutboundFrame::Push(message)).is_ok())
    }

    /// Remove correlations whose owner disconnected at least `grace` ago.
    ///
    /// Returns the number of correlations removed.
    pub async fn sweep_orphans(&self, grace: Duration) -> usize {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let expired: Vec<JobId> = inner
            .jobs
            .iter()
            .filter(|(_, entry)| {
                entry
                    .orphaned_since
                    .is_some_and(|since| now.duration_since(since) >= grace)
            })
            .map(|(id, _)| *id)
            .collect();

        for job_id in &expired {
            if let Some(entry) = inner.remove_job(job_id) {
                let age = chrono::Utc::now() - entry.submitted_at;
                tracing::debug!(
                    job_id = %job_id,
                    owner = %entry.owner,
                    age_secs = age.num_seconds(),
                    "Swept orphaned job",
                );
            }
        }
        expired.len()
    }

    /// Outstanding jobs owned by `conn_id`.
    pub async fn outstanding_for(&self, conn_id: &ConnectionId) -> Vec<JobId> {
        self.inner
            .read()
            .await
            .connections
            .get(conn_id)
            .map(|conn| conn.jobs.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Return the current number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Number of correlation entries, including orphans awaiting the sweep.
    pub async fn outstanding_jobs(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    /// Number of outstanding jobs whose owner is still connected.
    pub async fn deliverable_jobs(&self) -> usize {
        self.inner
            .read()
            .await
            .connections
            .values()
            .map(|conn| conn.jobs.len())
            .sum()
    }

    /// Refuse new connections and new jobs from now on.
    pub async fn close_admissions(&self) {
        self.inner.write().await.admissions_closed = true;
        tracing::info!("Registry closed to new connections and jobs");
    }

    pub async fn is_accepting(&self) -> bool {
        !self.inner.read().await.admissions_closed
    }

    /// Send a Ping frame to every connection.
    ///
    /// Used by the heartbeat task to keep connections alive and detect
    /// stale ones.
    pub async fn ping_all(&self) {
        let inner = self.inner.read().await;
        for conn in inner.connections.values() {
            let _ = conn.sender.send(OutboundFrame::Ping);
        }
    }

    /// Send a Close frame to every connection, then unregister them all.
    ///
    /// Used during graceful shutdown.
    pub async fn close_all(&self) {
        let mut inner = self.inner.write().await;
        let ids: Vec<ConnectionId> = inner.connections.keys().copied().collect();
        let now = Instant::now();
        for conn_id in &ids {
            if let Some(conn) = inner.detach_connection(conn_id, now) {
                let _ = conn.sender.send(OutboundFrame::Close);
            }
        }
        tracing::info!(count = ids.len(), "Closed all client connections");
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
