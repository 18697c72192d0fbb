//! Bounded pool of directory sessions.
//!
//! Connections are created lazily up to `max_connections`. Released connections are kept on a
//! LIFO idle stack while fewer than `min_idle` are idle; everything else is dropped. The pool
//! lock only guards bookkeeping and is never held across an `.await`.
//!
//! A reset starts a new generation: idle connections are closed at once and connections lent
//! out earlier are destroyed when released, so they keep counting against `max_connections`
//! until then.

use crate::{
    session::{LdapConnector, LdapEntry, LdapSession, NewEntry, SearchScope},
    Result,
};
use adprov_core::{ConnectionId, Error, PoolConfig};
use async_trait::async_trait;
use serde::Serialize;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Connections parked on the idle stack.
    pub idle: usize,
    /// Connections currently lent out.
    pub outstanding: usize,
    /// Configured ceiling.
    pub max_connections: usize,
    /// Whether the pool has been shut down.
    pub closed: bool,
}

struct IdleConnection {
    id: ConnectionId,
    created_at: Instant,
    generation: u64,
    session: Box<dyn LdapSession>,
}

struct PoolState {
    idle: Vec<IdleConnection>,
    outstanding: usize,
    closed: bool,
    generation: u64,
}

struct PoolShared {
    state: Mutex<PoolState>,
    min_idle: usize,
    max_connections: usize,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded pool of directory sessions to one endpoint.
pub struct ConnectionPool {
    connector: Arc<dyn LdapConnector>,
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Creates an empty pool; no connection is opened until the first acquire.
    #[must_use]
    pub fn new(connector: Arc<dyn LdapConnector>, config: PoolConfig) -> Self {
        Self {
            connector,
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    idle: Vec::with_capacity(config.min_idle),
                    outstanding: 0,
                    closed: false,
                    generation: 0,
                }),
                min_idle: config.min_idle,
                max_connections: config.max_connections,
            }),
        }
    }

    /// Lends a connection, reusing the most recently released healthy one when possible.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolClosed`] after shutdown, [`Error::PoolExhausted`] when every slot
    /// is lent out, or the connector's error when a new session cannot be opened.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let slot = self.reserve()?;

        loop {
            let candidate = self.shared.lock().idle.pop();
            let Some(mut idle) = candidate else {
                break;
            };
            if idle.session.is_alive() {
                debug!(connection_id = %idle.id, "reusing idle directory connection");
                return Ok(slot.lend(idle.id, idle.created_at, idle.generation, idle.session));
            }
            warn!(connection_id = %idle.id, "discarding dead idle directory connection");
        }

        self.open(slot).await
    }

    /// Lends a newly opened connection, bypassing the idle stack.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionPool::acquire`].
    pub async fn acquire_fresh(&self) -> Result<PooledConnection> {
        let slot = self.reserve()?;
        self.open(slot).await
    }

    /// Shuts the pool down and closes every idle connection. Idempotent.
    ///
    /// Connections still lent out are dropped when their borrowers release them.
    pub async fn destroy_all(&self) {
        let drained = {
            let mut state = self.shared.lock();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        close_idle(drained, "shutdown").await;
    }

    /// Closes every idle connection and reopens the pool.
    ///
    /// Also reopens a pool shut down by [`ConnectionPool::destroy_all`].
    /// Connections lent out before the reset are never parked again; their slots stay taken
    /// until the borrowers release them.
    pub async fn reset(&self) {
        let drained = {
            let mut state = self.shared.lock();
            state.generation += 1;
            state.closed = false;
            std::mem::take(&mut state.idle)
        };
        close_idle(drained, "reset").await;
    }

    /// Returns a snapshot of pool occupancy.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock();
        PoolStatus {
            idle: state.idle.len(),
            outstanding: state.outstanding,
            max_connections: self.shared.max_connections,
            closed: state.closed,
        }
    }

    fn reserve(&self) -> Result<SlotReservation> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(Error::PoolClosed);
        }
        if state.outstanding >= self.shared.max_connections {
            warn!(
                outstanding = state.outstanding,
                max = self.shared.max_connections,
                "directory connection pool exhausted"
            );
            return Err(Error::PoolExhausted {
                outstanding: state.outstanding,
                max: self.shared.max_connections,
            });
        }
        state.outstanding += 1;
        Ok(SlotReservation {
            shared: Some(Arc::clone(&self.shared)),
            generation: state.generation,
        })
    }

    async fn open(&self, slot: SlotReservation) -> Result<PooledConnection> {
        let session = match self.connector.connect().await {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "failed to open directory connection");
                return Err(err);
            }
        };
        let id = ConnectionId::new_v4();
        debug!(connection_id = %id, "opened directory connection");
        let generation = slot.generation;
        Ok(slot.lend(id, Instant::now(), generation, session))
    }
}

async fn close_idle(drained: Vec<IdleConnection>, reason: &'static str) {
    if drained.is_empty() {
        return;
    }

    info!(count = drained.len(), reason, "closing idle directory connections");
    for mut idle in drained {
        if let Err(err) = idle.session.close().await {
            debug!(connection_id = %idle.id, error = %err, reason, "close failed");
        }
    }
}

/// Counted slot that is handed back unless it is turned into a [`PooledConnection`].
struct SlotReservation {
    shared: Option<Arc<PoolShared>>,
    generation: u64,
}

impl SlotReservation {
    fn lend(
        mut self,
        id: ConnectionId,
        created_at: Instant,
        generation: u64,
        session: Box<dyn LdapSession>,
    ) -> PooledConnection {
        // The slot moves into the connection; the connection's drop releases it.
        let shared = self.shared.take();
        PooledConnection {
            id,
            created_at,
            generation,
            session,
            broken: false,
            shared,
        }
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            let mut state = shared.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
        }
    }
}

/// A connection lent out by [`ConnectionPool`]; dropping it returns it to the pool.
pub struct PooledConnection {
    id: ConnectionId,
    created_at: Instant,
    generation: u64,
    session: Box<dyn LdapSession>,
    broken: bool,
    shared: Option<Arc<PoolShared>>,
}

impl PooledConnection {
    /// Correlation id of the underlying session.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Time since the session was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Marks the session unusable so release destroys it instead of parking it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Returns true once [`PooledConnection::mark_broken`] has been called.
    #[must_use]
    pub const fn is_broken(&self) -> bool {
        self.broken
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl Deref for PooledConnection {
    type Target = dyn LdapSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        let mut session = std::mem::replace(&mut self.session, Box::new(DetachedSession));
        let healthy = !self.broken && session.is_alive();

        let mut state = shared.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        let current = self.generation == state.generation;
        if healthy && current && !state.closed && state.idle.len() < shared.min_idle {
            state.idle.push(IdleConnection {
                id: self.id,
                created_at: self.created_at,
                generation: self.generation,
                session,
            });
            debug!(connection_id = %self.id, "directory connection returned to pool");
            return;
        }
        drop(state);

        debug!(
            connection_id = %self.id,
            broken = self.broken,
            stale = !current,
            "destroying directory connection on release"
        );
        drop(session);
    }
}

/// Stand-in left behind once a lent session has been handed back.
struct DetachedSession;

#[async_trait]
impl LdapSession for DetachedSession {
    async fn simple_bind(&mut self, _dn: &str, _password: &str) -> Result<()> {
        Err(Error::PoolClosed)
    }

    async fn search(
        &mut self,
        _base_dn: &str,
        _scope: SearchScope,
        _filter: &str,
        _attributes: &[&'static str],
    ) -> Result<Vec<LdapEntry>> {
        Err(Error::PoolClosed)
    }

    async fn add(&mut self, _entry: &NewEntry) -> Result<()> {
        Err(Error::PoolClosed)
    }

    async fn deauthenticate(&mut self) -> Result<()> {
        Err(Error::PoolClosed)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        false
    }
}
