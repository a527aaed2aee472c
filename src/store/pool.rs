//! Round-robin pool of backing-store connections.
//!
//! The simplest possible distribution policy: a fixed set of connections and
//! an atomically cycling index. No queuing, no health checks, no
//! backpressure. Callers issue one operation per acquisition and must not
//! assume session affinity; the same connection may be in use by several
//! callers at once.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use super::{StoreConnection, StoreError};

/// Default number of pooled connections.
pub const DEFAULT_POOL_SIZE: usize = 50;

pub struct ConnectionPool {
    connections: Vec<Arc<dyn StoreConnection>>,
    next: AtomicUsize,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Build a pool over a fixed, non-empty set of connections.
    ///
    /// # Panics
    ///
    /// Panics if `connections` is empty; a pool with nothing to hand out is
    /// a configuration bug, not a runtime condition.
    #[must_use]
    pub fn new(connections: Vec<Arc<dyn StoreConnection>>) -> Self {
        assert!(!connections.is_empty(), "connection pool must not be empty");
        Self {
            connections,
            next: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Next connection in cyclic order.
    ///
    /// The counter wraps on overflow, which only perturbs the cycle once per
    /// `usize::MAX` acquisitions.
    #[must_use]
    pub fn acquire(&self) -> Arc<dyn StoreConnection> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        Arc::clone(&self.connections[index])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Liveness probe against whichever connection is next in line.
    ///
    /// # Errors
    ///
    /// Propagates the connection's ping failure.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.acquire().ping().await
    }

    /// Drain the pool: close every connection, then report once.
    ///
    /// Every connection is attempted even when earlier ones fail; the first
    /// observed error wins and later ones are only logged. A second call is
    /// a no-op. Callers get exactly one completion either way.
    ///
    /// # Errors
    ///
    /// Returns the first close failure, after all connections were given the
    /// chance to close.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("pool shutdown requested twice; ignoring");
            return Ok(());
        }

        let results = join_all(self.connections.iter().map(|conn| conn.close())).await;

        let mut first_error = None;
        for result in results {
            match result {
                Ok(()) => {}
                Err(err) if first_error.is_none() => first_error = Some(err),
                Err(err) => warn!("additional connection close failure: {err}"),
            }
        }

        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}
