//! In-memory backing store.
//!
//! Selected with `--dsn memory:`. Connections created from the same seed
//! share one logical store behind a lock, the way distinct network
//! connections share one database. Useful for development and for tests
//! that exercise the full authentication flows without Postgres.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::pool::ConnectionPool;
use super::{
    EmailKind, EmailProperties, StagedRecord, StoreConnection, StoreError, UserRecord,
};

#[derive(Default)]
struct State {
    /// Keyed by address; one row per owned email.
    users: HashMap<String, UserRecord>,
    staged: HashMap<Vec<u8>, StagedRecord>,
    next_user_id: i64,
}

/// One handle onto a shared in-memory store.
pub struct MemoryConnection {
    state: Arc<Mutex<State>>,
    closed: AtomicBool,
}

impl MemoryConnection {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            closed: AtomicBool::new(false),
        }
    }

    /// Another connection onto the same store.
    #[must_use]
    pub fn share(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

/// A pool of `size` connections sharing one in-memory store.
#[must_use]
pub fn memory_pool(size: usize) -> ConnectionPool {
    let seed = MemoryConnection::new();
    let mut connections: Vec<Arc<dyn StoreConnection>> = Vec::with_capacity(size.max(1));
    for _ in 1..size {
        connections.push(Arc::new(seed.share()));
    }
    connections.push(Arc::new(seed));
    ConnectionPool::new(connections)
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn lookup_user(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        self.check_open()?;
        let state = self.state.lock().await;
        Ok(state.users.get(email).cloned())
    }

    async fn create_user(
        &self,
        email: &str,
        password_hash: Option<&str>,
        kind: EmailKind,
        verified: bool,
    ) -> Result<i64, StoreError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        state.next_user_id += 1;
        let id = state.next_user_id;
        state.users.insert(
            email.to_string(),
            UserRecord {
                id,
                email: email.to_string(),
                password_hash: password_hash.map(str::to_string),
                verified,
                kind,
            },
        );
        Ok(id)
    }

    async fn list_emails(
        &self,
        user_id: i64,
    ) -> Result<BTreeMap<String, EmailProperties>, StoreError> {
        self.check_open()?;
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .filter(|user| user.id == user_id)
            .map(|user| {
                (
                    user.email.clone(),
                    EmailProperties {
                        kind: user.kind,
                        verified: user.verified,
                    },
                )
            })
            .collect())
    }

    async fn update_password(&self, user_id: i64, password_hash: &str) -> Result<(), StoreError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        for user in state.users.values_mut() {
            if user.id == user_id {
                user.password_hash = Some(password_hash.to_string());
            }
        }
        Ok(())
    }

    async fn mark_verified(&self, email: &str) -> Result<(), StoreError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        if let Some(user) = state.users.get_mut(email) {
            user.verified = true;
        }
        Ok(())
    }

    async fn insert_staged(&self, staged: StagedRecord) -> Result<(), StoreError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        state.staged.insert(staged.token_hash.clone(), staged);
        Ok(())
    }

    async fn consume_staged(&self, token_hash: &[u8]) -> Result<Option<StagedRecord>, StoreError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        Ok(state.staged.remove(token_hash))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_open()
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
