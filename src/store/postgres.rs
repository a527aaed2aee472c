//! Postgres-backed store connections.
//!
//! Each pooled slot owns one dedicated `PgConnection` behind a lock;
//! concurrent callers handed the same slot serialize on it. `sql/schema.sql`
//! carries the schema.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Connection, PgConnection, Row};
use tokio::sync::Mutex;
use tracing::Instrument;

use super::pool::ConnectionPool;
use super::{
    EmailKind, EmailProperties, StagedKind, StagedRecord, StoreConnection, StoreError, UserRecord,
};

pub struct PgStoreConnection {
    conn: Mutex<Option<PgConnection>>,
}

impl PgStoreConnection {
    /// Open one connection.
    ///
    /// # Errors
    ///
    /// Propagates the connect failure.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let conn = PgConnection::connect(dsn).await?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }
}

/// Open `size` independent connections and pool them.
///
/// # Errors
///
/// Fails on the first connection that cannot be established.
pub async fn connect_pool(dsn: &str, size: usize) -> Result<ConnectionPool, StoreError> {
    let mut connections: Vec<Arc<dyn StoreConnection>> = Vec::with_capacity(size);
    for _ in 0..size.max(1) {
        connections.push(Arc::new(PgStoreConnection::connect(dsn).await?));
    }
    Ok(ConnectionPool::new(connections))
}

fn query_span(operation: &'static str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[async_trait]
impl StoreConnection for PgStoreConnection {
    async fn lookup_user(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        let query = r"
            SELECT u.id, e.address, u.password_hash,
                   e.verified_at IS NOT NULL AS verified, e.kind
            FROM users u
            JOIN emails e ON e.user_id = u.id
            WHERE e.address = $1
        ";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(conn)
            .instrument(query_span("SELECT", query))
            .await?;

        row.map(|row| {
            let kind: String = row.get("kind");
            Ok(UserRecord {
                id: row.get("id"),
                email: row.get("address"),
                password_hash: row.get("password_hash"),
                verified: row.get("verified"),
                kind: EmailKind::parse(&kind).ok_or(StoreError::Corrupt("email kind"))?,
            })
        })
        .transpose()
    }

    async fn create_user(
        &self,
        email: &str,
        password_hash: Option<&str>,
        kind: EmailKind,
        verified: bool,
    ) -> Result<i64, StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        // User and address rows stay consistent even if the second insert
        // fails.
        let mut tx = conn.begin().await?;

        let insert_user = "INSERT INTO users (password_hash) VALUES ($1) RETURNING id";
        let row = sqlx::query(insert_user)
            .bind(password_hash)
            .fetch_one(&mut *tx)
            .instrument(query_span("INSERT", insert_user))
            .await?;
        let user_id: i64 = row.get("id");

        let insert_email = r"
            INSERT INTO emails (user_id, address, kind, verified_at)
            VALUES ($1, $2, $3, CASE WHEN $4 THEN now() ELSE NULL END)
        ";
        sqlx::query(insert_email)
            .bind(user_id)
            .bind(email)
            .bind(kind.as_str())
            .bind(verified)
            .execute(&mut *tx)
            .instrument(query_span("INSERT", insert_email))
            .await?;

        tx.commit().await?;
        Ok(user_id)
    }

    async fn list_emails(
        &self,
        user_id: i64,
    ) -> Result<BTreeMap<String, EmailProperties>, StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        let query = r"
            SELECT address, kind, verified_at IS NOT NULL AS verified
            FROM emails
            WHERE user_id = $1
        ";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(conn)
            .instrument(query_span("SELECT", query))
            .await?;

        let mut emails = BTreeMap::new();
        for row in rows {
            let kind: String = row.get("kind");
            emails.insert(
                row.get("address"),
                EmailProperties {
                    kind: EmailKind::parse(&kind).ok_or(StoreError::Corrupt("email kind"))?,
                    verified: row.get("verified"),
                },
            );
        }
        Ok(emails)
    }

    async fn update_password(&self, user_id: i64, password_hash: &str) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        let query = "UPDATE users SET password_hash = $2 WHERE id = $1";
        sqlx::query(query)
            .bind(user_id)
            .bind(password_hash)
            .execute(conn)
            .instrument(query_span("UPDATE", query))
            .await?;
        Ok(())
    }

    async fn mark_verified(&self, email: &str) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        let query = "UPDATE emails SET verified_at = now() WHERE address = $1";
        sqlx::query(query)
            .bind(email)
            .execute(conn)
            .instrument(query_span("UPDATE", query))
            .await?;
        Ok(())
    }

    async fn insert_staged(&self, staged: StagedRecord) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        let query = r"
            INSERT INTO staged (token_hash, email, kind, password_hash, site_origin, created_at_ms)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        sqlx::query(query)
            .bind(&staged.token_hash)
            .bind(&staged.email)
            .bind(staged.kind.as_str())
            .bind(&staged.password_hash)
            .bind(&staged.site_origin)
            .bind(staged.created_at_ms)
            .execute(conn)
            .instrument(query_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn consume_staged(&self, token_hash: &[u8]) -> Result<Option<StagedRecord>, StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        // DELETE .. RETURNING makes consumption atomic: the row exists for
        // exactly one caller.
        let query = r"
            DELETE FROM staged
            WHERE token_hash = $1
            RETURNING token_hash, email, kind, password_hash, site_origin, created_at_ms
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(conn)
            .instrument(query_span("DELETE", query))
            .await?;

        row.map(|row| {
            let kind: String = row.get("kind");
            Ok(StagedRecord {
                token_hash: row.get("token_hash"),
                email: row.get("email"),
                kind: StagedKind::parse(&kind).ok_or(StoreError::Corrupt("staged kind"))?,
                password_hash: row.get("password_hash"),
                site_origin: row.get("site_origin"),
                created_at_ms: row.get("created_at_ms"),
            })
        })
        .transpose()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        conn.ping().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;
        match guard.take() {
            Some(conn) => {
                conn.close().await?;
                Ok(())
            }
            // Already closed; draining twice is not an error.
            None => Ok(()),
        }
    }
}
