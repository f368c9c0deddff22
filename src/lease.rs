//! Namespace leases - at most one import run owns a namespace at a time
//!
//! A lease names the run (`run_id`), who started it (`holder`) and when it
//! lapses. Acquiring a namespace whose lease is live fails fast with
//! [`Error::RunInProgress`]; an expired lease is taken over. A long run
//! renews its lease between phases so it never lapses mid-write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use crate::storage::SqliteStore;
use crate::{Error, Result};

/// Ownership record of a namespace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lease {
    pub namespace: String,
    pub run_id: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    fn new(namespace: &str, run_id: &str, holder: &str, ttl: Duration) -> Self {
        let acquired_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            namespace: namespace.to_string(),
            run_id: run_id.to_string(),
            holder: holder.to_string(),
            acquired_at,
            expires_at: acquired_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// The same lease, lapsing `ttl` from now
    fn renewed(&self, ttl: Duration) -> Self {
        let fresh = Lease::new(&self.namespace, &self.run_id, &self.holder, ttl);
        Self {
            acquired_at: self.acquired_at,
            ..fresh
        }
    }

    /// Whether `other` blocks this lease: a live lease of another run
    fn blocked_by(&self, other: &Lease) -> bool {
        other.run_id != self.run_id && !other.is_expired(Utc::now())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    fn conflict(&self) -> Error {
        Error::RunInProgress {
            namespace: self.namespace.clone(),
            holder: format!("{} ({})", self.run_id, self.holder),
        }
    }
}

/// Registry of namespace leases
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take the namespace for `run_id`, or fail with `RunInProgress`
    async fn acquire(&self, namespace: &str, run_id: &str, holder: &str, ttl: Duration) -> Result<Lease>;

    /// Push the expiry of a held lease `ttl` into the future. Fails with
    /// `RunInProgress` when another run has taken the namespace over.
    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease>;

    /// Give the namespace back. Releasing a lease owned by another run is a no-op.
    async fn release(&self, lease: &Lease) -> Result<()>;

    /// Live lease of a namespace, if any
    async fn current(&self, namespace: &str) -> Result<Option<Lease>>;
}

/// Process-local lease registry
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    leases: Mutex<HashMap<String, Lease>>,
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn acquire(&self, namespace: &str, run_id: &str, holder: &str, ttl: Duration) -> Result<Lease> {
        let mut leases = self.leases.lock().await;
        if let Some(existing) = leases.get(namespace) {
            if !existing.is_expired(Utc::now()) {
                return Err(existing.conflict());
            }
            warn!("Taking over expired lease of run {} on '{}'", existing.run_id, namespace);
        }

        let lease = Lease::new(namespace, run_id, holder, ttl);
        leases.insert(namespace.to_string(), lease.clone());
        debug!("Run {} acquired namespace '{}'", run_id, namespace);
        Ok(lease)
    }

    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease> {
        let mut leases = self.leases.lock().await;
        if let Some(existing) = leases.get(&lease.namespace) {
            if lease.blocked_by(existing) {
                return Err(existing.conflict());
            }
        }

        let renewed = lease.renewed(ttl);
        leases.insert(lease.namespace.clone(), renewed.clone());
        Ok(renewed)
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let mut leases = self.leases.lock().await;
        if leases.get(&lease.namespace).is_some_and(|l| l.run_id == lease.run_id) {
            leases.remove(&lease.namespace);
            debug!("Run {} released namespace '{}'", lease.run_id, lease.namespace);
        }
        Ok(())
    }

    async fn current(&self, namespace: &str) -> Result<Option<Lease>> {
        let leases = self.leases.lock().await;
        Ok(leases
            .get(namespace)
            .filter(|l| !l.is_expired(Utc::now()))
            .cloned())
    }
}

/// Leases kept in the `run_leases` table, visible to every process sharing
/// the database file
pub struct SqliteLeaseStore {
    store: Arc<SqliteStore>,
}

impl SqliteLeaseStore {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    fn read(conn: &rusqlite::Connection, namespace: &str) -> rusqlite::Result<Option<Lease>> {
        conn.query_row(
            "SELECT run_id, holder, acquired_at, expires_at FROM run_leases WHERE namespace = ?1",
            [namespace],
            |row| {
                let acquired: String = row.get(2)?;
                let expires: String = row.get(3)?;
                Ok(Lease {
                    namespace: namespace.to_string(),
                    run_id: row.get(0)?,
                    holder: row.get(1)?,
                    acquired_at: parse_time(2, &acquired)?,
                    expires_at: parse_time(3, &expires)?,
                })
            },
        )
        .optional()
    }
}

fn parse_time(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e)))
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    async fn acquire(&self, namespace: &str, run_id: &str, holder: &str, ttl: Duration) -> Result<Lease> {
        let mut conn = self.store.lock()?;
        // Immediate so two processes cannot both see the namespace as free
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        if let Some(existing) = Self::read(&tx, namespace)? {
            if !existing.is_expired(Utc::now()) {
                return Err(existing.conflict());
            }
            warn!("Taking over expired lease of run {} on '{}'", existing.run_id, namespace);
        }

        let lease = Lease::new(namespace, run_id, holder, ttl);
        tx.execute(
            r#"
            INSERT OR REPLACE INTO run_leases (namespace, run_id, holder, acquired_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                lease.namespace,
                lease.run_id,
                lease.holder,
                lease.acquired_at.to_rfc3339(),
                lease.expires_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        debug!("Run {} acquired namespace '{}'", run_id, namespace);
        Ok(lease)
    }

    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease> {
        let mut conn = self.store.lock()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        if let Some(existing) = Self::read(&tx, &lease.namespace)? {
            if lease.blocked_by(&existing) {
                return Err(existing.conflict());
            }
        }

        let renewed = lease.renewed(ttl);
        tx.execute(
            r#"
            INSERT OR REPLACE INTO run_leases (namespace, run_id, holder, acquired_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                renewed.namespace,
                renewed.run_id,
                renewed.holder,
                renewed.acquired_at.to_rfc3339(),
                renewed.expires_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(renewed)
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let conn = self.store.lock()?;
        conn.execute(
            "DELETE FROM run_leases WHERE namespace = ?1 AND run_id = ?2",
            params![lease.namespace, lease.run_id],
        )?;
        debug!("Run {} released namespace '{}'", lease.run_id, lease.namespace);
        Ok(())
    }

    async fn current(&self, namespace: &str) -> Result<Option<Lease>> {
        let conn = self.store.lock()?;
        let lease = Self::read(&conn, namespace)?;
        Ok(lease.filter(|l| !l.is_expired(Utc::now())))
    }
}
