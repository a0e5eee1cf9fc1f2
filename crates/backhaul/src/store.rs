//! Deferred message store
//!
//! Messages that cannot leave the node now (no transport, satellite budget)
//! are kept until the flush worker finds a way out. The SQLite store survives
//! power cycles; the memory store backs tests and nodes without flash.

use crate::error::BackhaulResult;
use crate::transport::MessagePriority;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Why a message was deferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeferReason {
    TransportUnavailable,
    BudgetExceeded,
}

impl DeferReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeferReason::TransportUnavailable => "transport_unavailable",
            DeferReason::BudgetExceeded => "budget_exceeded",
        }
    }

    pub fn parse(label: &str) -> Self {
        match label {
            "budget_exceeded" => DeferReason::BudgetExceeded,
            _ => DeferReason::TransportUnavailable,
        }
    }
}

/// A stored outbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredMessage {
    pub id: i64,
    pub payload: Vec<u8>,
    pub priority: MessagePriority,
    pub reason: DeferReason,
    pub created_at: u64,
    /// Failed flush attempts
    pub attempts: u32,
}

pub trait DeferredStore: Send {
    /// Store a message; returns its id
    fn push(
        &mut self,
        payload: &[u8],
        priority: MessagePriority,
        reason: DeferReason,
        now_ms: u64,
    ) -> BackhaulResult<i64>;

    /// Up to `limit` messages, highest priority first, oldest first within a priority
    fn pending(&self, limit: usize) -> BackhaulResult<Vec<DeferredMessage>>;

    fn remove(&mut self, id: i64) -> BackhaulResult<()>;

    fn record_attempt(&mut self, id: i64) -> BackhaulResult<()>;

    fn len(&self) -> BackhaulResult<usize>;
}

/// SQLite-backed store
#[derive(Debug)]
pub struct SqliteDeferredStore {
    db: Connection,
}

impl SqliteDeferredStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> BackhaulResult<Self> {
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> BackhaulResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(db: Connection) -> BackhaulResult<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS deferred_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload BLOB NOT NULL,
                priority INTEGER NOT NULL,
                reason TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_deferred_order
             ON deferred_messages(priority DESC, created_at, id)",
            [],
        )?;
        Ok(Self { db })
    }
}

impl DeferredStore for SqliteDeferredStore {
    fn push(
        &mut self,
        payload: &[u8],
        priority: MessagePriority,
        reason: DeferReason,
        now_ms: u64,
    ) -> BackhaulResult<i64> {
        self.db.execute(
            "INSERT INTO deferred_messages (payload, priority, reason, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![payload, priority.as_u8(), reason.as_str(), now_ms as i64],
        )?;
        Ok(self.db.last_insert_rowid())
    }

    fn pending(&self, limit: usize) -> BackhaulResult<Vec<DeferredMessage>> {
        let mut stmt = self.db.prepare(
            "SELECT id, payload, priority, reason, created_at, attempts FROM deferred_messages
             ORDER BY priority DESC, created_at, id LIMIT ?1",
        )?;
        let messages = stmt
            .query_map([limit as i64], |row| {
                let priority: u8 = row.get(2)?;
                let reason: String = row.get(3)?;
                let created_at: i64 = row.get(4)?;
                Ok(DeferredMessage {
                    id: row.get(0)?,
                    payload: row.get(1)?,
                    priority: MessagePriority::from_u8(priority).unwrap_or_default(),
                    reason: DeferReason::parse(&reason),
                    created_at: created_at.max(0) as u64,
                    attempts: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    fn remove(&mut self, id: i64) -> BackhaulResult<()> {
        self.db
            .execute("DELETE FROM deferred_messages WHERE id = ?1", [id])?;
        Ok(())
    }

    fn record_attempt(&mut self, id: i64) -> BackhaulResult<()> {
        self.db.execute(
            "UPDATE deferred_messages SET attempts = attempts + 1 WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    fn len(&self) -> BackhaulResult<usize> {
        let count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM deferred_messages", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}

/// Volatile store
#[derive(Debug, Default)]
pub struct MemoryDeferredStore {
    next_id: i64,
    messages: Vec<DeferredMessage>,
}

impl MemoryDeferredStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeferredStore for MemoryDeferredStore {
    fn push(
        &mut self,
        payload: &[u8],
        priority: MessagePriority,
        reason: DeferReason,
        now_ms: u64,
    ) -> BackhaulResult<i64> {
        self.next_id += 1;
        self.messages.push(DeferredMessage {
            id: self.next_id,
            payload: payload.to_vec(),
            priority,
            reason,
            created_at: now_ms,
            attempts: 0,
        });
        Ok(self.next_id)
    }

    fn pending(&self, limit: usize) -> BackhaulResult<Vec<DeferredMessage>> {
        let mut messages = self.messages.clone();
        messages.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        messages.truncate(limit);
        Ok(messages)
    }

    fn remove(&mut self, id: i64) -> BackhaulResult<()> {
        self.messages.retain(|m| m.id != id);
        Ok(())
    }

    fn record_attempt(&mut self, id: i64) -> BackhaulResult<()> {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
            message.attempts += 1;
        }
        Ok(())
    }

    fn len(&self) -> BackhaulResult<usize> {
        Ok(self.messages.len())
    }
}
