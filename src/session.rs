//! Session cache.
//!
//! A session is a bundle of named tables stored under a content-derived id.
//! The durable copy lives in the SQLite `sessions` table; [`SessionCache`]
//! mirrors live sessions in memory. The memory map is only ever a cache of
//! the durable copy.
//!
//! # Expiry
//!
//! A session is live while `now - created_at < timeout`. Two operations
//! enforce this:
//!
//! | Operation | Scope | When |
//! |-----------|-------|------|
//! | [`SessionCache::touch`] | one id | on every `get`, `get_info`, `list` access |
//! | [`SessionCache::cleanup_expired`] | every id | explicit maintenance sweep |
//!
//! # Concurrency
//!
//! Mutations (`create`, `delete`, eviction, sweep) take a single async
//! writer lock. Reads of live cached sessions only take the read side of
//! the in-memory `RwLock`, which is never held across an `.await`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use tablegraph_core::{ErrorKind, TableInfo, TableSet};

/// Where a session's tables came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Database,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::File => "file",
            SourceKind::Database => "database",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(SourceKind::File),
            "database" => Some(SourceKind::Database),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session expired: {0}")]
    Expired(String),

    #[error("session record {id} is unreadable: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("session storage error: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NotFound(_) => ErrorKind::NotFound,
            SessionError::Expired(_) => ErrorKind::Expired,
            SessionError::Corrupt { .. } | SessionError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    fn corrupt(id: &str, reason: impl fmt::Display) -> Self {
        SessionError::Corrupt {
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Source of the current time. Injected so expiry can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A cached bundle of tables.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub source_kind: SourceKind,
    pub tables: Arc<TableSet>,
    pub info: IndexMap<String, TableInfo>,
}

impl Session {
    pub fn summary(&self, timeout: Duration) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            created_at: self.created_at,
            expires_at: self.created_at + timeout,
            source_kind: self.source_kind,
            tables: self.info.clone(),
        }
    }
}

/// Session metadata without the table payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub source_kind: SourceKind,
    pub tables: IndexMap<String, TableInfo>,
}

/// Durable session records in SQLite.
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or overwrite the record for `session.id`.
    pub async fn save(&self, session: &Session) -> Result<(), SessionError> {
        let payload = serde_json::to_string(session.tables.as_ref())
            .map_err(|e| SessionError::corrupt(&session.id, e))?;
        let metadata = serde_json::to_string(&session.info)
            .map_err(|e| SessionError::corrupt(&session.id, e))?;

        sqlx::query(
            "INSERT INTO sessions (id, created_at, source_kind, payload_json, metadata_json)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                created_at = excluded.created_at,
                source_kind = excluded.source_kind,
                payload_json = excluded.payload_json,
                metadata_json = excluded.metadata_json",
        )
        .bind(&session.id)
        .bind(session.created_at.timestamp_millis())
        .bind(session.source_kind.as_str())
        .bind(&payload)
        .bind(&metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load(&self, id: &str) -> Result<Option<Session>, SessionError> {
        let row = sqlx::query(
            "SELECT created_at, source_kind, payload_json, metadata_json FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let created_at = parse_created_at(id, row.try_get("created_at")?)?;
        let source_kind = parse_source_kind(id, row.try_get("source_kind")?)?;
        let payload: String = row.try_get("payload_json")?;
        let metadata: String = row.try_get("metadata_json")?;

        let tables: TableSet =
            serde_json::from_str(&payload).map_err(|e| SessionError::corrupt(id, e))?;
        let info: IndexMap<String, TableInfo> =
            serde_json::from_str(&metadata).map_err(|e| SessionError::corrupt(id, e))?;

        Ok(Some(Session {
            id: id.to_string(),
            created_at,
            source_kind,
            tables: Arc::new(tables),
            info,
        }))
    }

    /// Metadata only; the payload column is never read.
    pub async fn load_info(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<Option<SessionInfo>, SessionError> {
        let row = sqlx::query(
            "SELECT created_at, source_kind, metadata_json FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let created_at = parse_created_at(id, row.try_get("created_at")?)?;
        let source_kind = parse_source_kind(id, row.try_get("source_kind")?)?;
        let metadata: String = row.try_get("metadata_json")?;
        let tables = serde_json::from_str(&metadata).map_err(|e| SessionError::corrupt(id, e))?;

        Ok(Some(SessionInfo {
            session_id: id.to_string(),
            created_at,
            expires_at: created_at + timeout,
            source_kind,
            tables,
        }))
    }

    /// Parse the metadata and syntax-check the payload of `id` without
    /// building its tables. A missing record counts as readable.
    pub async fn check_readable(&self, id: &str) -> Result<(), SessionError> {
        let row = sqlx::query(
            "SELECT created_at, source_kind, payload_json, metadata_json FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(());
        };
        parse_created_at(id, row.try_get("created_at")?)?;
        parse_source_kind(id, row.try_get("source_kind")?)?;
        let payload: String = row.try_get("payload_json")?;
        let metadata: String = row.try_get("metadata_json")?;
        serde_json::from_str::<IndexMap<String, TableInfo>>(&metadata)
            .map_err(|e| SessionError::corrupt(id, e))?;
        serde_json::from_str::<IgnoredAny>(&payload).map_err(|e| SessionError::corrupt(id, e))?;
        Ok(())
    }

    pub async fn created_at(&self, id: &str) -> Result<Option<DateTime<Utc>>, SessionError> {
        let ms: Option<i64> = sqlx::query_scalar("SELECT created_at FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        ms.map(|ms| parse_created_at(id, ms)).transpose()
    }

    /// Every stored id with its raw creation timestamp (ms), oldest first.
    pub async fn entries(&self) -> Result<Vec<(String, i64)>, SessionError> {
        let rows = sqlx::query("SELECT id, created_at FROM sessions ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| -> Result<(String, i64), SessionError> {
                Ok((r.try_get("id")?, r.try_get("created_at")?))
            })
            .collect()
    }

    pub async fn delete(&self, id: &str) -> Result<bool, SessionError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn parse_created_at(id: &str, ms: i64) -> Result<DateTime<Utc>, SessionError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| SessionError::corrupt(id, format!("invalid timestamp {}", ms)))
}

fn parse_source_kind(id: &str, s: String) -> Result<SourceKind, SessionError> {
    SourceKind::parse(&s)
        .ok_or_else(|| SessionError::corrupt(id, format!("unknown source kind '{}'", s)))
}

enum Lookup {
    Live(Arc<Session>),
    Expired,
    Missing,
}

/// Process-wide session cache over a [`SessionStore`].
pub struct SessionCache {
    store: SessionStore,
    memory: RwLock<HashMap<String, Arc<Session>>>,
    writer: AsyncMutex<()>,
    timeout: Duration,
    preview_rows: usize,
    clock: Arc<dyn Clock>,
}

impl SessionCache {
    pub fn new(store: SessionStore, timeout: std::time::Duration, preview_rows: usize) -> Self {
        Self {
            store,
            memory: RwLock::new(HashMap::new()),
            writer: AsyncMutex::new(()),
            timeout: Duration::from_std(timeout).unwrap_or_else(|_| Duration::weeks(52 * 100)),
            preview_rows,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_live(&self, created_at: DateTime<Utc>) -> bool {
        self.clock.now() - created_at < self.timeout
    }

    fn read_memory(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Session>>> {
        self.memory.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_memory(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Session>>> {
        self.memory.write().unwrap_or_else(|e| e.into_inner())
    }

    fn cached(&self, id: &str) -> Option<Arc<Session>> {
        self.read_memory().get(id).cloned()
    }

    /// Store `tables` under `id`, overwriting any previous session with
    /// that id. The durable write happens first; the memory copy follows.
    pub async fn create(
        &self,
        id: &str,
        tables: TableSet,
        source_kind: SourceKind,
    ) -> Result<String, SessionError> {
        let _guard = self.writer.lock().await;

        let info = tables
            .iter()
            .map(|(name, t)| (name.clone(), t.info(self.preview_rows)))
            .collect();
        let session = Arc::new(Session {
            id: id.to_string(),
            created_at: self.clock.now(),
            source_kind,
            tables: Arc::new(tables),
            info,
        });

        self.store.save(&session).await?;
        let table_count = session.tables.len();
        self.write_memory().insert(id.to_string(), session);

        tracing::info!(session_id = id, tables = table_count, source = %source_kind, "session created");
        Ok(id.to_string())
    }

    /// The live session, or `None` when unknown or expired.
    pub async fn get(&self, id: &str) -> Result<Option<Arc<Session>>, SessionError> {
        match self.lookup(id).await? {
            Lookup::Live(s) => Ok(Some(s)),
            Lookup::Expired | Lookup::Missing => Ok(None),
        }
    }

    /// Like [`get`](Self::get), but distinguishes expired from unknown ids.
    pub async fn require(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        match self.lookup(id).await? {
            Lookup::Live(s) => Ok(s),
            Lookup::Expired => Err(SessionError::Expired(id.to_string())),
            Lookup::Missing => Err(SessionError::NotFound(id.to_string())),
        }
    }

    pub async fn get_tables(&self, id: &str) -> Result<Option<Arc<TableSet>>, SessionError> {
        Ok(self.get(id).await?.map(|s| s.tables.clone()))
    }

    /// Metadata for a live session. Does not load or cache the payload.
    pub async fn get_info(&self, id: &str) -> Result<Option<SessionInfo>, SessionError> {
        if let Some(s) = self.cached(id) {
            if self.is_live(s.created_at) {
                return Ok(Some(s.summary(self.timeout)));
            }
        }
        match self.store.load_info(id, self.timeout).await {
            Ok(Some(info)) if self.is_live(info.created_at) => Ok(Some(info)),
            Ok(_) => {
                self.evict_if_stale(id).await?;
                Ok(None)
            }
            Err(e @ SessionError::Corrupt { .. }) => {
                tracing::warn!(session_id = id, error = %e, "skipping unreadable session");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Check one id and evict it if stale. Returns whether it is live.
    pub async fn touch(&self, id: &str) -> Result<bool, SessionError> {
        if let Some(s) = self.cached(id) {
            if self.is_live(s.created_at) {
                return Ok(true);
            }
        }
        self.evict_if_stale(id).await?;
        match self.store.created_at(id).await {
            Ok(Some(ts)) => Ok(self.is_live(ts)),
            Ok(None) | Err(SessionError::Corrupt { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove `id` from durable storage, then from memory.
    ///
    /// Never fails: a durable delete error is logged, both copies are left
    /// in place and `false` is returned.
    pub async fn delete(&self, id: &str) -> bool {
        let _guard = self.writer.lock().await;
        let on_disk = match self.store.delete(id).await {
            Ok(on_disk) => on_disk,
            Err(e) => {
                tracing::warn!(session_id = id, error = %e, "failed to delete durable session");
                return false;
            }
        };
        let in_memory = self.write_memory().remove(id).is_some();
        let removed = in_memory || on_disk;
        if removed {
            tracing::info!(session_id = id, "session deleted");
        }
        removed
    }

    /// Every live session's metadata, oldest first.
    ///
    /// Stale sessions met during the scan are evicted. An unreadable record
    /// is logged and skipped.
    pub async fn list(&self) -> Result<IndexMap<String, SessionInfo>, SessionError> {
        let entries = self.store.entries().await?;
        let mut out: IndexMap<String, SessionInfo> = IndexMap::new();
        let mut stale: Vec<String> = Vec::new();

        for (id, ms) in entries {
            if let Some(s) = self.cached(&id) {
                if self.is_live(s.created_at) {
                    out.insert(id, s.summary(self.timeout));
                    continue;
                }
            }
            match DateTime::from_timestamp_millis(ms) {
                Some(ts) if !self.is_live(ts) => {
                    stale.push(id);
                    continue;
                }
                _ => {}
            }
            match self.store.load_info(&id, self.timeout).await {
                Ok(Some(info)) => {
                    out.insert(id, info);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "skipping unreadable session");
                }
            }
        }

        let memory_only: Vec<Arc<Session>> = self
            .read_memory()
            .values()
            .filter(|s| !out.contains_key(&s.id))
            .cloned()
            .collect();
        for s in memory_only {
            if self.is_live(s.created_at) {
                out.insert(s.id.clone(), s.summary(self.timeout));
            } else {
                stale.push(s.id.clone());
            }
        }

        for id in stale {
            if let Err(e) = self.evict_if_stale(&id).await {
                tracing::warn!(session_id = %id, error = %e, "failed to evict stale session");
            }
        }

        out.sort_by(|_, a, _, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    /// Sweep memory and durable storage, removing every stale session and
    /// every unreadable record. Returns the number of distinct ids removed.
    pub async fn cleanup_expired(&self) -> Result<usize, SessionError> {
        let _guard = self.writer.lock().await;
        let mut removed: HashSet<String> = HashSet::new();

        {
            let mut memory = self.write_memory();
            memory.retain(|id, s| {
                let keep = self.is_live(s.created_at);
                if !keep {
                    removed.insert(id.clone());
                }
                keep
            });
        }

        for (id, ms) in self.store.entries().await? {
            let stale = match DateTime::from_timestamp_millis(ms) {
                Some(ts) => !self.is_live(ts),
                None => true,
            };
            let unreadable = if stale || self.cached(&id).is_some() {
                false
            } else {
                match self.store.check_readable(&id).await {
                    Ok(()) => false,
                    Err(e @ SessionError::Corrupt { .. }) => {
                        tracing::warn!(session_id = %id, error = %e, "removing unreadable session");
                        true
                    }
                    Err(e) => return Err(e),
                }
            };
            if (stale || unreadable) && self.store.delete(&id).await? {
                self.write_memory().remove(&id);
                removed.insert(id);
            }
        }

        tracing::info!(removed = removed.len(), "expired sessions cleaned up");
        Ok(removed.len())
    }

    async fn lookup(&self, id: &str) -> Result<Lookup, SessionError> {
        let mut seen_stale = false;
        if let Some(s) = self.cached(id) {
            if self.is_live(s.created_at) {
                return Ok(Lookup::Live(s));
            }
            seen_stale = self.evict_if_stale(id).await?;
        }

        match self.store.load(id).await {
            Ok(Some(session)) if self.is_live(session.created_at) => {
                let _guard = self.writer.lock().await;
                let mut memory = self.write_memory();
                let session = match memory.get(id) {
                    Some(existing) if existing.created_at >= session.created_at => existing.clone(),
                    _ => {
                        let session = Arc::new(session);
                        memory.insert(id.to_string(), session.clone());
                        session
                    }
                };
                Ok(Lookup::Live(session))
            }
            Ok(Some(_)) => {
                self.evict_if_stale(id).await?;
                Ok(Lookup::Expired)
            }
            Ok(None) if seen_stale => Ok(Lookup::Expired),
            Ok(None) => Ok(Lookup::Missing),
            Err(e @ SessionError::Corrupt { .. }) => {
                tracing::warn!(session_id = id, error = %e, "treating unreadable session as absent");
                Ok(Lookup::Missing)
            }
            Err(e) => Err(e),
        }
    }

    /// Evict the memory and durable copies of `id` that are stale, under
    /// the writer lock. Returns whether anything was evicted.
    async fn evict_if_stale(&self, id: &str) -> Result<bool, SessionError> {
        let _guard = self.writer.lock().await;
        let mut evicted = false;

        {
            let mut memory = self.write_memory();
            if let Some(s) = memory.get(id) {
                if !self.is_live(s.created_at) {
                    memory.remove(id);
                    evicted = true;
                }
            }
        }

        match self.store.created_at(id).await {
            Ok(Some(ts)) if !self.is_live(ts) => {
                evicted |= self.store.delete(id).await?;
            }
            Ok(_) | Err(SessionError::Corrupt { .. }) => {}
            Err(e) => return Err(e),
        }

        if evicted {
            tracing::debug!(session_id = id, "evicted expired session");
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tablegraph_core::{Table, Value};
    use tempfile::TempDir;

    async fn store() -> (TempDir, SessionStore) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("sessions.sqlite")).await.unwrap();
        migrate::apply_session_schema(&pool).await.unwrap();
        (tmp, SessionStore::new(pool))
    }

    fn tables() -> TableSet {
        let people = Table::new(
            "people",
            vec!["id".into(), "name".into(), "score".into()],
            vec![
                vec![Value::Int(1), "John".into(), Value::Float(1.5)],
                vec![Value::Int(2), Value::Null, Value::Float(2.0)],
            ],
        )
        .unwrap();
        let mut set = TableSet::new();
        set.insert("people".to_string(), people);
        set
    }

    fn cache(store: SessionStore, clock: Arc<ManualClock>) -> SessionCache {
        SessionCache::new(store, std::time::Duration::from_secs(60), 5).with_clock(clock)
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_round_trip_through_durable_store() {
        let (_tmp, store) = store().await;
        let clock = clock();
        let first = cache(store.clone(), clock.clone());
        first.create("abc", tables(), SourceKind::File).await.unwrap();

        // A fresh cache over the same file sees the session: restart survival.
        let second = cache(store, clock);
        let got = second.get_tables("abc").await.unwrap().unwrap();
        assert_eq!(*got, tables());
        let info = second.get_info("abc").await.unwrap().unwrap();
        assert_eq!(info.tables["people"].total_rows, 2);
        assert_eq!(info.source_kind, SourceKind::File);
    }

    #[tokio::test]
    async fn test_expiry_boundary() {
        let (_tmp, store) = store().await;
        let clock = clock();
        let cache = cache(store, clock.clone());
        cache.create("abc", tables(), SourceKind::File).await.unwrap();

        clock.advance(Duration::seconds(59));
        assert!(cache.get("abc").await.unwrap().is_some());
        assert_eq!(cache.list().await.unwrap().len(), 1);

        clock.advance(Duration::seconds(1));
        assert!(cache.get("abc").await.unwrap().is_none());
        assert!(cache.list().await.unwrap().is_empty());
        assert!(cache.get_info("abc").await.unwrap().is_none());
        assert!(!cache.touch("abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_require_reports_expired() {
        let (_tmp, store) = store().await;
        let clock = clock();
        let cache = cache(store, clock.clone());
        cache.create("abc", tables(), SourceKind::File).await.unwrap();
        clock.advance(Duration::seconds(120));

        let err = cache.require("abc").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Expired);
        let err = cache.require("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_removes_both_copies() {
        let (_tmp, store) = store().await;
        let cache = cache(store.clone(), clock());
        cache.create("abc", tables(), SourceKind::Database).await.unwrap();
        assert!(cache.delete("abc").await);
        assert!(!cache.delete("abc").await);
        assert!(store.load("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_skips_unreadable_and_cleanup_removes_it() {
        let (_tmp, store) = store().await;
        let clock = clock();
        let cache = cache(store.clone(), clock.clone());
        cache.create("old", tables(), SourceKind::File).await.unwrap();

        clock.advance(Duration::seconds(30));
        cache.create("good", tables(), SourceKind::File).await.unwrap();
        sqlx::query(
            "INSERT INTO sessions (id, created_at, source_kind, payload_json, metadata_json)
             VALUES ('broken', ?, 'file', 'not json', 'not json')",
        )
        .bind(clock.now().timestamp_millis())
        .execute(store.pool())
        .await
        .unwrap();

        let listed = cache.list().await.unwrap();
        assert_eq!(listed.keys().collect::<Vec<_>>(), vec!["old", "good"]);
        assert!(cache.get("broken").await.unwrap().is_none());

        // "old" is now stale, "broken" is live but unreadable.
        clock.advance(Duration::seconds(31));
        let removed = cache.cleanup_expired().await.unwrap();
        assert_eq!(removed, 2);
        let remaining: Vec<String> = store
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.0)
            .collect();
        assert_eq!(remaining, vec!["good".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_reports_false_when_durable_delete_fails() {
        let (_tmp, store) = store().await;
        let cache = cache(store.clone(), clock());
        cache.create("abc", tables(), SourceKind::File).await.unwrap();
        sqlx::query(
            "CREATE TRIGGER keep_sessions BEFORE DELETE ON sessions
             BEGIN SELECT RAISE(ABORT, 'read-only archive'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();

        assert!(!cache.delete("abc").await);
        assert!(cache.get("abc").await.unwrap().is_some());
        assert!(store.load("abc").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cleanup_does_not_load_live_sessions() {
        let (_tmp, store) = store().await;
        let clock = clock();
        cache(store.clone(), clock.clone())
            .create("abc", tables(), SourceKind::File)
            .await
            .unwrap();

        let fresh = cache(store, clock);
        assert_eq!(fresh.cleanup_expired().await.unwrap(), 0);
        assert!(fresh.cached("abc").is_none());
        assert!(fresh.get("abc").await.unwrap().is_some());
    }
}
