//! SQLite-backed record store.
//!
//! This is the central component of the storage layer. It owns the SQLite
//! connection, the schema the store was opened with, the model registry and
//! the change listeners. Everything above it (contexts, batches, observers,
//! migrations) goes through this API.
//!
//! Records live in a single `records` table as JSON documents; the
//! `_metadata` table remembers which schema wrote the file.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use parking_lot::{Mutex, RwLock};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::catalog::{AttributeKind, Registry, Schema};
use crate::migration::Migration;
use crate::storage::config::StoreConfig;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::metadata::StoreMetadata;
use crate::storage::notify::{
    ChangeListener, ChangeNotification, ChangedRecord, Listeners, SubscriptionId,
};
use crate::storage::query::Query;
use crate::storage::record::{deserialize_record, serialize_record, Record};
use crate::storage::types::{ContextId, EntityName, ObjectId};
use crate::transaction::TransactionCoordinator;

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS _metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    entity TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS records_entity ON records (entity);
";

/// Pending mutations written by a single commit.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub inserted: Vec<Record>,
    pub updated: Vec<Record>,
    pub deleted: Vec<Record>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// The record store.
///
/// Thread-safe: clone it to share, it uses Arc internally.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    schema: Schema,
    registry: RwLock<Registry>,
    listeners: Mutex<Listeners>,
    /// Threads with an open transaction.
    transactions: Arc<Mutex<HashSet<ThreadId>>>,
    next_context: AtomicU64,
}

impl Store {
    /// Open a store, migrating or creating it as configured.
    ///
    /// An existing file is migrated to the latest schema first. If that fails
    /// and `reset_on_incompatible` is set, the file is removed and a fresh
    /// store is created in its place.
    pub fn open(config: StoreConfig) -> StorageResult<Self> {
        let schema = config
            .latest_schema()
            .cloned()
            .ok_or_else(|| StorageError::InvalidConfig("no schema versions given".into()))?;
        let path = &config.path;

        if path.exists() {
            let migration = Migration::new(path, config.schemas.clone())
                .mappings(config.mappings.clone())
                .backup_dir(config.backup_dir.clone());
            match migration.migrate() {
                Ok(_) => return Self::open_file(path, &schema),
                Err(err) if config.reset_on_incompatible => {
                    warn!(path = %path.display(), error = %err, "store cannot be migrated, recreating it");
                    fs::remove_file(path)?;
                }
                Err(err) => return Err(err.into()),
            }
        } else if !config.create_if_missing {
            return Err(StorageError::StoreNotFound(path.clone()));
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Self::create(path, &schema)
    }

    /// Create a new store file written with the given schema.
    pub fn create(path: impl AsRef<Path>, schema: &Schema) -> StorageResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        StoreMetadata::for_schema(schema).write(&conn)?;

        info!(path = %path.display(), version = %schema.version, "created store");
        Ok(Self::from_connection(conn, Some(path.to_path_buf()), schema.clone()))
    }

    /// Open an existing store file, which must be compatible with the schema.
    pub fn open_file(path: impl AsRef<Path>, schema: &Schema) -> StorageResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StorageError::StoreNotFound(path.to_path_buf()));
        }

        let conn = Connection::open(path)?;
        let metadata = StoreMetadata::from_connection(&conn)?
            .ok_or_else(|| StorageError::NotInitialized(path.to_path_buf()))?;
        if !schema.is_compatible(&metadata) {
            return Err(StorageError::IncompatibleStore {
                path: path.to_path_buf(),
                version: schema.version.clone(),
            });
        }

        debug!(path = %path.display(), version = %schema.version, "opened store");
        Ok(Self::from_connection(conn, Some(path.to_path_buf()), schema.clone()))
    }

    /// Open a throw-away in-memory store.
    pub fn in_memory(schema: &Schema) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        StoreMetadata::for_schema(schema).write(&conn)?;
        Ok(Self::from_connection(conn, None, schema.clone()))
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>, schema: Schema) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(conn),
                path,
                schema,
                registry: RwLock::new(Registry::new()),
                listeners: Mutex::new(Listeners::default()),
                transactions: Arc::new(Mutex::new(HashSet::new())),
                next_context: AtomicU64::new(1),
            }),
        }
    }

    /// Get the store path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Get the schema the store was opened with.
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Read the metadata stored in the file.
    pub fn metadata(&self) -> StorageResult<StoreMetadata> {
        self.with_connection(|conn| {
            StoreMetadata::from_connection(conn)?
                .ok_or_else(|| StorageError::Internal("store metadata disappeared".into()))
        })
    }

    /// Execute a function with access to the connection.
    pub fn with_connection<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let conn = self.inner.conn.lock();
        f(&conn)
    }

    fn with_connection_mut<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T>,
    {
        let mut conn = self.inner.conn.lock();
        f(&mut conn)
    }

    // ==================== Registry ====================

    /// Map a model type to an entity of the schema.
    pub fn register<M: 'static>(&self, entity: &str) -> StorageResult<()> {
        let entity = EntityName::new(entity)?;
        if self.inner.schema.entity(entity.as_str()).is_none() {
            return Err(StorageError::EntityNotFound(entity.into_string()));
        }
        self.inner.registry.write().register::<M>(entity);
        Ok(())
    }

    /// Entity a model type is stored as.
    pub fn entity_for<M: 'static>(&self) -> Option<EntityName> {
        self.inner.registry.read().entity_for::<M>().cloned()
    }

    // ==================== Reads ====================

    /// Run a query against committed records.
    ///
    /// Unfiltered queries sorted by scalar attributes are sorted and paged by
    /// SQLite, in the same order [`Query::apply`] produces. Anything else is
    /// read in full and applied in memory.
    pub fn fetch(&self, query: &Query) -> StorageResult<Vec<Record>> {
        let Some((sql, values)) = self.paged_statement(query) else {
            let records = self.records_of(&query.entity)?;
            return Ok(query.apply(records));
        };

        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, String>(0))?;

            let mut records = Vec::new();
            for data in rows {
                records.push(deserialize_record(&data?)?);
            }
            Ok(records)
        })
    }

    /// Build the paged SELECT for `query`, or `None` if it must run in memory.
    ///
    /// Each sort key orders by the JSON type rank first, then by value, which
    /// matches [`compare_values`](crate::storage::compare_values) for scalars.
    /// `rowid` breaks ties the way the stable in-memory sort does.
    fn paged_statement(&self, query: &Query) -> Option<(String, Vec<SqlValue>)> {
        if query.filter.is_some() {
            return None;
        }
        let entity = self.inner.schema.entity(query.entity.as_str())?;

        let mut values = vec![SqlValue::Text(query.entity.as_str().to_string())];
        let mut order = Vec::with_capacity(query.sort.len() * 2 + 1);
        for key in &query.sort {
            let attribute = entity.attribute(&key.field)?;
            if attribute.kind == AttributeKind::Json || key.field.contains('"') {
                return None;
            }
            values.push(SqlValue::Text(format!("$.\"{}\"", key.field)));
            let path = values.len();
            let direction = if key.ascending { "ASC" } else { "DESC" };
            order.push(format!(
                "CASE json_type(data, ?{path}) \
                 WHEN 'true' THEN 1 WHEN 'false' THEN 1 \
                 WHEN 'integer' THEN 2 WHEN 'real' THEN 2 \
                 WHEN 'text' THEN 3 WHEN 'array' THEN 4 WHEN 'object' THEN 5 \
                 ELSE 0 END {direction}"
            ));
            order.push(format!("json_extract(data, ?{path}) {direction}"));
        }
        order.push("rowid".to_string());

        // SQLite reads a negative limit as "no limit"
        let limit = query.limit.map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
        values.push(SqlValue::Integer(limit));
        values.push(SqlValue::Integer(i64::try_from(query.offset).unwrap_or(i64::MAX)));

        let sql = format!(
            "SELECT data FROM records WHERE entity = ?1 ORDER BY {} LIMIT ?{} OFFSET ?{}",
            order.join(", "),
            values.len() - 1,
            values.len()
        );
        Some((sql, values))
    }

    /// All committed records of an entity, in insertion order.
    pub fn records_of(&self, entity: &EntityName) -> StorageResult<Vec<Record>> {
        self.with_connection(|conn| {
            let mut stmt =
                conn.prepare("SELECT data FROM records WHERE entity = ?1 ORDER BY rowid")?;
            let rows = stmt.query_map(params![entity.as_str()], |row| row.get::<_, String>(0))?;

            let mut records = Vec::new();
            for data in rows {
                records.push(deserialize_record(&data?)?);
            }
            Ok(records)
        })
    }

    /// Every committed record, in insertion order.
    pub fn all_records(&self) -> StorageResult<Vec<Record>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT data FROM records ORDER BY rowid")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

            let mut records = Vec::new();
            for data in rows {
                records.push(deserialize_record(&data?)?);
            }
            Ok(records)
        })
    }

    /// Look up a committed record by identifier.
    pub fn record(&self, id: &ObjectId) -> StorageResult<Option<Record>> {
        let data: Option<String> = self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT data FROM records WHERE id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        data.map(|d| deserialize_record(&d)).transpose()
    }

    /// Check if a committed record exists.
    pub fn contains(&self, id: &ObjectId) -> StorageResult<bool> {
        self.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM records WHERE id = ?1)",
                params![id.as_str()],
                |row| row.get(0),
            )?)
        })
    }

    /// Number of committed records of an entity.
    pub fn count(&self, entity: &EntityName) -> StorageResult<usize> {
        let count: i64 = self.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM records WHERE entity = ?1",
                params![entity.as_str()],
                |row| row.get(0),
            )?)
        })?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    // ==================== Writes ====================

    /// Atomically write a change set and notify listeners.
    ///
    /// Inserted and updated records are validated against the schema first.
    /// Updating a record that no longer exists fails the whole commit.
    pub fn commit(&self, changes: ChangeSet, origin: ContextId) -> StorageResult<ChangeNotification> {
        let mut notification = ChangeNotification::new(origin);
        if changes.is_empty() {
            return Ok(notification);
        }

        for record in changes.inserted.iter().chain(changes.updated.iter()) {
            self.inner.schema.validate_record(record)?;
        }

        self.with_connection_mut(|conn| {
            let tx = conn.transaction()?;

            for record in &changes.inserted {
                tx.execute(
                    "INSERT INTO records (id, entity, data) VALUES (?1, ?2, ?3)",
                    params![
                        record.id().as_str(),
                        record.entity().as_str(),
                        serialize_record(record)?
                    ],
                )?;
                notification.inserted.push(changed(record));
            }

            for record in &changes.updated {
                let rows = tx.execute(
                    "UPDATE records SET data = ?2 WHERE id = ?1",
                    params![record.id().as_str(), serialize_record(record)?],
                )?;
                if rows == 0 {
                    return Err(StorageError::RecordNotFound(record.id().clone()));
                }
                notification.updated.push(changed(record));
            }

            for record in &changes.deleted {
                let rows = tx.execute(
                    "DELETE FROM records WHERE id = ?1",
                    params![record.id().as_str()],
                )?;
                if rows > 0 {
                    notification.deleted.push(changed(record));
                }
            }

            tx.commit()?;
            Ok(())
        })?;

        info!(
            origin = %origin,
            inserted = notification.inserted.len(),
            updated = notification.updated.len(),
            deleted = notification.deleted.len(),
            "committed changes"
        );
        self.notify(&notification);
        Ok(notification)
    }

    /// Bulk insert without notifications, used when populating a fresh store.
    pub(crate) fn import(&self, records: &[Record]) -> StorageResult<usize> {
        for record in records {
            self.inner.schema.validate_record(record)?;
        }

        self.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            for record in records {
                tx.execute(
                    "INSERT INTO records (id, entity, data) VALUES (?1, ?2, ?3)",
                    params![
                        record.id().as_str(),
                        record.entity().as_str(),
                        serialize_record(record)?
                    ],
                )?;
            }
            tx.commit()?;
            Ok(records.len())
        })
    }

    // ==================== Notifications ====================

    /// Register a listener. It is held weakly and dropped once its owner goes away.
    pub fn subscribe(&self, listener: Weak<dyn ChangeListener>) -> SubscriptionId {
        self.inner.listeners.lock().subscribe(listener)
    }

    /// Remove a listener.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.listeners.lock().unsubscribe(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    fn notify(&self, notification: &ChangeNotification) {
        if notification.is_empty() {
            return;
        }
        // collect first so listeners can subscribe or unsubscribe while running
        let listeners = self.inner.listeners.lock().live();
        for listener in listeners {
            listener.on_change(self, notification);
        }
    }

    // ==================== Contexts and transactions ====================

    pub(crate) fn next_context_id(&self) -> ContextId {
        ContextId(self.inner.next_context.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn transactions(&self) -> &Arc<Mutex<HashSet<ThreadId>>> {
        &self.inner.transactions
    }

    /// Get a transaction coordinator for this store.
    pub fn coordinator(&self) -> TransactionCoordinator {
        TransactionCoordinator::new(self)
    }
}

fn changed(record: &Record) -> ChangedRecord {
    ChangedRecord {
        id: record.id().clone(),
        entity: record.entity().clone(),
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.inner.path)
            .field("version", &self.inner.schema.version)
            .finish()
    }
}
