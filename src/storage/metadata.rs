//! Store metadata: which schema a store file was written with.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::catalog::Schema;
use crate::storage::error::{StorageError, StorageResult};

const VERSION_KEY: &str = "version";
const FINGERPRINT_KEY: &str = "fingerprint";
const CREATED_AT_KEY: &str = "created_at";

/// Metadata stored alongside the records of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMetadata {
    /// Version label of the schema that wrote the store.
    pub version: String,
    /// Structural fingerprint of that schema.
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl StoreMetadata {
    pub fn for_schema(schema: &Schema) -> Self {
        Self {
            version: schema.version.clone(),
            fingerprint: schema.fingerprint(),
            created_at: Utc::now(),
        }
    }

    /// Read the metadata of a store file without opening it as a store.
    pub fn read(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StorageError::StoreNotFound(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Self::from_connection(&conn)?
            .ok_or_else(|| StorageError::NotInitialized(path.to_path_buf()))
    }

    pub(crate) fn from_connection(conn: &Connection) -> StorageResult<Option<Self>> {
        let has_table: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = '_metadata')",
            [],
            |row| row.get(0),
        )?;
        if !has_table {
            return Ok(None);
        }

        let get = |key: &str| -> StorageResult<Option<String>> {
            Ok(conn
                .query_row(
                    "SELECT value FROM _metadata WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?)
        };

        let (Some(version), Some(fingerprint)) = (get(VERSION_KEY)?, get(FINGERPRINT_KEY)?) else {
            return Ok(None);
        };
        let created_at = get(CREATED_AT_KEY)?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(Some(Self {
            version,
            fingerprint,
            created_at,
        }))
    }

    pub(crate) fn write(&self, conn: &Connection) -> StorageResult<()> {
        let entries = [
            (VERSION_KEY, self.version.clone()),
            (FINGERPRINT_KEY, self.fingerprint.clone()),
            (CREATED_AT_KEY, self.created_at.to_rfc3339()),
        ];
        for (key, value) in entries {
            conn.execute(
                "INSERT OR REPLACE INTO _metadata (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        Ok(())
    }
}
