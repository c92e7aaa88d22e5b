//! File-backed document store on `SQLite`.
//!
//! Documents are stored as JSON text keyed by collection and key. Writers in
//! this process notify subscribers after commit; changes made by other
//! processes are not observed.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info};

use super::{
    merge_fields, migrations, Collection, Document, DocumentRef, DocumentStore, ErrorFn,
    ListenerRegistry, SnapshotFn, Subscription,
};
use crate::error::{Error, Result};

/// Document store persisted in a local `SQLite` database.
#[derive(Debug)]
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
    listeners: ListenerRegistry,
}

/// Counts reported by [`SqliteStore::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Owner documents.
    pub users: i64,
    /// Device documents.
    pub devices: i64,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

impl SqliteStore {
    /// Open or create a store at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created or
    /// the schema cannot be initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening document store at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Document store opened at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
            listeners: ListenerRegistry::default(),
        })
    }

    /// Create a store backed by an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
            listeners: ListenerRegistry::default(),
        })
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("sqlite connection lock poisoned"))
    }

    /// Number of documents in a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn document_count(&self, collection: Collection) -> Result<i64> {
        let conn = self.connection()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            [collection.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Document counts and file size.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let users = self.document_count(Collection::Users)?;
        let devices = self.document_count(Collection::Devices)?;
        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };
        Ok(StoreStats {
            users,
            devices,
            db_size_bytes,
        })
    }
}

fn read_body(conn: &Connection, doc: &DocumentRef) -> Result<Option<Document>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND key = ?2",
            params![doc.collection.as_str(), doc.key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::remote_read(doc, e.to_string()))?;

    body.map(|text| match serde_json::from_str(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::remote_read(doc, "stored body is not an object")),
        Err(e) => Err(Error::remote_read(doc, e.to_string())),
    })
    .transpose()
}

fn write_body(conn: &Connection, doc: &DocumentRef, body: &Document) -> Result<()> {
    let text = serde_json::to_string(body)?;
    conn.execute(
        r"
        INSERT INTO documents (collection, key, body, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (collection, key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
        ",
        params![doc.collection.as_str(), doc.key, text, Utc::now().to_rfc3339()],
    )
    .map_err(|e| Error::remote_write(doc, e.to_string()))?;
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, doc: &DocumentRef) -> Result<Option<Document>> {
        let conn = self.connection()?;
        read_body(&conn, doc)
    }

    async fn merge(&self, doc: &DocumentRef, fields: Document) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::remote_write(doc, e.to_string()))?;
        let mut body = read_body(&tx, doc)?.unwrap_or_default();
        merge_fields(&mut body, fields);
        write_body(&tx, doc, &body)?;
        tx.commit()
            .map_err(|e| Error::remote_write(doc, e.to_string()))?;
        debug!("Merged into {}", doc);
        self.listeners.notify(doc, Some(&body));
        Ok(())
    }

    async fn create_if_absent(&self, doc: &DocumentRef, fields: Document) -> Result<bool> {
        let conn = self.connection()?;
        let text = serde_json::to_string(&fields)?;
        let inserted = conn
            .execute(
                r"
                INSERT OR IGNORE INTO documents (collection, key, body, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ",
                params![doc.collection.as_str(), doc.key, text, Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::remote_write(doc, e.to_string()))?;
        if inserted > 0 {
            debug!("Created {}", doc);
            self.listeners.notify(doc, Some(&fields));
        }
        Ok(inserted > 0)
    }

    async fn subscribe(
        &self,
        doc: &DocumentRef,
        on_data: SnapshotFn,
        on_error: ErrorFn,
    ) -> Result<Subscription> {
        let conn = self.connection()?;
        let current = read_body(&conn, doc).map_err(|e| Error::subscription(doc, e.to_string()))?;
        on_data(current);
        self.listeners.register(doc, on_data, on_error)
    }
}
