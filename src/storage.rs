//! Template persistence.
//!
//! Stores are opaque key-value persistence: the whole template list is written as
//! one JSON document under a single key. Both stores can enforce a byte quota so
//! callers see the same capacity failure a browser's local storage would raise.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;
use crate::template::Template;

/// Key the template list is stored under.
pub const TEMPLATES_KEY: &str = "userTemplates";

pub trait TemplateStore: Send {
    fn list(&mut self) -> Result<Vec<Template>, StorageError>;

    /// Replace the stored list.
    fn save(&mut self, templates: &[Template]) -> Result<(), StorageError>;
}

fn encode(templates: &[Template], quota: Option<usize>) -> Result<String, StorageError> {
    let json = serde_json::to_string(templates).map_err(StorageError::backend)?;
    if let Some(quota) = quota {
        if json.len() > quota {
            return Err(StorageError::CapacityExceeded {
                needed: json.len(),
                quota,
            });
        }
    }
    Ok(json)
}

fn decode(json: &str) -> Result<Vec<Template>, StorageError> {
    serde_json::from_str(json).map_err(StorageError::backend)
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryTemplateStore {
    value: Option<String>,
    quota_bytes: Option<usize>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            value: None,
            quota_bytes: Some(quota_bytes),
        }
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn list(&mut self) -> Result<Vec<Template>, StorageError> {
        match &self.value {
            Some(json) => decode(json),
            None => Ok(Vec::new()),
        }
    }

    fn save(&mut self, templates: &[Template]) -> Result<(), StorageError> {
        let json = encode(templates, self.quota_bytes)?;
        self.value = Some(json);
        Ok(())
    }
}

/// SQLite-backed key-value store.
pub struct SqliteTemplateStore {
    conn: Connection,
    quota_bytes: Option<usize>,
}

impl SqliteTemplateStore {
    pub fn open(db_path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(db_path).map_err(StorageError::backend)?;
        let mut store = Self {
            conn,
            quota_bytes: None,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(StorageError::backend)?;
        let mut store = Self {
            conn,
            quota_bytes: None,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn with_quota(mut self, quota_bytes: Option<usize>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    fn ensure_schema(&mut self) -> Result<(), StorageError> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS kv (
                  key TEXT PRIMARY KEY,
                  value TEXT NOT NULL,
                  updated_at INTEGER NOT NULL
                );
                "#,
            )
            .map_err(StorageError::backend)
    }
}

impl TemplateStore for SqliteTemplateStore {
    fn list(&mut self) -> Result<Vec<Template>, StorageError> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![TEMPLATES_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::backend)?;
        match value {
            Some(json) => decode(&json),
            None => Ok(Vec::new()),
        }
    }

    fn save(&mut self, templates: &[Template]) -> Result<(), StorageError> {
        let json = encode(templates, self.quota_bytes)?;
        let updated_at = templates.iter().map(|t| t.created_at).max().unwrap_or(0);
        let updated_at = i64::try_from(updated_at).map_err(StorageError::backend)?;
        self.conn
            .execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![TEMPLATES_KEY, json, updated_at],
            )
            .map_err(StorageError::backend)?;
        Ok(())
    }
}
