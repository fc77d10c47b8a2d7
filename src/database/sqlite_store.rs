/*!
 * SQLite-backed document store.
 */

use async_trait::async_trait;
use log::debug;
use rusqlite::{OptionalExtension, params};
use serde_json::Value;
use std::fmt;

use super::connection::DatabaseConnection;
use super::store::DocumentStore;
use crate::errors::StoreError;

/// Document store persisting JSON bodies in the `documents` table
#[derive(Clone)]
pub struct SqliteStore {
    /// Database connection
    db: DatabaseConnection,
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.db.path())
            .finish()
    }
}

impl SqliteStore {
    /// Create a store over an existing connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Open the store at the default database location
    pub fn new_default() -> anyhow::Result<Self> {
        Ok(Self::new(DatabaseConnection::new_default()?))
    }

    /// Create a store with an in-memory database (for testing)
    pub fn new_in_memory() -> anyhow::Result<Self> {
        Ok(Self::new(DatabaseConnection::new_in_memory()?))
    }

    /// Underlying connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, id: &str) -> Result<Option<Value>, StoreError> {
        let id = id.to_string();

        let body: Option<String> = self
            .db
            .execute_async(move |conn| {
                Ok(conn
                    .query_row("SELECT body FROM documents WHERE id = ?1", [&id], |row| {
                        row.get(0)
                    })
                    .optional()?)
            })
            .await?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, id: &str, value: Value) -> Result<(), StoreError> {
        let id = id.to_string();
        let body = serde_json::to_string(&value)?;
        let updated_at = chrono::Utc::now().to_rfc3339();

        debug!("Storing document {} ({} bytes)", id, body.len());

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO documents (id, body, updated_at) VALUES (?1, ?2, ?3)
                    ON CONFLICT(id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
                    "#,
                    params![id, body, updated_at],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();

        self.db
            .execute_async(move |conn| {
                conn.execute("DELETE FROM documents WHERE id = ?1", [&id])?;
                Ok(())
            })
            .await?;

        Ok(())
    }
}
