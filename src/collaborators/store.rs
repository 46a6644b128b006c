//! Document store implementations.
//!
//! Documents are JSON values keyed by `(collection, id)`. Queries return
//! documents of one collection in insertion order, optionally restricted to
//! those whose top-level `field` equals a value.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;

use super::DocumentStore;
use crate::error::StoreError;

const CREATE_DOCUMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    body TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (collection, id)
)
"#;

/// Restricts a query to matching documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    field: Option<(String, Value)>,
    limit: Option<usize>,
}

impl DocumentFilter {
    /// Matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches documents whose top-level `field` equals `value`.
    pub fn field_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: Some((field.into(), value.into())),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, document: &Value) -> bool {
        match &self.field {
            Some((field, expected)) => document.get(field) == Some(expected),
            None => true,
        }
    }

    fn apply<I>(&self, documents: I) -> Vec<Value>
    where
        I: Iterator<Item = Value>,
    {
        let limit = self.limit.unwrap_or(usize::MAX);
        documents.filter(|d| self.matches(d)).take(limit).collect()
    }
}

/// In-process store, used by tests and local runs without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<(String, Value)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let entries = collections.entry(collection.to_string()).or_default();
        match entries.iter_mut().find(|(key, _)| key == id) {
            Some(entry) => entry.1 = document,
            None => entries.push((id.to_string(), document)),
        }
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|entries| entries.iter().find(|(key, _)| key == id))
            .map(|(_, document)| document.clone()))
    }

    async fn query(&self, collection: &str, filter: &DocumentFilter) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.read().await;
        let documents = collections
            .get(collection)
            .into_iter()
            .flatten()
            .map(|(_, document)| document.clone());
        Ok(filter.apply(documents))
    }
}

/// SQLite-backed store keeping each document as JSON text.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if missing) the database at `database_url` and
    /// ensures the schema exists.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite URL, e.g. `sqlite://news-forge.db` or `sqlite::memory:`
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_DOCUMENTS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn upsert(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(&document)?;
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, body, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (collection, id)
            DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(body)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn query(&self, collection: &str, filter: &DocumentFilter) -> Result<Vec<Value>, StoreError> {
        let rows = sqlx::query("SELECT body FROM documents WHERE collection = ? ORDER BY rowid")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let body: String = row.try_get("body")?;
            documents.push(serde_json::from_str::<Value>(&body)?);
        }
        Ok(filter.apply(documents.into_iter()))
    }
}
