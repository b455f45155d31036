use std::collections::HashMap;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serenity::async_trait;
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use tokio::sync::Mutex;

pub type Db = Pool<Postgres>;

pub async fn connect(url: &str, max: Option<u32>) -> Result<Db> {
    let pool = PgPoolOptions::new()
        .max_connections(max.unwrap_or(10))
        .connect(url)
        .await?;
    Ok(pool)
}

/// Create the schema and the key-value table if they do not exist yet.
/// Safe to run on every startup.
pub async fn ensure_tables(db: &Db) -> Result<()> {
    sqlx::query(r#"CREATE SCHEMA IF NOT EXISTS lss;"#)
        .execute(db)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lss.kv_store (
          key         TEXT        PRIMARY KEY,
          value       JSONB       NOT NULL,
          updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(db)
    .await?;

    Ok(())
}

/// Key-value persistence seam for the guard state documents (settings,
/// exemptions, audit trail, window snapshot). `load` returns `None` for a
/// missing key; `save` overwrites.
#[async_trait]
pub trait KvStore: std::fmt::Debug + Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Value>>;
    async fn save(&self, key: &str, value: &Value) -> Result<()>;
}

/// Load a typed document, falling back to `default` when the key is missing,
/// the read fails, or the stored value no longer deserializes.
pub async fn load_or<T: DeserializeOwned>(kv: &dyn KvStore, key: &str, default: T) -> T {
    match kv.load(key).await {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = ?e, key, "stored document no longer parses, using default");
                default
            }
        },
        Ok(None) => default,
        Err(e) => {
            tracing::warn!(error = ?e, key, "kv load failed, using default");
            default
        }
    }
}

/// Postgres-backed store: one JSONB row per key in `lss.kv_store`.
#[derive(Debug, Clone)]
pub struct PgKv {
    db: Db,
}

impl PgKv {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl KvStore for PgKv {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT value FROM lss.kv_store WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.db)
                .await?;
        Ok(row.map(|(v,)| v))
    }

    async fn save(&self, key: &str, value: &Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO lss.kv_store (key, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

/// In-memory store for tests and for running without a configured database.
/// State is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Value>>,
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &Value) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }
}
