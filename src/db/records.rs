//! Key/value record operations.
//!
//! Each write is a single statement, so SQLite makes it atomic: readers see
//! either the previous value or the new one.

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::SqliteConnection;
use tracing::warn;

use crate::error::Result;
use crate::model::record;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

impl super::Db {
    /// Fetch the raw value stored under `key`.
    pub async fn get_record(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool().acquire().await?;
        get_record_on(&mut conn, key).await
    }

    /// Insert or replace the value under `key`.
    pub async fn put_record(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.pool().acquire().await?;
        put_record_on(&mut conn, key, value).await
    }

    /// Delete `key`. Returns whether a record existed.
    pub async fn delete_record(&self, key: &str) -> Result<bool> {
        let mut conn = self.pool().acquire().await?;
        delete_record_on(&mut conn, key).await
    }

    /// Keys starting with `prefix`, sorted.
    pub async fn record_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT key FROM records WHERE substr(key, 1, ?1) = ?2 ORDER BY key")
                .bind(prefix.len() as i64)
                .bind(prefix)
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }
}

// ---------------------------------------------------------------------------
// Inner functions take a connection so they work both on a pooled
// connection (auto-commit) and inside a transaction.
// ---------------------------------------------------------------------------

pub(crate) async fn get_record_on(conn: &mut SqliteConnection, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM records WHERE key = ?1")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|(value,)| value))
}

pub(crate) async fn put_record_on(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO records (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn delete_record_on(conn: &mut SqliteConnection, key: &str) -> Result<bool> {
    let rows = sqlx::query("DELETE FROM records WHERE key = ?1")
        .bind(key)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(rows > 0)
}

/// Write a versioned document under `key`, or delete the key when `empty`.
pub(crate) async fn save_document_on<T: Serialize>(
    conn: &mut SqliteConnection,
    key: &str,
    items: &T,
    empty: bool,
) -> Result<()> {
    if empty {
        delete_record_on(conn, key).await?;
    } else {
        put_record_on(conn, key, &record::encode(items)?).await?;
    }
    Ok(())
}

/// Load a record through `decode`. Absent keys yield `T::default()`.
///
/// A record that fails to decode is moved aside to
/// `<key>.corrupt.<unix-millis>`, reported, and treated as absent. Callers
/// run this inside a transaction so the move is atomic.
pub(crate) async fn load_or_quarantine_on<T, F>(
    conn: &mut SqliteConnection,
    key: &str,
    decode: F,
) -> Result<T>
where
    T: Default,
    F: FnOnce(&str) -> std::result::Result<T, String>,
{
    let Some(raw) = get_record_on(conn, key).await? else {
        return Ok(T::default());
    };

    match decode(&raw) {
        Ok(value) => Ok(value),
        Err(reason) => {
            let quarantine_key =
                quarantine_on(conn, key, &raw, Utc::now().timestamp_millis()).await?;
            delete_record_on(conn, key).await?;
            warn!(
                key,
                quarantine_key = %quarantine_key,
                %reason,
                "corrupt record quarantined, treating as empty"
            );
            metrics::corrupt_records().add(1, &[KeyValue::new("key", key.to_string())]);
            Ok(T::default())
        }
    }
}

/// Copy `raw` to a fresh `<key>.corrupt.<millis>` record, never replacing an
/// earlier copy: on a clash a `.1`, `.2`, ... suffix is appended.
pub(crate) async fn quarantine_on(
    conn: &mut SqliteConnection,
    key: &str,
    raw: &str,
    millis: i64,
) -> Result<String> {
    let base = format!("{key}.corrupt.{millis}");
    let mut candidate = base.clone();
    let mut n = 0u32;
    while !insert_new_record_on(conn, &candidate, raw).await? {
        n += 1;
        candidate = format!("{base}.{n}");
    }
    Ok(candidate)
}

/// Insert under `key` only if absent. Returns whether the row was written.
pub(crate) async fn insert_new_record_on(
    conn: &mut SqliteConnection,
    key: &str,
    value: &str,
) -> Result<bool> {
    let rows = sqlx::query(
        "INSERT INTO records (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO NOTHING",
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(rows > 0)
}

/// Strict versioned decode, for records with no legacy form.
pub(crate) fn decode_document<T: DeserializeOwned>(raw: &str) -> std::result::Result<T, String> {
    record::decode(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[tokio::test]
    async fn quarantine_in_the_same_millisecond_keeps_both_copies() {
        let db = Db::in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        let first = quarantine_on(&mut conn, "upload_queue", "garbage-1", 42)
            .await
            .unwrap();
        let second = quarantine_on(&mut conn, "upload_queue", "garbage-2", 42)
            .await
            .unwrap();
        drop(conn);

        assert_eq!(first, "upload_queue.corrupt.42");
        assert_eq!(second, "upload_queue.corrupt.42.1");
        assert_eq!(db.get_record(&first).await.unwrap().as_deref(), Some("garbage-1"));
        assert_eq!(db.get_record(&second).await.unwrap().as_deref(), Some("garbage-2"));
        assert_eq!(
            db.record_keys("upload_queue.corrupt.").await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn insert_new_record_never_overwrites() {
        let db = Db::in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        assert!(insert_new_record_on(&mut conn, "k", "v1").await.unwrap());
        assert!(!insert_new_record_on(&mut conn, "k", "v2").await.unwrap());
        drop(conn);

        assert_eq!(db.get_record("k").await.unwrap().as_deref(), Some("v1"));
    }
}
