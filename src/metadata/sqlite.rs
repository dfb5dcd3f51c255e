//! SQLite-backed metadata store.
//!
//! One `documents` table; uniqueness of `storage_key` and `locator` is
//! enforced by the schema, so concurrent inserts race safely and the loser
//! gets `Conflict`.

use super::MetadataStore;
use crate::document::{Document, DocumentPatch, Locator, NewDocument};
use crate::error::{ConflictError, DocstoreError, NotFoundError};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    display_name TEXT    NOT NULL,
    storage_key  TEXT    NOT NULL UNIQUE,
    locator      TEXT    NOT NULL,
    created_at   TEXT    NOT NULL,
    updated_at   TEXT    NOT NULL
)
"#;

// An index rather than a column constraint so older databases pick it up.
const LOCATOR_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS documents_locator ON documents (locator)";

const SELECT_COLUMNS: &str =
    "SELECT id, display_name, storage_key, locator, created_at, updated_at FROM documents";

#[derive(Debug, Clone)]
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// Connect using a sqlx URL such as `sqlite://documents.db` or
    /// `sqlite::memory:`. The database file is created if missing.
    pub async fn connect(url: &str) -> Result<Self, DocstoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_error)?
            .create_if_missing(true);
        Self::connect_with(options).await
    }

    /// Open (or create) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DocstoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        Self::connect_with(options).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self, DocstoreError> {
        // A single long-lived connection: serialises writers and keeps
        // in-memory databases alive for the lifetime of the pool.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db_error)?;

        for statement in [SCHEMA, LOCATOR_INDEX] {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(db_error)?;
        }
        debug!("metadata schema ready");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn create(&self, doc: NewDocument) -> Result<Document, DocstoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO documents (display_name, storage_key, locator, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&doc.display_name)
        .bind(&doc.storage_key)
        .bind(doc.locator.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, &doc.storage_key, &doc.locator))?;

        Ok(Document {
            id: result.last_insert_rowid(),
            display_name: doc.display_name,
            storage_key: doc.storage_key,
            locator: doc.locator,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get(&self, id: i64) -> Result<Document, DocstoreError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or(NotFoundError::Document { id })?;
        row_to_document(&row)
    }

    async fn list(&self) -> Result<Vec<Document>, DocstoreError> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY id ASC"))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter().map(row_to_document).collect()
    }

    async fn patch(&self, id: i64, patch: DocumentPatch) -> Result<Document, DocstoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or(NotFoundError::Document { id })?;
        let mut doc = row_to_document(&row)?;
        patch.apply_to(&mut doc);
        doc.updated_at = Utc::now();

        sqlx::query(
            "UPDATE documents SET display_name = ?, storage_key = ?, locator = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&doc.display_name)
        .bind(&doc.storage_key)
        .bind(doc.locator.to_string())
        .bind(doc.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, &doc.storage_key, &doc.locator))?;

        tx.commit().await.map_err(db_error)?;
        Ok(doc)
    }

    async fn delete(&self, id: i64) -> Result<(), DocstoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(NotFoundError::Document { id }.into());
        }
        Ok(())
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document, DocstoreError> {
    let id: i64 = row.try_get("id").map_err(db_error)?;
    let locator: String = row.try_get("locator").map_err(db_error)?;
    let locator = Locator::from_str(&locator)
        .map_err(|e| DocstoreError::Metadata(format!("row {id} has an invalid locator: {e}")))?;

    Ok(Document {
        id,
        display_name: row.try_get("display_name").map_err(db_error)?,
        storage_key: row.try_get("storage_key").map_err(db_error)?,
        locator,
        created_at: row.try_get("created_at").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
    })
}

fn write_error(e: sqlx::Error, storage_key: &str, locator: &Locator) -> DocstoreError {
    // SQLite names the offending column: "UNIQUE constraint failed: documents.locator".
    let on_locator = e
        .as_database_error()
        .filter(|db| db.is_unique_violation())
        .map(|db| db.message().contains("documents.locator"));
    match on_locator {
        Some(true) => ConflictError::DuplicateLocator {
            locator: locator.to_string(),
        }
        .into(),
        Some(false) => ConflictError::DuplicateKey {
            storage_key: storage_key.to_string(),
        }
        .into(),
        None => db_error(e),
    }
}

fn db_error(e: sqlx::Error) -> DocstoreError {
    DocstoreError::Metadata(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_doc(key: &str) -> NewDocument {
        NewDocument {
            display_name: "a.pdf".into(),
            storage_key: key.into(),
            locator: Locator::Remote {
                bucket: "docs".into(),
                key: key.into(),
            },
        }
    }

    #[tokio::test]
    async fn rows_survive_a_roundtrip() {
        let store = SqliteMetadataStore::connect("sqlite::memory:").await.unwrap();
        let created = store.create(new_doc("k1")).await.unwrap();
        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched.storage_key, "k1");
        assert_eq!(fetched.locator, created.locator);
        assert_eq!(fetched.created_at, created.created_at);
    }

    #[tokio::test]
    async fn unique_violation_becomes_conflict() {
        let store = SqliteMetadataStore::connect("sqlite::memory:").await.unwrap();
        store.create(new_doc("k")).await.unwrap();
        let mut again = new_doc("k");
        again.locator = Locator::Remote {
            bucket: "docs".into(),
            key: "elsewhere".into(),
        };
        let err = store.create(again).await.unwrap_err();
        assert!(matches!(
            err,
            DocstoreError::Conflict(ConflictError::DuplicateKey { .. })
        ));
    }

    #[tokio::test]
    async fn shared_locator_becomes_conflict() {
        let store = SqliteMetadataStore::connect("sqlite::memory:").await.unwrap();
        let first = store.create(new_doc("k1")).await.unwrap();
        let mut second = new_doc("k2");
        second.locator = first.locator.clone();
        let err = store.create(second).await.unwrap_err();
        assert!(
            matches!(err, DocstoreError::Conflict(ConflictError::DuplicateLocator { .. })),
            "got: {err:?}"
        );
    }

    #[tokio::test]
    async fn file_database_is_created() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("documents.db");
        let store = SqliteMetadataStore::open(&path).await.unwrap();
        store.create(new_doc("k")).await.unwrap();
        store.close().await;

        let reopened = SqliteMetadataStore::open(&path).await.unwrap();
        assert_eq!(reopened.list().await.unwrap().len(), 1);
    }
}
