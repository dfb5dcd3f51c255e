//! Metadata store contract: CRUD over [`Document`] rows.
//!
//! The pipeline relies on [`MetadataStore::create`] being all-or-nothing and
//! on the store enforcing `storage_key` uniqueness; it keeps no transaction
//! log of its own.

pub mod memory;
pub mod sqlite;

use crate::document::{Document, DocumentPatch, NewDocument};
use crate::error::DocstoreError;
use async_trait::async_trait;

pub use memory::MemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a row. `Conflict` on a duplicate `storage_key`.
    async fn create(&self, doc: NewDocument) -> Result<Document, DocstoreError>;

    /// `NotFound` for an unknown id.
    async fn get(&self, id: i64) -> Result<Document, DocstoreError>;

    /// All rows in creation order.
    async fn list(&self) -> Result<Vec<Document>, DocstoreError>;

    /// Partial update of the mutable fields; bumps `updated_at`.
    async fn patch(&self, id: i64, patch: DocumentPatch) -> Result<Document, DocstoreError>;

    /// Remove a row. `NotFound` for an unknown id.
    async fn delete(&self, id: i64) -> Result<(), DocstoreError>;
}
