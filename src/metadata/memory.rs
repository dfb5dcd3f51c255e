//! In-process metadata store, used by tests and single-shot tools.

use super::MetadataStore;
use crate::document::{Document, DocumentPatch, Locator, NewDocument};
use crate::error::{ConflictError, DocstoreError, NotFoundError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    // Ids only grow, so key order is creation order.
    rows: BTreeMap<i64, Document>,
}

impl State {
    fn key_taken(&self, key: &str, except: Option<i64>) -> bool {
        self.rows
            .values()
            .any(|d| d.storage_key == key && Some(d.id) != except)
    }

    fn locator_taken(&self, locator: &Locator, except: Option<i64>) -> bool {
        self.rows
            .values()
            .any(|d| &d.locator == locator && Some(d.id) != except)
    }
}

#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    state: RwLock<State>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create(&self, doc: NewDocument) -> Result<Document, DocstoreError> {
        let mut state = self.state.write().await;
        if state.key_taken(&doc.storage_key, None) {
            return Err(ConflictError::DuplicateKey {
                storage_key: doc.storage_key,
            }
            .into());
        }
        if state.locator_taken(&doc.locator, None) {
            return Err(ConflictError::DuplicateLocator {
                locator: doc.locator.to_string(),
            }
            .into());
        }

        state.next_id += 1;
        let now = Utc::now();
        let row = Document {
            id: state.next_id,
            display_name: doc.display_name,
            storage_key: doc.storage_key,
            locator: doc.locator,
            created_at: now,
            updated_at: now,
        };
        state.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: i64) -> Result<Document, DocstoreError> {
        self.state
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| NotFoundError::Document { id }.into())
    }

    async fn list(&self) -> Result<Vec<Document>, DocstoreError> {
        Ok(self.state.read().await.rows.values().cloned().collect())
    }

    async fn patch(&self, id: i64, patch: DocumentPatch) -> Result<Document, DocstoreError> {
        let mut state = self.state.write().await;
        if !state.rows.contains_key(&id) {
            return Err(NotFoundError::Document { id }.into());
        }
        if let Some(ref key) = patch.storage_key {
            if state.key_taken(key, Some(id)) {
                return Err(ConflictError::DuplicateKey {
                    storage_key: key.clone(),
                }
                .into());
            }
        }
        if let Some(ref locator) = patch.locator {
            if state.locator_taken(locator, Some(id)) {
                return Err(ConflictError::DuplicateLocator {
                    locator: locator.to_string(),
                }
                .into());
            }
        }

        let row = state
            .rows
            .get_mut(&id)
            .ok_or(NotFoundError::Document { id })?;
        patch.apply_to(row);
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), DocstoreError> {
        self.state
            .write()
            .await
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| NotFoundError::Document { id }.into())
    }
}
