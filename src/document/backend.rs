//! Storage seam for localizable documents.
//!
//! Documents are JSON objects identified by their string `"id"` field and
//! grouped by collection name.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::StoreError;

/// Equality match on top-level document fields. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentQuery {
    fields: BTreeMap<String, Value>,
}

impl DocumentQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self::all().eq("id", id)
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.fields
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }
}

pub trait DocumentBackend: Send + Sync {
    /// Matching documents in insertion order.
    fn find_documents(&self, collection: &str, query: &DocumentQuery)
        -> Result<Vec<Value>, StoreError>;
    fn find_document(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;
    fn insert_document(&self, collection: &str, id: &str, doc: &Value) -> Result<(), StoreError>;
    /// Insert or replace.
    fn upsert_document(&self, collection: &str, id: &str, doc: &Value) -> Result<(), StoreError>;
    fn delete_document(&self, collection: &str, id: &str) -> Result<bool, StoreError>;
}

#[derive(Default)]
pub struct MemoryDocuments {
    collections: RwLock<HashMap<String, Vec<(String, Value)>>>,
}

impl MemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentBackend for MemoryDocuments {
    fn find_documents(
        &self,
        collection: &str,
        query: &DocumentQuery,
    ) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| query.matches(doc))
                    .map(|(_, doc)| doc.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn find_document(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|(doc_id, _)| doc_id == id))
            .map(|(_, doc)| doc.clone()))
    }

    fn insert_document(&self, collection: &str, id: &str, doc: &Value) -> Result<(), StoreError> {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|(doc_id, _)| doc_id == id) {
            return Err(StoreError::Backend(format!(
                "duplicate document {collection}/{id}"
            )));
        }
        docs.push((id.to_string(), doc.clone()));
        Ok(())
    }

    fn upsert_document(&self, collection: &str, id: &str, doc: &Value) -> Result<(), StoreError> {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|(doc_id, _)| doc_id == id) {
            Some((_, existing)) => *existing = doc.clone(),
            None => docs.push((id.to_string(), doc.clone())),
        }
        Ok(())
    }

    fn delete_document(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let mut collections = self.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = docs.len();
        docs.retain(|(doc_id, _)| doc_id != id);
        Ok(docs.len() != before)
    }
}
