//! Metadata table and id mapping.
//!
//! External string ids are caller-owned and stable; internally every indexed
//! document gets a dense u32 id that the graph, arena, and lexical index
//! share. Internal ids are append-only — an update allocates a fresh internal
//! id and tombstones the old one — and are compacted on rebuild.

use crate::document::AttributeBag;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Document store: external↔internal id mapping plus the attribute table
/// used for filtering and result hydration.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DocumentStore {
    /// external id → current internal id (live documents only).
    ids: HashMap<String, u32>,
    /// internal id → external id, append-only (covers tombstones too).
    external: Vec<String>,
    /// internal id → attribute bag (live documents only).
    attrs: HashMap<u32, Arc<AttributeBag>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live document count.
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Total internal ids ever assigned (live + tombstoned).
    pub fn assigned(&self) -> usize {
        self.external.len()
    }

    /// Register a document under a fresh internal id. If the external id is
    /// already live the caller must remove it first; this only allocates.
    pub fn insert(&mut self, external_id: &str, attrs: AttributeBag) -> u32 {
        let internal = self.external.len() as u32;
        self.external.push(external_id.to_string());
        self.ids.insert(external_id.to_string(), internal);
        self.attrs.insert(internal, Arc::new(attrs));
        internal
    }

    /// Drop a live document. Returns its internal id, which stays reserved
    /// as a tombstone until the next rebuild.
    pub fn remove(&mut self, external_id: &str) -> Option<u32> {
        let internal = self.ids.remove(external_id)?;
        self.attrs.remove(&internal);
        Some(internal)
    }

    pub fn internal_id(&self, external_id: &str) -> Option<u32> {
        self.ids.get(external_id).copied()
    }

    pub fn external_id(&self, internal_id: u32) -> Option<&str> {
        self.external.get(internal_id as usize).map(String::as_str)
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.ids.contains_key(external_id)
    }

    #[inline]
    pub fn is_live(&self, internal_id: u32) -> bool {
        self.attrs.contains_key(&internal_id)
    }

    /// Attribute bag of a live document.
    pub fn attributes(&self, internal_id: u32) -> Option<&Arc<AttributeBag>> {
        self.attrs.get(&internal_id)
    }

    /// Iterate live `(internal_id, external_id)` pairs in unspecified order.
    pub fn live(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        self.attrs
            .keys()
            .map(move |&id| (id, self.external[id as usize].as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::AttributeValue;

    fn bag(years: i64) -> AttributeBag {
        [(
            "experience_years".to_string(),
            AttributeValue::Integer(years),
        )]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut store = DocumentStore::new();
        let id = store.insert("d1", bag(5));
        assert_eq!(store.internal_id("d1"), Some(id));
        assert_eq!(store.external_id(id), Some("d1"));
        assert!(store.is_live(id));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_keeps_external_mapping() {
        let mut store = DocumentStore::new();
        let id = store.insert("d1", bag(3));
        assert_eq!(store.remove("d1"), Some(id));
        assert!(!store.is_live(id));
        assert!(!store.contains("d1"));
        // The dead internal id still resolves for diagnostics.
        assert_eq!(store.external_id(id), Some("d1"));
        assert_eq!(store.len(), 0);
        assert_eq!(store.assigned(), 1);
    }

    #[test]
    fn test_reinsert_allocates_fresh_internal_id() {
        let mut store = DocumentStore::new();
        let first = store.insert("d1", bag(1));
        store.remove("d1");
        let second = store.insert("d1", bag(2));
        assert_ne!(first, second);
        assert_eq!(store.internal_id("d1"), Some(second));
        assert_eq!(
            store.attributes(second).unwrap()["experience_years"],
            AttributeValue::Integer(2)
        );
    }

    #[test]
    fn test_remove_unknown() {
        let mut store = DocumentStore::new();
        assert_eq!(store.remove("ghost"), None);
    }
}
