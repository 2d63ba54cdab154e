//! In-memory sink for tests and development.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::records::StorageRecord;
use crate::storage::StorageSink;

/// Keeps every record in memory, deduped by record identity with the
/// latest write winning. Not for production; data dies with the process.
#[derive(Debug, Default)]
pub struct MemorySink {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Insertion order of first writes
    order: Vec<String>,
    by_identity: HashMap<String, StorageRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in first-write order.
    pub fn records(&self) -> Vec<StorageRecord> {
        let inner = self.inner.read().unwrap();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_identity.get(id).cloned())
            .collect()
    }

    /// Records of one kind, in write order.
    pub fn of_kind(&self, kind: &str) -> Vec<StorageRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.kind() == kind)
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.of_kind(kind).len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of a record in the write order, by identity.
    pub fn position(&self, identity: &str) -> Option<usize> {
        self.inner
            .read()
            .unwrap()
            .order
            .iter()
            .position(|id| id == identity)
    }
}

#[async_trait]
impl StorageSink for MemorySink {
    async fn write(&self, record: StorageRecord) -> Result<(), StorageError> {
        let identity = record.identity();
        let mut inner = self.inner.write().unwrap();
        if !inner.by_identity.contains_key(&identity) {
            inner.order.push(identity.clone());
        }
        inner.by_identity.insert(identity, record);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Category, PageRecord};
    use chrono::Utc;

    fn page(url: &str, score: u32) -> StorageRecord {
        StorageRecord::Page(PageRecord {
            url: url.to_string(),
            parent_url: None,
            title: None,
            description: None,
            category: Category::Services,
            content_length: 0,
            quality_score: score,
            crawled_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn at_least_once_dedupes_by_identity() {
        let sink = MemorySink::new();
        sink.write(page("https://www.bolton.gov.uk/a", 40)).await.unwrap();
        sink.write(page("https://www.bolton.gov.uk/a", 70)).await.unwrap();
        assert_eq!(sink.len(), 1);
        match &sink.records()[0] {
            StorageRecord::Page(p) => assert_eq!(p.quality_score, 70),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn kind_filters() {
        let sink = MemorySink::new();
        sink.write(page("https://www.bolton.gov.uk/a", 40)).await.unwrap();
        sink.write(page("https://www.bolton.gov.uk/b", 40)).await.unwrap();
        assert_eq!(sink.count("page"), 2);
        assert_eq!(sink.count("spending"), 0);
    }
}
