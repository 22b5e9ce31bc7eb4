use super::RecordSink;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

type Collection = HashMap<String, serde_json::Map<String, serde_json::Value>>;

/// 内存记录目标，开发和测试用
#[derive(Default)]
pub struct MemoryRecordSink {
    collections: RwLock<HashMap<String, Collection>>,
    writes: AtomicUsize,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(
        &self,
        collection: &str,
        record_id: &str,
    ) -> Option<serde_json::Map<String, serde_json::Value>> {
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|c| c.get(record_id))
            .cloned()
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, |c| c.len())
    }

    /// upsert 调用总次数
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSink for MemoryRecordSink {
    async fn upsert(
        &self,
        collection: &str,
        record_id: &str,
        record: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(record_id.to_string(), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
