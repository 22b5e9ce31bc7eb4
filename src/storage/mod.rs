pub mod document;
pub mod memory;
pub mod object;

use crate::db::{DestinationConfig, DestinationType, SqlitePool};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

pub use document::SqliteDocumentStore;
pub use memory::MemoryRecordSink;
pub use object::ObjectStore;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 面向记录的目标：按 id 幂等 upsert
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// 同一 id 重复写入只保留最后一次的内容
    async fn upsert(
        &self,
        collection: &str,
        record_id: &str,
        record: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()>;

    /// 获取目标名称（用于日志）
    fn name(&self) -> &str;
}

/// 面向对象（整块写入）的目标
#[async_trait]
pub trait BlobSink: Send + Sync {
    async fn write_object(&self, path: &str, content: Bytes) -> Result<()>;

    /// 获取目标名称（用于日志）
    fn name(&self) -> &str;
}

/// 已解析的同步目标
#[derive(Clone)]
pub enum Sink {
    Records {
        sink: Arc<dyn RecordSink>,
        collection: String,
    },
    Blob(Arc<dyn BlobSink>),
}

impl Sink {
    pub fn name(&self) -> &str {
        match self {
            Sink::Records { sink, .. } => sink.name(),
            Sink::Blob(sink) => sink.name(),
        }
    }
}

/// 根据目标配置打开同步目标
#[async_trait]
pub trait SinkProvider: Send + Sync {
    async fn open(&self, config: &DestinationConfig) -> Result<Sink>;
}

/// 默认目标解析：文档写入应用数据库，其余走 opendal
pub struct StorageSinkProvider {
    documents: Arc<SqliteDocumentStore>,
}

impl StorageSinkProvider {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self {
            documents: Arc::new(SqliteDocumentStore::new(db)),
        }
    }
}

#[async_trait]
impl SinkProvider for StorageSinkProvider {
    async fn open(&self, config: &DestinationConfig) -> Result<Sink> {
        match config.typ {
            DestinationType::Document => {
                let collection = config
                    .collection
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Document destination requires collection"))?;
                Ok(Sink::Records {
                    sink: self.documents.clone(),
                    collection: collection.clone(),
                })
            }
            DestinationType::S3 | DestinationType::WebDav | DestinationType::Local => {
                Ok(Sink::Blob(Arc::new(ObjectStore::from_config(config).await?)))
            }
        }
    }
}
