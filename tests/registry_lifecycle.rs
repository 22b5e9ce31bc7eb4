//! 完整流程: 创建连接 -> 恢复调度 -> 写入 SQLite 文档库 -> 删除

use apisync_lib::core::{Source, SourceResponse, SyncExecutor};
use apisync_lib::db::{
    open_memory_pool, ConnectionDraft, ConnectionStore, DestinationConfig, LogLevel,
    MemoryConnectionStore, Schedule, SyncStatus, TimeUnit,
};
use apisync_lib::storage::{SqliteDocumentStore, StorageSinkProvider};
use apisync_lib::{RegistryOptions, SyncRegistry};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;

struct FixedBody(&'static str);

struct FixedResponse(&'static str);

#[async_trait]
impl SourceResponse for FixedResponse {
    fn status(&self) -> u16 {
        200
    }

    fn status_text(&self) -> String {
        "OK".to_string()
    }

    async fn bytes(self: Box<Self>) -> anyhow::Result<Bytes> {
        Ok(Bytes::from_static(self.0.as_bytes()))
    }
}

#[async_trait]
impl Source for FixedBody {
    async fn get(&self, _url: &str) -> anyhow::Result<Box<dyn SourceResponse>> {
        Ok(Box::new(FixedResponse(self.0)))
    }
}

fn options() -> RegistryOptions {
    RegistryOptions {
        tick_interval: Duration::from_millis(20),
        ..RegistryOptions::default()
    }
}

#[tokio::test]
async fn test_connection_lifecycle() {
    let pool = Arc::new(open_memory_pool().await.unwrap());
    let store = Arc::new(MemoryConnectionStore::default());
    let source = Arc::new(FixedBody(r#"[{"id": 1, "name": "a"}, {"id": "x", "name": "b"}, null]"#));
    let executor = Arc::new(SyncExecutor::new(
        source,
        Arc::new(StorageSinkProvider::new(pool.clone())),
    ));
    let registry = SyncRegistry::init(store.clone(), executor, None, options())
        .await
        .unwrap();

    let connection = registry
        .create(ConnectionDraft {
            name: "用户列表".to_string(),
            sourceUrl: "https://example.com/users".to_string(),
            destination: DestinationConfig::document("users"),
            schedule: Schedule::new(1, TimeUnit::Hours).unwrap(),
        })
        .await
        .unwrap();
    assert_eq!(store.load_connections().await.unwrap().len(), 1);

    // 新连接默认暂停，不会自动同步
    tokio::time::sleep(Duration::from_millis(100)).await;
    let run = registry.run_state(&connection.id).await.unwrap();
    assert!(run.paused);
    assert!(run.lastRunAt.is_none());

    let mut events = Box::pin(registry.watch());
    registry.toggle_pause(&connection.id).await.unwrap();

    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.next().await {
            if event.state.status == SyncStatus::Succeeded {
                return event.state;
            }
        }
        panic!("状态流意外结束");
    })
    .await
    .unwrap();

    assert_eq!(finished.progress, 100);
    assert!(finished.lastRunAt.is_some());
    assert!(finished
        .logs
        .iter()
        .any(|entry| entry.level == LogLevel::Error));
    assert_eq!(finished.logs.latest().unwrap().level, LogLevel::Success);

    let documents = SqliteDocumentStore::new(pool.clone());
    assert_eq!(documents.count("users").await.unwrap(), 2);
    let first = documents.get("users", "1").await.unwrap().unwrap();
    assert_eq!(first["name"], "a");
    assert!(documents.get("users", "x").await.unwrap().is_some());

    let payload = registry.last_payload(&connection.id).await.unwrap();
    assert_eq!(payload.as_array().unwrap().len(), 3);

    // 一小时一次，短时间内不会再次同步
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        registry.run_state(&connection.id).await.unwrap().lastRunAt,
        finished.lastRunAt
    );

    registry.remove(&connection.id).await.unwrap();
    assert!(registry.run_state(&connection.id).await.is_none());
    assert!(registry.connections().await.is_empty());
    assert!(store.load_connections().await.unwrap().is_empty());

    registry.dispose().await;
}
