pub mod models;
pub use models::*;

use anyhow::Result;
use async_trait::async_trait;
pub use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// 连接列表在键值表中的键
const CONNECTIONS_KEY: &str = "connections";

/// 打开（必要时创建）应用数据库并运行迁移
pub async fn open_pool(db_path: &Path) -> Result<SqlitePool> {
    // Windows 路径需要转换反斜杠为正斜杠
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid database path"))?
        .replace('\\', "/");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(&format!("sqlite:{}?mode=rwc", db_path_str))
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

/// 内存数据库，测试用
pub async fn open_memory_pool() -> Result<SqlitePool> {
    // 单连接，否则每个连接都是一个独立的内存库
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// 连接配置存储
///
/// 启动时读取一次，连接集合变化时整体写回。运行状态不经过这里。
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn load_connections(&self) -> Result<Vec<Connection>>;

    async fn save_connections(&self, connections: &[Connection]) -> Result<()>;
}

/// 把连接列表作为一个 JSON 值存进 SQLite 键值表
pub struct SqliteConnectionStore {
    db: Arc<SqlitePool>,
}

impl SqliteConnectionStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConnectionStore for SqliteConnectionStore {
    async fn load_connections(&self) -> Result<Vec<Connection>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?")
            .bind(CONNECTIONS_KEY)
            .fetch_optional(&*self.db)
            .await?;

        match value {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save_connections(&self, connections: &[Connection]) -> Result<()> {
        let json = serde_json::to_string(connections)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(CONNECTIONS_KEY)
        .bind(&json)
        .bind(now)
        .execute(&*self.db)
        .await?;

        Ok(())
    }
}

/// 内存连接存储
#[derive(Default)]
pub struct MemoryConnectionStore {
    connections: RwLock<Vec<Connection>>,
    saves: std::sync::atomic::AtomicUsize,
}

impl MemoryConnectionStore {
    pub fn with_connections(connections: Vec<Connection>) -> Self {
        Self {
            connections: RwLock::new(connections),
            saves: Default::default(),
        }
    }

    /// 已写回的次数
    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Vec<Connection> {
        self.connections.read().await.clone()
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn load_connections(&self) -> Result<Vec<Connection>> {
        Ok(self.connections.read().await.clone())
    }

    async fn save_connections(&self, connections: &[Connection]) -> Result<()> {
        *self.connections.write().await = connections.to_vec();
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
