use std::sync::Arc;

pub mod config;
pub mod core;
pub mod db;
pub mod logging;
pub mod storage;

pub use config::AppConfig;
pub use core::{RegistryError, RegistryOptions, SyncError, SyncRegistry};
pub use db::models::{Connection, ConnectionDraft, DestinationConfig, RunState, Schedule};

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<sqlx::SqlitePool>,
    pub registry: Arc<SyncRegistry>,
}

impl AppState {
    pub async fn new() -> anyhow::Result<Self> {
        let config_dir = dirs::data_dir();
        std::fs::create_dir_all(&config_dir)?;
        tracing::debug!("数据目录: {:?}", config_dir);

        let config = AppConfig::load(&config_dir);
        let db = Arc::new(db::open_pool(&config_dir.join("apisync.db")).await?);

        let source = Arc::new(core::HttpSource::new(config.engine.fetch_timeout())?);
        let sinks = Arc::new(storage::StorageSinkProvider::new(db.clone()));
        let executor = Arc::new(core::SyncExecutor::new(source, sinks));

        let enhancer: Option<Arc<dyn core::MessageEnhancer>> =
            match config.notifications.enhancer_url() {
                Some(url) => {
                    tracing::info!("启用错误消息增强: {}", url);
                    Some(Arc::new(core::WebhookEnhancer::new(
                        url,
                        config.notifications.enhancer_timeout(),
                    )?))
                }
                None => None,
            };

        let store = Arc::new(db::SqliteConnectionStore::new(db.clone()));
        let registry =
            SyncRegistry::init(store, executor, enhancer, RegistryOptions::from(&config)).await?;

        Ok(Self {
            db,
            registry: Arc::new(registry),
        })
    }

    /// 清理资源（应用关闭时调用）
    pub async fn cleanup(&self) {
        tracing::info!("正在清理应用资源...");

        // 1. 停止所有连接运行时，取消进行中的同步
        self.registry.dispose().await;

        // 2. 关闭数据库连接池
        tracing::debug!("关闭数据库连接池...");
        self.db.close().await;

        tracing::info!("资源清理完成");
    }
}

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        }
    }

    /// 数据目录
    ///
    /// APISYNC_DATA_DIR 优先；否则读取默认目录 config.json 中的 data_path
    /// （目录必须已存在）；都没有时使用系统配置目录下的 apisync。
    pub fn data_dir() -> PathBuf {
        if let Some(dir) = std::env::var("APISYNC_DATA_DIR")
            .ok()
            .filter(|p| !p.trim().is_empty())
        {
            return PathBuf::from(dir);
        }

        let default_dir = config_dir()
            .map(|p| p.join("apisync"))
            .unwrap_or_else(|| PathBuf::from(".apisync"));

        std::fs::read_to_string(default_dir.join("config.json"))
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .and_then(|config| config.get("data_path")?.as_str().map(PathBuf::from))
            .filter(|p| p.is_dir())
            .unwrap_or(default_dir)
    }
}
