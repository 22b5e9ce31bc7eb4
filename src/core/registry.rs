//! 同步注册表 - 持有所有连接及其运行时
//!
//! 连接集合变化时按 id 做差异对比：新增的启动运行时，删除的停止运行时，
//! 未变化的保持原样（不重启，不丢状态）。

use crate::config::AppConfig;
use crate::core::error::RegistryError;
use crate::core::executor::SyncExecutor;
use crate::core::notify::MessageEnhancer;
use crate::core::runtime::{ConnectionRuntime, RuntimeContext};
use crate::core::state::{RunStateEvent, SyncState, Transition};
use crate::db::{Connection, ConnectionDraft, ConnectionStore, RunState};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

/// 注册表参数
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub tick_interval: Duration,
    pub log_capacity: usize,
    pub enhance_timeout: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for RegistryOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            tick_interval: config.engine.tick_interval(),
            log_capacity: config.engine.logCapacity,
            enhance_timeout: config.notifications.enhancer_timeout(),
        }
    }
}

pub struct SyncRegistry {
    ctx: Arc<RuntimeContext>,
    store: Arc<dyn ConnectionStore>,
    runtimes: Mutex<HashMap<String, ConnectionRuntime>>,
    /// 串行化连接集合的「读取-修改-保存」
    edit_lock: Mutex<()>,
}

impl SyncRegistry {
    /// 从配置存储加载连接并启动运行时
    pub async fn init(
        store: Arc<dyn ConnectionStore>,
        executor: Arc<SyncExecutor>,
        enhancer: Option<Arc<dyn MessageEnhancer>>,
        options: RegistryOptions,
    ) -> anyhow::Result<Self> {
        let connections = dedup(store.load_connections().await?);
        info!("加载 {} 个同步连接", connections.len());

        let state = Arc::new(SyncState::new(options.log_capacity));
        state.replace_connections(connections).await;

        let registry = Self {
            ctx: Arc::new(RuntimeContext {
                state,
                executor,
                enhancer,
                tick_interval: options.tick_interval,
                enhance_timeout: options.enhance_timeout,
            }),
            store,
            runtimes: Mutex::new(HashMap::new()),
            edit_lock: Mutex::new(()),
        };
        registry.reconcile().await;
        Ok(registry)
    }

    /// 停止所有运行时（应用关闭时调用）
    pub async fn dispose(&self) {
        let runtimes: Vec<_> = self.runtimes.lock().await.drain().map(|(_, rt)| rt).collect();
        info!("停止 {} 个连接运行时", runtimes.len());
        futures::future::join_all(runtimes.into_iter().map(ConnectionRuntime::shutdown)).await;
    }

    // ============ 连接管理 ============

    /// 新建连接，分配 id，运行状态默认暂停
    pub async fn create(&self, draft: ConnectionDraft) -> Result<Connection, RegistryError> {
        let _guard = self.edit_lock.lock().await;

        let connection = draft.into_connection(uuid::Uuid::new_v4().to_string());
        let mut next = self.ctx.state.connections().await;
        next.push(connection.clone());
        self.commit(next).await?;

        info!("创建连接: {} ({})", connection.name, connection.id);
        Ok(connection)
    }

    /// 按 id 整体替换连接，保留其运行状态
    pub async fn update(&self, connection: Connection) -> Result<Connection, RegistryError> {
        let _guard = self.edit_lock.lock().await;

        let mut next = self.ctx.state.connections().await;
        let slot = next
            .iter_mut()
            .find(|c| c.id == connection.id)
            .ok_or_else(|| RegistryError::NotFound(connection.id.clone()))?;
        *slot = connection.clone();
        self.commit(next).await?;

        info!("更新连接: {} ({})", connection.name, connection.id);
        Ok(connection)
    }

    /// 删除连接及其运行状态，停止其运行时
    pub async fn remove(&self, id: &str) -> Result<(), RegistryError> {
        let _guard = self.edit_lock.lock().await;

        let current = self.ctx.state.connections().await;
        let before = current.len();
        let next: Vec<_> = current.into_iter().filter(|c| c.id != id).collect();
        if next.len() == before {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        self.commit(next).await?;

        info!("删除连接: {}", id);
        Ok(())
    }

    /// 用外部编辑后的完整列表替换连接集合
    pub async fn replace_connections(
        &self,
        connections: Vec<Connection>,
    ) -> Result<(), RegistryError> {
        let _guard = self.edit_lock.lock().await;
        self.commit(dedup(connections)).await
    }

    /// 先持久化，成功后再应用到内存并对齐运行时
    async fn commit(&self, next: Vec<Connection>) -> Result<(), RegistryError> {
        self.store
            .save_connections(&next)
            .await
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        self.ctx.state.replace_connections(next).await;
        self.reconcile().await;
        Ok(())
    }

    /// 让运行时集合与连接集合一致
    async fn reconcile(&self) {
        let ids = self.ctx.state.ids().await;
        let wanted: HashSet<&String> = ids.iter().collect();

        let mut runtimes = self.runtimes.lock().await;
        let removed: Vec<String> = runtimes
            .keys()
            .filter(|id| !wanted.contains(id))
            .cloned()
            .collect();
        let retired: Vec<ConnectionRuntime> =
            removed.iter().filter_map(|id| runtimes.remove(id)).collect();

        let mut added = 0;
        for id in &ids {
            if !runtimes.contains_key(id) {
                runtimes.insert(id.clone(), ConnectionRuntime::spawn(id.clone(), self.ctx.clone()));
                added += 1;
            }
        }
        drop(runtimes);

        if added > 0 || !retired.is_empty() {
            debug!("运行时对齐: 新增 {}，移除 {}", added, retired.len());
        }
        futures::future::join_all(retired.into_iter().map(ConnectionRuntime::shutdown)).await;
    }

    // ============ 运行控制 ============

    /// 手动触发；正在同步时返回 Ok(false)
    pub async fn trigger(&self, id: &str) -> Result<bool, RegistryError> {
        let runtimes = self.runtimes.lock().await;
        let runtime = runtimes
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        Ok(runtime.trigger().await)
    }

    /// 切换暂停，返回切换后的运行状态
    pub async fn toggle_pause(&self, id: &str) -> Result<RunState, RegistryError> {
        let runtimes = self.runtimes.lock().await;
        let runtime = runtimes
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        runtime
            .toggle_pause()
            .await
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// 清除失败状态，回到 Idle
    pub async fn clear_error(&self, id: &str) -> Result<RunState, RegistryError> {
        match self.ctx.state.apply(id, Transition::ClearError).await {
            Some(run) => Ok(run),
            None => {
                let run = self
                    .ctx
                    .state
                    .run_state(id)
                    .await
                    .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
                warn!("连接 {} 当前不是失败状态，无需清除", id);
                Ok(run)
            }
        }
    }

    // ============ 查询 ============

    pub async fn connections(&self) -> Vec<Connection> {
        self.ctx.state.connections().await
    }

    pub async fn connection(&self, id: &str) -> Option<Connection> {
        self.ctx.state.connection(id).await
    }

    pub async fn run_state(&self, id: &str) -> Option<RunState> {
        self.ctx.state.run_state(id).await
    }

    pub async fn run_states(&self) -> Vec<RunState> {
        self.ctx.state.run_states().await
    }

    /// 最近一次成功同步拉取到的数据
    pub async fn last_payload(&self, id: &str) -> Option<Arc<serde_json::Value>> {
        self.ctx.state.payload(id).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunStateEvent> {
        self.ctx.state.subscribe()
    }

    /// 以流的形式观察状态变化，落后时丢弃积压的事件
    pub fn watch(&self) -> impl Stream<Item = RunStateEvent> {
        BroadcastStream::new(self.subscribe()).filter_map(|event| event.ok())
    }

    /// 当前运行中的运行时数量
    pub async fn runtime_count(&self) -> usize {
        self.runtimes.lock().await.len()
    }
}

/// 按 id 去重，保留第一次出现
fn dedup(connections: Vec<Connection>) -> Vec<Connection> {
    let mut seen = HashSet::new();
    connections
        .into_iter()
        .filter(|c| {
            let fresh = seen.insert(c.id.clone());
            if !fresh {
                warn!("忽略重复的连接 id: {}", c.id);
            }
            fresh
        })
        .collect()
}
