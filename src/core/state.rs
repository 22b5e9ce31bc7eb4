//! 连接与运行状态 - 所有状态变更的唯一入口
//!
//! 每次变更都是按连接 id 原子应用的一个 [`Transition`]，应用后广播新的快照。

use crate::db::{Connection, LogLevel, RunState, SyncStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// 单个连接的状态变更
#[derive(Debug, Clone)]
pub enum Transition {
    /// 开始一次同步；`manual` 为 true 时忽略暂停标志
    Begin { manual: bool },
    Progress(u8),
    Log { level: LogLevel, message: String },
    Succeeded { at: DateTime<Utc>, message: String },
    Failed { at: DateTime<Utc>, message: String },
    /// 预期的取消，回到 Idle 且不记日志
    Aborted,
    TogglePause,
    ClearError,
}

/// 状态变更通知
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStateEvent {
    pub connection_id: String,
    pub state: RunState,
}

#[derive(Default)]
struct Inner {
    /// 保持创建顺序
    connections: Vec<Connection>,
    runs: HashMap<String, RunState>,
    /// 最近一次成功同步的数据
    payloads: HashMap<String, Arc<serde_json::Value>>,
}

pub struct SyncState {
    inner: RwLock<Inner>,
    log_capacity: usize,
    events: broadcast::Sender<RunStateEvent>,
}

impl SyncState {
    pub fn new(log_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: RwLock::new(Inner::default()),
            log_capacity,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunStateEvent> {
        self.events.subscribe()
    }

    fn publish(&self, run: &RunState) {
        // 没有订阅者时发送失败，忽略
        let _ = self.events.send(RunStateEvent {
            connection_id: run.connectionId.clone(),
            state: run.clone(),
        });
    }

    /// 对一个连接应用变更，生效时返回变更后的快照
    ///
    /// 连接不存在（例如已被移除）时不做任何事。
    pub async fn apply(&self, id: &str, transition: Transition) -> Option<RunState> {
        let mut inner = self.inner.write().await;
        let run = inner.runs.get_mut(id)?;

        let now = Utc::now();
        let applied = match transition {
            Transition::Begin { manual } => {
                if run.is_running() || (run.paused && !manual) {
                    false
                } else {
                    run.status = SyncStatus::Running;
                    run.progress = 0;
                    true
                }
            }
            Transition::Progress(p) => {
                run.progress = p.min(100);
                true
            }
            Transition::Log { level, message } => {
                run.logs.push(level, message, now);
                true
            }
            Transition::Succeeded { at, message } => {
                run.status = SyncStatus::Succeeded;
                run.progress = 100;
                run.lastRunAt = Some(at);
                run.logs.push(LogLevel::Success, message, now);
                true
            }
            Transition::Failed { at, message } => {
                run.status = SyncStatus::Failed;
                run.lastRunAt = Some(at);
                run.logs.push(LogLevel::Error, message, now);
                true
            }
            Transition::Aborted => {
                run.status = SyncStatus::Idle;
                run.progress = 0;
                true
            }
            Transition::TogglePause => {
                run.paused = !run.paused;
                let message = if run.paused {
                    "已暂停自动同步"
                } else {
                    "已恢复自动同步"
                };
                run.logs.push(LogLevel::Info, message, now);
                true
            }
            Transition::ClearError => {
                if run.status == SyncStatus::Failed {
                    run.status = SyncStatus::Idle;
                    run.progress = 0;
                    true
                } else {
                    false
                }
            }
        };

        if !applied {
            return None;
        }
        self.publish(run);
        Some(run.clone())
    }

    /// 自动调度用：未暂停且空闲时才返回连接快照和上次运行时间
    pub async fn schedulable(&self, id: &str) -> Option<(Connection, Option<DateTime<Utc>>)> {
        let inner = self.inner.read().await;
        let run = inner.runs.get(id)?;
        if run.paused || run.is_running() {
            return None;
        }
        let connection = inner.connections.iter().find(|c| c.id == id)?.clone();
        Some((connection, run.lastRunAt))
    }

    pub async fn connection(&self, id: &str) -> Option<Connection> {
        self.inner
            .read()
            .await
            .connections
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    pub async fn connections(&self) -> Vec<Connection> {
        self.inner.read().await.connections.clone()
    }

    pub async fn run_state(&self, id: &str) -> Option<RunState> {
        self.inner.read().await.runs.get(id).cloned()
    }

    /// 按连接顺序返回所有运行状态
    pub async fn run_states(&self) -> Vec<RunState> {
        let inner = self.inner.read().await;
        inner
            .connections
            .iter()
            .filter_map(|c| inner.runs.get(&c.id).cloned())
            .collect()
    }

    pub async fn set_payload(&self, id: &str, payload: serde_json::Value) {
        let mut inner = self.inner.write().await;
        if inner.runs.contains_key(id) {
            inner.payloads.insert(id.to_string(), Arc::new(payload));
        }
    }

    pub async fn payload(&self, id: &str) -> Option<Arc<serde_json::Value>> {
        self.inner.read().await.payloads.get(id).cloned()
    }

    /// 用新的连接集合替换当前集合
    ///
    /// 已有连接保留运行状态，新连接获得暂停、空闲的运行状态，
    /// 消失的连接连同运行状态一起删除。
    pub async fn replace_connections(&self, connections: Vec<Connection>) {
        let mut inner = self.inner.write().await;
        inner
            .runs
            .retain(|id, _| connections.iter().any(|c| &c.id == id));
        inner
            .payloads
            .retain(|id, _| connections.iter().any(|c| &c.id == id));
        for c in &connections {
            if !inner.runs.contains_key(&c.id) {
                inner
                    .runs
                    .insert(c.id.clone(), RunState::new(c.id.clone(), self.log_capacity));
            }
        }
        inner.connections = connections;
    }

    pub async fn ids(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .connections
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }
}
