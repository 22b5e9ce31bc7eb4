//! 连接运行时 - 每个连接一个固定频率的 tick 循环
//!
//! 每次 tick 从注册表读取最新的连接配置，到期时启动一次同步。
//! 同一连接同时最多只有一次同步在执行。

use crate::core::executor::{SyncEvent, SyncExecutor};
use crate::core::notify::{enhance_or_raw, MessageEnhancer};
use crate::core::schedule::is_due;
use crate::core::state::{SyncState, Transition};
use crate::db::{Connection, RunState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 所有运行时共享的依赖
pub struct RuntimeContext {
    pub state: Arc<SyncState>,
    pub executor: Arc<SyncExecutor>,
    pub enhancer: Option<Arc<dyn MessageEnhancer>>,
    /// tick 间隔，与调度粒度无关
    pub tick_interval: Duration,
    pub enhance_timeout: Duration,
}

/// 正在执行的同步
struct ActiveAttempt {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    id: String,
    ctx: Arc<RuntimeContext>,
    shutdown: CancellationToken,
    active: Mutex<Option<ActiveAttempt>>,
}

pub struct ConnectionRuntime {
    shared: Arc<Shared>,
    ticker: JoinHandle<()>,
}

impl ConnectionRuntime {
    /// 为连接启动运行时
    pub fn spawn(id: impl Into<String>, ctx: Arc<RuntimeContext>) -> Self {
        let shared = Arc::new(Shared {
            id: id.into(),
            ctx,
            shutdown: CancellationToken::new(),
            active: Mutex::new(None),
        });
        debug!("启动连接运行时: {}", shared.id);
        let ticker = tokio::spawn(shared.clone().tick_loop());
        Self { shared, ticker }
    }

    /// 手动触发一次同步；已在运行时不做任何事并返回 false
    ///
    /// 暂停状态下也会运行一次，但不改变暂停标志。
    pub async fn trigger(&self) -> bool {
        self.shared.launch(true).await
    }

    /// 切换暂停；进入暂停时取消正在进行的同步
    pub async fn toggle_pause(&self) -> Option<RunState> {
        let run = self
            .shared
            .ctx
            .state
            .apply(&self.shared.id, Transition::TogglePause)
            .await?;

        if run.paused {
            if let Some(attempt) = self.shared.active.lock().await.as_ref() {
                info!("连接 {} 已暂停，取消正在进行的同步", self.shared.id);
                attempt.cancel.cancel();
            }
        }
        Some(run)
    }

    /// 停止 tick 循环，取消并等待正在进行的同步
    pub async fn shutdown(self) {
        self.shared.shutdown.cancel();

        let attempt = self.shared.active.lock().await.take();
        if let Some(attempt) = attempt {
            attempt.cancel.cancel();
            let _ = attempt.handle.await;
        }
        let _ = self.ticker.await;
        debug!("连接运行时已停止: {}", self.shared.id);
    }
}

impl Shared {
    async fn tick_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.ctx.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = interval.tick() => self.on_tick().await,
            }
        }
    }

    async fn on_tick(self: &Arc<Self>) {
        // 每次 tick 都重新读取，配置修改在下一次 tick 生效
        let Some((connection, last_run_at)) = self.ctx.state.schedulable(&self.id).await else {
            return;
        };

        if is_due(&connection.schedule, last_run_at, &chrono::Local::now()) {
            debug!("连接 {} 到达调度时间", connection.name);
            self.launch(false).await;
        }
    }

    /// 尝试开始一次同步
    ///
    /// 是否可以开始由注册表在一次原子更新中判定（未在运行，自动触发时未暂停）。
    async fn launch(self: &Arc<Self>, manual: bool) -> bool {
        let mut active = self.active.lock().await;
        if self.shutdown.is_cancelled() {
            return false;
        }

        if self
            .ctx
            .state
            .apply(&self.id, Transition::Begin { manual })
            .await
            .is_none()
        {
            debug!("连接 {} 正在同步或已暂停，跳过", self.id);
            return false;
        }

        let Some(connection) = self.ctx.state.connection(&self.id).await else {
            self.ctx.state.apply(&self.id, Transition::Aborted).await;
            return false;
        };

        if manual {
            info!("手动触发同步: {}", connection.name);
        }

        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(self.clone().run_attempt(connection, cancel.clone()));
        *active = Some(ActiveAttempt { cancel, handle });
        true
    }

    /// 执行一次同步并写回最终状态
    async fn run_attempt(self: Arc<Self>, connection: Connection, cancel: CancellationToken) {
        let (event_tx, mut event_rx) = mpsc::channel::<SyncEvent>(64);

        // 转发执行器事件
        let state = self.ctx.state.clone();
        let id = self.id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let transition = match event {
                    SyncEvent::Progress(p) => Transition::Progress(p),
                    SyncEvent::Log { level, message } => Transition::Log { level, message },
                };
                state.apply(&id, transition).await;
            }
        });

        let result = self
            .ctx
            .executor
            .execute(&connection, &cancel, Some(event_tx))
            .await;
        // 发送端已随 execute 返回而释放，等待剩余事件写完
        let _ = forwarder.await;

        let transition = match result {
            Ok(synced) => {
                let message = synced.summary();
                self.ctx.state.set_payload(&self.id, synced.payload).await;
                Transition::Succeeded {
                    at: chrono::Utc::now(),
                    message,
                }
            }
            Err(e) if e.is_aborted() => {
                info!("同步已取消: {}", connection.name);
                Transition::Aborted
            }
            Err(e) => {
                error!("同步失败: {} - {}", connection.name, e);
                let message = enhance_or_raw(
                    self.ctx.enhancer.as_ref(),
                    format!("同步失败: {}", e),
                    self.ctx.enhance_timeout,
                )
                .await;
                Transition::Failed {
                    at: chrono::Utc::now(),
                    message,
                }
            }
        };

        // 写回终态与清空 active 在同一把锁内完成，之后才允许下一次同步开始
        let mut active = self.active.lock().await;
        self.ctx.state.apply(&self.id, transition).await;
        *active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::tests::{connection, records_sink, StubSource};
    use crate::db::{DestinationConfig, LogLevel, SyncStatus};
    use crate::storage::MemoryRecordSink;
    use std::sync::atomic::Ordering;

    struct Harness {
        state: Arc<SyncState>,
        source: Arc<StubSource>,
        sink: Arc<MemoryRecordSink>,
        ctx: Arc<RuntimeContext>,
    }

    async fn harness(source: StubSource) -> Harness {
        let state = Arc::new(SyncState::new(50));
        state
            .replace_connections(vec![connection(DestinationConfig::document("items"))])
            .await;
        let source = Arc::new(source);
        let sink = Arc::new(MemoryRecordSink::new());
        let executor = Arc::new(SyncExecutor::new(source.clone(), records_sink(&sink)));
        let ctx = Arc::new(RuntimeContext {
            state: state.clone(),
            executor,
            enhancer: None,
            tick_interval: Duration::from_secs(1),
            enhance_timeout: Duration::from_secs(1),
        });
        Harness {
            state,
            source,
            sink,
            ctx,
        }
    }

    async fn wait_until_settled(state: &SyncState, id: &str) -> RunState {
        for _ in 0..1000 {
            let run = state.run_state(id).await.unwrap();
            if run.status != SyncStatus::Running {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("sync did not settle");
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trigger_is_serialized() {
        let h = harness(StubSource::slow(r#"[{"id":1}]"#, Duration::from_secs(5))).await;
        let runtime = ConnectionRuntime::spawn("conn-1", h.ctx.clone());

        assert!(runtime.trigger().await);
        assert!(!runtime.trigger().await);

        let run = wait_until_settled(&h.state, "conn-1").await;
        assert_eq!(run.status, SyncStatus::Succeeded);
        assert_eq!(h.source.calls(), 1);
        assert_eq!(h.source.max_in_flight.load(Ordering::SeqCst), 1);
        // 手动触发不改变暂停标志
        assert!(run.paused);

        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_cancels_running_sync_silently() {
        let h = harness(StubSource::slow(r#"[{"id":1}]"#, Duration::from_secs(30))).await;
        let runtime = ConnectionRuntime::spawn("conn-1", h.ctx.clone());

        // 先恢复，再由 tick 自动启动
        let run = runtime.toggle_pause().await.unwrap();
        assert!(!run.paused);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(
            h.state.run_state("conn-1").await.unwrap().status,
            SyncStatus::Running
        );

        let run = runtime.toggle_pause().await.unwrap();
        assert!(run.paused);

        let run = wait_until_settled(&h.state, "conn-1").await;
        assert_eq!(run.status, SyncStatus::Idle);
        assert!(run.logs.iter().all(|e| e.level != LogLevel::Error));
        assert!(run.lastRunAt.is_none());
        assert_eq!(h.sink.write_count(), 0);

        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_connection_is_not_scheduled() {
        let h = harness(StubSource::json("[]")).await;
        let runtime = ConnectionRuntime::spawn("conn-1", h.ctx.clone());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.source.calls(), 0);

        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_run_then_waits_for_interval() {
        let h = harness(StubSource::json(r#"[{"id":1},{"id":2}]"#)).await;
        let runtime = ConnectionRuntime::spawn("conn-1", h.ctx.clone());
        runtime.toggle_pause().await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        let run = wait_until_settled(&h.state, "conn-1").await;
        assert_eq!(run.status, SyncStatus::Succeeded);
        assert_eq!(run.progress, 100);
        assert!(run.lastRunAt.is_some());
        assert_eq!(run.logs.latest().unwrap().level, LogLevel::Success);
        // 30 秒的间隔按真实时钟计算，几次 tick 内不会再次运行
        assert_eq!(h.source.calls(), 1);
        assert_eq!(h.sink.len("items").await, 2);
        assert!(h.state.payload("conn-1").await.is_some());

        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_logged_and_kept() {
        let h = harness(StubSource::json(r#"{"not":"an array"}"#)).await;
        let runtime = ConnectionRuntime::spawn("conn-1", h.ctx.clone());

        assert!(runtime.trigger().await);
        let run = wait_until_settled(&h.state, "conn-1").await;

        assert_eq!(run.status, SyncStatus::Failed);
        let last = run.logs.latest().unwrap();
        assert_eq!(last.level, LogLevel::Error);
        assert!(last.message.starts_with("同步失败"));

        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_in_flight_attempt() {
        let h = harness(StubSource::slow("[]", Duration::from_secs(60))).await;
        let runtime = ConnectionRuntime::spawn("conn-1", h.ctx.clone());

        assert!(runtime.trigger().await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        runtime.shutdown().await;

        let run = h.state.run_state("conn-1").await.unwrap();
        assert_eq!(run.status, SyncStatus::Idle);
        assert_eq!(h.source.in_flight.load(Ordering::SeqCst), 0);
    }
}
