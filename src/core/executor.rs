//! 同步执行器 - 单次「拉取 -> 校验 -> 写入」
//!
//! 进度和日志通过事件通道上报；执行器本身不重试，重试由下一次调度完成。

use crate::core::error::SyncError;
use crate::core::source::Source;
use crate::db::{Connection, LogLevel};
use crate::storage::{Sink, SinkProvider};
use bytes::Bytes;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 执行过程中上报的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Progress(u8),
    Log { level: LogLevel, message: String },
}

/// 一次成功同步的结果
#[derive(Debug, Clone)]
pub struct SyncedPayload {
    /// 拉取到的原始数据，供调用方预览或下载
    pub payload: Value,
    pub records_written: usize,
    pub records_skipped: usize,
    /// 对象目标写入的路径
    pub object_path: Option<String>,
    pub sink_name: String,
}

impl SyncedPayload {
    /// 运行日志中的成功描述
    pub fn summary(&self) -> String {
        match &self.object_path {
            Some(path) => format!("同步完成: 已写入 {} ({})", path, self.sink_name),
            None if self.records_skipped > 0 => format!(
                "同步完成: 写入 {} 条记录，跳过 {} 条 ({})",
                self.records_written, self.records_skipped, self.sink_name
            ),
            None => format!(
                "同步完成: 写入 {} 条记录 ({})",
                self.records_written, self.sink_name
            ),
        }
    }
}

pub struct SyncExecutor {
    source: Arc<dyn Source>,
    sinks: Arc<dyn SinkProvider>,
}

/// 等待 future，令牌触发时放弃并返回 Aborted
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, SyncError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Aborted),
        out = fut => Ok(out),
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), SyncError> {
    if cancel.is_cancelled() {
        Err(SyncError::Aborted)
    } else {
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "布尔值",
        Value::Number(_) => "数字",
        Value::String(_) => "字符串",
        Value::Array(_) => "数组",
        Value::Object(_) => "对象",
    }
}

/// 记录自身的 `id` 字段优先，否则生成一个随机 id
pub fn record_id(record: &Map<String, Value>) -> String {
    match record.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录写入进度：25% 之后线性增长到 100%
pub fn record_progress(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let ratio = (index + 1) as f64 / total as f64;
    (25.0 + (ratio * 75.0).round()).min(100.0) as u8
}

/// 对象路径，按时间戳命名
fn object_path(now: chrono::DateTime<chrono::Utc>) -> String {
    format!("{}.json", now.format("%Y%m%dT%H%M%S%.3fZ"))
}

impl SyncExecutor {
    pub fn new(source: Arc<dyn Source>, sinks: Arc<dyn SinkProvider>) -> Self {
        Self { source, sinks }
    }

    async fn emit(events: &Option<mpsc::Sender<SyncEvent>>, event: SyncEvent) {
        if let Some(tx) = events {
            let _ = tx.send(event).await;
        }
    }

    /// 执行一次同步
    pub async fn execute(
        &self,
        connection: &Connection,
        cancel: &CancellationToken,
        events: Option<mpsc::Sender<SyncEvent>>,
    ) -> Result<SyncedPayload, SyncError> {
        // 1. 配置校验，不发起网络请求
        if connection.sourceUrl.trim().is_empty() {
            return Err(SyncError::Configuration("缺少源地址".to_string()));
        }
        if !connection.destination.is_configured() {
            return Err(SyncError::Configuration(format!(
                "目标 {:?} 配置不完整",
                connection.destination.typ
            )));
        }
        check_cancelled(cancel)?;

        info!("开始同步: {} ({})", connection.name, connection.id);

        // 2. 拉取数据
        Self::emit(&events, SyncEvent::Progress(10)).await;
        let response = cancellable(cancel, self.source.get(&connection.sourceUrl))
            .await?
            .map_err(|e| SyncError::SourceRequest(e.to_string()))?;
        Self::emit(&events, SyncEvent::Progress(25)).await;

        // 3. 状态码
        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(SyncError::SourceFetch {
                status,
                status_text: response.status_text(),
            });
        }

        // 4. 解析 JSON
        let body = cancellable(cancel, response.bytes())
            .await?
            .map_err(|e| SyncError::SourceRequest(e.to_string()))?;
        let payload: Value =
            serde_json::from_slice(&body).map_err(|e| SyncError::SourceParse(e.to_string()))?;
        check_cancelled(cancel)?;

        let sink = cancellable(cancel, self.sinks.open(&connection.destination))
            .await?
            .map_err(|e| SyncError::SinkWrite(format!("目标存储连接失败: {}", e)))?;
        let sink_name = sink.name().to_string();

        // 5. 记录目标只接受数组，按实际打开的目标判断
        let items = match (&sink, &payload) {
            (Sink::Records { .. }, Value::Array(items)) => items.as_slice(),
            (Sink::Records { .. }, other) => {
                return Err(SyncError::PayloadShape {
                    expected: "对象数组",
                    actual: json_kind(other),
                })
            }
            (Sink::Blob(_), _) => &[],
        };

        // 6. 写入
        let result = match sink {
            Sink::Records { sink, collection } => {
                let total = items.len();
                let mut written = 0;
                let mut skipped = 0;

                for (index, item) in items.iter().enumerate() {
                    check_cancelled(cancel)?;

                    let Some(record) = item.as_object() else {
                        warn!("第 {} 项不是对象，已跳过", index);
                        skipped += 1;
                        Self::emit(
                            &events,
                            SyncEvent::Log {
                                level: LogLevel::Error,
                                message: format!(
                                    "第 {} 项不是对象（{}），已跳过",
                                    index,
                                    json_kind(item)
                                ),
                            },
                        )
                        .await;
                        Self::emit(&events, SyncEvent::Progress(record_progress(index, total)))
                            .await;
                        continue;
                    };

                    let id = record_id(record);
                    cancellable(cancel, sink.upsert(&collection, &id, record))
                        .await?
                        .map_err(|e| SyncError::SinkWrite(format!("记录 {}: {}", id, e)))?;
                    written += 1;

                    Self::emit(&events, SyncEvent::Progress(record_progress(index, total))).await;
                }

                debug!("写入 {} 条记录，跳过 {} 条", written, skipped);
                SyncedPayload {
                    payload: Value::Null,
                    records_written: written,
                    records_skipped: skipped,
                    object_path: None,
                    sink_name,
                }
            }
            Sink::Blob(sink) => {
                let content = serde_json::to_vec_pretty(&payload)
                    .map_err(|e| SyncError::SinkWrite(e.to_string()))?;
                let path = object_path(chrono::Utc::now());
                cancellable(cancel, sink.write_object(&path, Bytes::from(content)))
                    .await?
                    .map_err(|e| SyncError::SinkWrite(e.to_string()))?;

                SyncedPayload {
                    payload: Value::Null,
                    records_written: 0,
                    records_skipped: 0,
                    object_path: Some(path),
                    sink_name,
                }
            }
        };

        // 7. 最终的取消检查
        check_cancelled(cancel)?;
        Self::emit(&events, SyncEvent::Progress(100)).await;

        info!("同步完成: {} ({})", connection.name, connection.id);
        Ok(SyncedPayload { payload, ..result })
    }
}
