#![allow(non_snake_case)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::num::NonZeroU32;

/// 日志缓冲区默认容量
pub const DEFAULT_LOG_CAPACITY: usize = 50;

/// 调度时间单位
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    /// 单位对应的毫秒数
    pub fn millis(self) -> i64 {
        match self {
            TimeUnit::Seconds => 1_000,
            TimeUnit::Minutes => 60 * 1_000,
            TimeUnit::Hours => 60 * 60 * 1_000,
        }
    }
}

/// 星期
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Sun,
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
}

impl From<chrono::Weekday> for DayOfWeek {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Sun => DayOfWeek::Sun,
            chrono::Weekday::Mon => DayOfWeek::Mon,
            chrono::Weekday::Tue => DayOfWeek::Tue,
            chrono::Weekday::Wed => DayOfWeek::Wed,
            chrono::Weekday::Thu => DayOfWeek::Thu,
            chrono::Weekday::Fri => DayOfWeek::Fri,
            chrono::Weekday::Sat => DayOfWeek::Sat,
        }
    }
}

/// 同步调度
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub interval: NonZeroU32,
    pub unit: TimeUnit,
    /// 为空表示每天都可以运行
    #[serde(default)]
    pub daysOfWeek: Vec<DayOfWeek>,
}

impl Schedule {
    pub fn new(interval: u32, unit: TimeUnit) -> anyhow::Result<Self> {
        let interval = NonZeroU32::new(interval)
            .ok_or_else(|| anyhow::anyhow!("同步间隔必须大于 0"))?;
        Ok(Self {
            interval,
            unit,
            daysOfWeek: Vec::new(),
        })
    }

    pub fn on_days(mut self, days: impl IntoIterator<Item = DayOfWeek>) -> Self {
        self.daysOfWeek = days.into_iter().collect();
        self
    }

    /// 调度间隔（毫秒）
    pub fn interval_ms(&self) -> i64 {
        i64::from(self.interval.get()) * self.unit.millis()
    }
}

/// 目标存储类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DestinationType {
    /// 文档集合，逐条 upsert
    Document,
    S3,
    WebDav,
    Local,
}

/// 目标存储配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DestinationConfig {
    #[serde(rename = "type")]
    pub typ: DestinationType,
    /// 文档集合名称（document）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// 对象存储中的写入前缀，或本地目录（local）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessKey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secretKey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl DestinationConfig {
    fn empty(typ: DestinationType) -> Self {
        Self {
            typ,
            collection: None,
            path: None,
            bucket: None,
            region: None,
            accessKey: None,
            secretKey: None,
            endpoint: None,
            username: None,
            password: None,
        }
    }

    /// 文档集合目标
    pub fn document(collection: impl Into<String>) -> Self {
        Self {
            collection: Some(collection.into()),
            ..Self::empty(DestinationType::Document)
        }
    }

    /// 本地目录目标
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::empty(DestinationType::Local)
        }
    }

    /// 目标描述是否完整（不做网络检查）
    pub fn is_configured(&self) -> bool {
        match self.typ {
            DestinationType::Document => non_empty(&self.collection),
            DestinationType::Local => non_empty(&self.path),
            DestinationType::S3 => {
                non_empty(&self.bucket)
                    && non_empty(&self.region)
                    && non_empty(&self.accessKey)
                    && non_empty(&self.secretKey)
            }
            DestinationType::WebDav => {
                non_empty(&self.endpoint) && non_empty(&self.username) && non_empty(&self.password)
            }
        }
    }
}

/// 同步连接（用户定义，持久化）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub name: String,
    pub sourceUrl: String,
    pub destination: DestinationConfig,
    pub schedule: Schedule,
}

/// 新建连接的输入（id 由注册表分配）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDraft {
    pub name: String,
    pub sourceUrl: String,
    pub destination: DestinationConfig,
    pub schedule: Schedule,
}

impl ConnectionDraft {
    pub fn into_connection(self, id: String) -> Connection {
        Connection {
            id,
            name: self.name,
            sourceUrl: self.sourceUrl,
            destination: self.destination,
            schedule: self.schedule,
        }
    }
}

/// 同步状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
}

/// 日志级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Error,
}

/// 运行日志条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: u64,
    pub message: String,
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
}

/// 定长日志环形缓冲区，满时淘汰最旧的条目
#[derive(Debug, Clone)]
pub struct LogBuffer {
    capacity: usize,
    next_id: u64,
    entries: VecDeque<LogEntry>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            next_id: 1,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>, timestamp: DateTime<Utc>) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            id: self.next_id,
            message: message.into(),
            level,
            timestamp,
        });
        self.next_id += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 按时间顺序（旧 -> 新）遍历
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&LogEntry> {
        self.entries.back()
    }
}

impl Serialize for LogBuffer {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

/// 连接的运行状态（仅存在于内存中）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub connectionId: String,
    pub paused: bool,
    pub status: SyncStatus,
    pub progress: u8,
    pub lastRunAt: Option<DateTime<Utc>>,
    pub logs: LogBuffer,
}

impl RunState {
    pub fn new(connection_id: impl Into<String>, log_capacity: usize) -> Self {
        Self {
            connectionId: connection_id.into(),
            paused: true,
            status: SyncStatus::Idle,
            progress: 0,
            lastRunAt: None,
            logs: LogBuffer::new(log_capacity),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SyncStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_buffer_keeps_most_recent_in_order() {
        let mut logs = LogBuffer::new(50);
        let now = Utc::now();
        for i in 0..60 {
            logs.push(LogLevel::Info, format!("entry {}", i), now);
        }

        assert_eq!(logs.len(), 50);
        assert_eq!(logs.capacity(), 50);
        let messages: Vec<_> = logs.iter().map(|e| e.message.clone()).collect();
        assert_eq!(messages.first().map(String::as_str), Some("entry 10"));
        assert_eq!(messages.last().map(String::as_str), Some("entry 59"));
        let ids: Vec<_> = logs.iter().map(|e| e.id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_schedule_rejects_zero_interval() {
        assert!(Schedule::new(0, TimeUnit::Seconds).is_err());
        let err = serde_json::from_str::<Schedule>(r#"{"interval":0,"unit":"seconds"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_schedule_json_shape() {
        let schedule: Schedule =
            serde_json::from_str(r#"{"interval":5,"unit":"minutes","daysOfWeek":["mon","fri"]}"#)
                .unwrap();
        assert_eq!(schedule.interval_ms(), 5 * 60 * 1000);
        assert_eq!(schedule.daysOfWeek, vec![DayOfWeek::Mon, DayOfWeek::Fri]);

        let everyday: Schedule = serde_json::from_str(r#"{"interval":1,"unit":"hours"}"#).unwrap();
        assert!(everyday.daysOfWeek.is_empty());
    }

    #[test]
    fn test_destination_is_configured() {
        assert!(DestinationConfig::document("users").is_configured());
        assert!(!DestinationConfig::document("  ").is_configured());
        assert!(DestinationConfig::local("/tmp/out").is_configured());

        let mut s3 = DestinationConfig::empty(DestinationType::S3);
        s3.bucket = Some("b".into());
        assert!(!s3.is_configured());
        s3.region = Some("us-east-1".into());
        s3.accessKey = Some("ak".into());
        s3.secretKey = Some("sk".into());
        assert!(s3.is_configured());
    }

    #[test]
    fn test_new_run_state_is_paused_idle() {
        let state = RunState::new("c1", DEFAULT_LOG_CAPACITY);
        assert!(state.paused);
        assert_eq!(state.status, SyncStatus::Idle);
        assert_eq!(state.progress, 0);
        assert!(state.lastRunAt.is_none());
        assert!(state.logs.is_empty());
    }
}
