//! 应用配置模块
//!
//! 所有配置都保存在数据目录的 config.json 中，各模块各占一个字段。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

/// 同步引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct EngineConfig {
    /// 运行时检查调度的间隔（毫秒）
    #[serde(default = "default_tick_interval_ms")]
    pub tickIntervalMs: u64,
    /// 每个连接保留的运行日志条数
    #[serde(default = "default_log_capacity")]
    pub logCapacity: usize,
    /// 拉取数据源的超时（秒），0 表示不限制
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetchTimeoutSecs: u64,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_log_capacity() -> usize {
    crate::db::DEFAULT_LOG_CAPACITY
}

fn default_fetch_timeout_secs() -> u64 {
    60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tickIntervalMs: default_tick_interval_ms(),
            logCapacity: default_log_capacity(),
            fetchTimeoutSecs: default_fetch_timeout_secs(),
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tickIntervalMs.max(1))
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetchTimeoutSecs > 0).then(|| Duration::from_secs(self.fetchTimeoutSecs))
    }
}

/// 失败通知配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct NotificationConfig {
    /// 错误消息增强服务地址，为空时不启用
    #[serde(default)]
    pub enhancerUrl: Option<String>,
    #[serde(default = "default_enhancer_timeout_secs")]
    pub enhancerTimeoutSecs: u64,
}

fn default_enhancer_timeout_secs() -> u64 {
    10
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enhancerUrl: None,
            enhancerTimeoutSecs: default_enhancer_timeout_secs(),
        }
    }
}

impl NotificationConfig {
    pub fn enhancer_url(&self) -> Option<&str> {
        self.enhancerUrl
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn enhancer_timeout(&self) -> Duration {
        Duration::from_secs(self.enhancerTimeoutSecs)
    }
}

/// config.json 中与引擎相关的全部配置
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub notifications: NotificationConfig,
}

impl AppConfig {
    pub fn load(config_dir: &Path) -> Self {
        Self {
            engine: load_section(config_dir, "engine"),
            notifications: load_section(config_dir, "notifications"),
        }
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "engine", &self.engine)?;
        save_section(config_dir, "notifications", &self.notifications)
    }
}

/// 读取一个配置字段，文件缺失或格式错误时使用默认值
pub fn load_section<T: DeserializeOwned + Default>(config_dir: &Path, key: &str) -> T {
    let config_file = config_dir.join("config.json");
    if config_file.exists() {
        if let Ok(content) = fs::read_to_string(&config_file) {
            if let Ok(config) = serde_json::from_str::<serde_json::Value>(&content) {
                if let Some(section) = config.get(key) {
                    match serde_json::from_value::<T>(section.clone()) {
                        Ok(value) => return value,
                        Err(e) => tracing::warn!("配置项 {} 格式错误，使用默认值: {}", key, e),
                    }
                }
            }
        }
    }
    T::default()
}

/// 更新一个配置字段，保留文件中的其他字段
pub fn save_section<T: Serialize>(config_dir: &Path, key: &str, value: &T) -> io::Result<()> {
    let config_file = config_dir.join("config.json");

    // 读取现有配置
    let mut config: serde_json::Value = if config_file.exists() {
        let content = fs::read_to_string(&config_file)?;
        serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
    } else {
        serde_json::json!({})
    };
    if !config.is_object() {
        config = serde_json::json!({});
    }

    config[key] = serde_json::to_value(value)?;
    fs::write(&config_file, serde_json::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("apisync-config-{}-{}", name, uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_defaults_when_missing() {
        let dir = temp_dir("missing");
        let config = AppConfig::load(&dir);
        assert_eq!(config.engine.tickIntervalMs, 1000);
        assert_eq!(config.engine.logCapacity, 50);
        assert_eq!(config.engine.fetch_timeout(), Some(Duration::from_secs(60)));
        assert!(config.notifications.enhancer_url().is_none());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_section_and_other_keys_preserved() {
        let dir = temp_dir("partial");
        fs::write(
            dir.join("config.json"),
            r#"{"log":{"level":"debug"},"engine":{"fetchTimeoutSecs":0},"notifications":{"enhancerUrl":"  "}}"#,
        )
        .unwrap();

        let config = AppConfig::load(&dir);
        assert_eq!(config.engine.fetch_timeout(), None);
        assert_eq!(config.engine.logCapacity, 50);
        assert!(config.notifications.enhancer_url().is_none());

        let mut edited = config.clone();
        edited.engine.logCapacity = 10;
        edited.save(&dir).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join("config.json")).unwrap()).unwrap();
        assert_eq!(raw["log"]["level"], "debug");
        assert_eq!(AppConfig::load(&dir).engine.logCapacity, 10);
        fs::remove_dir_all(&dir).ok();
    }
}
