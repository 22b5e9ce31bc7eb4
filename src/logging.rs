//! 日志模块 - 文件日志（按大小轮转）和控制台输出

use crate::config::{load_section, save_section};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

const LOG_FILE: &str = "apisync.log";

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否写日志文件
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "log")
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "log", self)
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

type SharedFile = Arc<Mutex<Option<BufWriter<File>>>>;

/// 带大小限制的日志写入器，超过上限时把当前文件改名为 .old
#[derive(Clone)]
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    writer: SharedFile,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE);
        let max_size = (max_size_mb.max(1) as u64) * 1024 * 1024;
        let writer = open_file(&file_path, max_size)?;

        Ok(Self {
            file_path,
            max_size,
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// 超过上限时轮转
    fn rotate_if_needed(&self, guard: &mut MutexGuard<'_, Option<BufWriter<File>>>) -> io::Result<()> {
        let size = fs::metadata(&self.file_path).map(|m| m.len()).unwrap_or(0);
        if size <= self.max_size {
            return Ok(());
        }

        if let Some(mut w) = guard.take() {
            let _ = w.flush();
        }
        rotate_log(&self.file_path)?;
        **guard = Some(open_file(&self.file_path, self.max_size)?);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<BufWriter<File>>> {
        // 写日志时 panic 不应让后续日志全部失效
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn open_file(file_path: &Path, max_size: u64) -> io::Result<BufWriter<File>> {
    if let Ok(metadata) = fs::metadata(file_path) {
        if metadata.len() > max_size {
            rotate_log(file_path)?;
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(file_path)?;
    Ok(BufWriter::new(file))
}

/// 轮转日志文件: apisync.log -> apisync.log.old
fn rotate_log(file_path: &Path) -> io::Result<()> {
    let backup_path = file_path.with_extension("log.old");
    if backup_path.exists() {
        fs::remove_file(&backup_path)?;
    }
    fs::rename(file_path, &backup_path)
}

/// 单条日志的写入器
pub struct LogWriter {
    owner: SizeRotatingWriter,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.owner.lock();
        let written = match guard.as_mut() {
            Some(writer) => {
                let n = writer.write(buf)?;
                writer.flush()?;
                n
            }
            None => return Err(io::Error::new(io::ErrorKind::Other, "日志文件不可用")),
        };
        let _ = self.owner.rotate_if_needed(&mut guard);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.owner.lock().as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            owner: self.clone(),
        }
    }
}

/// 获取日志目录（与数据目录一致）
pub fn get_log_dir() -> PathBuf {
    crate::dirs::data_dir()
}

/// 初始化全局日志
///
/// 控制台输出总是启用；文件日志由配置中的 enabled 决定。
pub fn init_logging() {
    let log_dir = get_log_dir();
    let _ = fs::create_dir_all(&log_dir);
    let config = LogConfig::load(&log_dir);

    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(config.tracing_level().into());
    for directive in ["hyper=warn", "reqwest=warn", "sqlx=warn", "opendal=warn"] {
        if let Ok(d) = directive.parse() {
            env_filter = env_filter.add_directive(d);
        }
    }

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let file_writer = if config.enabled {
        SizeRotatingWriter::new(&log_dir, config.max_size_mb).ok()
    } else {
        None
    };

    let file_layer = file_writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("apisync-log-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_level_parsing() {
        let mut config = LogConfig::default();
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
        config.level = "DEBUG".into();
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);
        config.level = "nonsense".into();
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_save_keeps_other_sections() {
        let dir = temp_dir();
        fs::write(dir.join("config.json"), r#"{"engine":{"logCapacity":20}}"#).unwrap();

        let config = LogConfig {
            enabled: false,
            max_size_mb: 2,
            level: "warn".into(),
        };
        config.save(&dir).unwrap();

        let loaded = LogConfig::load(&dir);
        assert!(!loaded.enabled);
        assert_eq!(loaded.max_size_mb, 2);
        assert_eq!(loaded.tracing_level(), tracing::Level::WARN);
        assert_eq!(crate::config::AppConfig::load(&dir).engine.logCapacity, 20);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_rotates_when_over_limit() {
        let dir = temp_dir();
        let writer = SizeRotatingWriter::new(&dir, 1).unwrap();

        let chunk = vec![b'x'; 512 * 1024];
        let mut w = writer.make_writer();
        w.write_all(&chunk).unwrap();
        w.write_all(&chunk).unwrap();
        w.write_all(b"tail").unwrap();

        assert!(dir.join("apisync.log.old").exists());
        let current = fs::metadata(writer.file_path()).unwrap().len();
        assert!(current < 1024 * 1024);
        fs::remove_dir_all(&dir).ok();
    }
}
