use thiserror::Error;

/// 单次同步尝试的错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 缺少源地址或目标配置，不会发起任何网络请求
    #[error("连接配置不完整: {0}")]
    Configuration(String),

    #[error("源接口返回非成功状态: {status} {status_text}")]
    SourceFetch { status: u16, status_text: String },

    /// 网络层失败（连接、超时、读取响应体）
    #[error("请求源接口失败: {0}")]
    SourceRequest(String),

    #[error("源数据不是合法的 JSON: {0}")]
    SourceParse(String),

    #[error("数据格式不符: 期望 {expected}，实际为 {actual}")]
    PayloadShape {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("写入目标失败: {0}")]
    SinkWrite(String),

    /// 暂停、移除连接或关闭时的预期取消，不记为失败
    #[error("同步已取消")]
    Aborted,
}

impl SyncError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, SyncError::Aborted)
    }
}

/// 注册表命令错误
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("连接不存在: {0}")]
    NotFound(String),

    #[error("保存连接配置失败: {0}")]
    Store(String),
}
