//! 错误消息增强（可选）
//!
//! 只用于修饰写入运行日志的错误文本，失败时原样使用原始消息。

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait MessageEnhancer: Send + Sync {
    async fn enhance(&self, message: &str) -> Result<String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnhanceRequest<'a> {
    error_message: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnhanceResponse {
    enhanced_message: String,
}

/// 通过 HTTP 接口增强错误消息
pub struct WebhookEnhancer {
    client: reqwest::Client,
    url: String,
}

impl WebhookEnhancer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl MessageEnhancer for WebhookEnhancer {
    async fn enhance(&self, message: &str) -> Result<String> {
        let response: EnhanceResponse = self
            .client
            .post(&self.url)
            .json(&EnhanceRequest {
                error_message: message,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.enhanced_message.trim().is_empty() {
            anyhow::bail!("empty enhanced message");
        }
        Ok(response.enhanced_message)
    }
}

/// 尝试增强消息；未配置、出错或超时都返回原始消息
pub async fn enhance_or_raw(
    enhancer: Option<&Arc<dyn MessageEnhancer>>,
    message: String,
    timeout: Duration,
) -> String {
    let Some(enhancer) = enhancer else {
        return message;
    };

    match tokio::time::timeout(timeout, enhancer.enhance(&message)).await {
        Ok(Ok(enhanced)) => enhanced,
        Ok(Err(e)) => {
            tracing::debug!("错误消息增强失败，使用原始消息: {}", e);
            message
        }
        Err(_) => {
            tracing::debug!("错误消息增强超时，使用原始消息");
            message
        }
    }
}
