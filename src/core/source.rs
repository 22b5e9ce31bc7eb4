//! 数据源 - 通用的 HTTP GET
//!
//! 取消通过丢弃 future 完成：执行器在 `select!` 中等待请求，令牌触发时请求随之中止。

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// 已收到响应头的响应
#[async_trait]
pub trait SourceResponse: Send {
    fn status(&self) -> u16;

    fn status_text(&self) -> String;

    /// 读取完整响应体
    async fn bytes(self: Box<Self>) -> Result<Bytes>;
}

#[async_trait]
pub trait Source: Send + Sync {
    async fn get(&self, url: &str) -> Result<Box<dyn SourceResponse>>;
}

/// reqwest 实现
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    /// `timeout` 为 None 时不限制请求总时长
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("apisync/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30));
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

struct HttpResponse(reqwest::Response);

#[async_trait]
impl SourceResponse for HttpResponse {
    fn status(&self) -> u16 {
        self.0.status().as_u16()
    }

    fn status_text(&self) -> String {
        self.0
            .status()
            .canonical_reason()
            .unwrap_or_default()
            .to_string()
    }

    async fn bytes(self: Box<Self>) -> Result<Bytes> {
        Ok(self.0.bytes().await?)
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn get(&self, url: &str) -> Result<Box<dyn SourceResponse>> {
        let response = self.client.get(url).send().await?;
        Ok(Box::new(HttpResponse(response)))
    }
}
