//! 基于 opendal 的对象存储目标（S3 / WebDAV / 本地目录）

use super::{BlobSink, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::db::{DestinationConfig, DestinationType};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use opendal::{layers::TimeoutLayer, Operator};
use std::time::Duration;

pub struct ObjectStore {
    operator: Operator,
    name: String,
}

fn required<'a>(value: &'a Option<String>, message: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("{}", message))
}

fn with_timeouts(operator: Operator) -> Operator {
    operator
        .layer(
            TimeoutLayer::default()
                .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
        )
}

impl ObjectStore {
    /// 根据目标配置创建对象存储
    pub async fn from_config(config: &DestinationConfig) -> Result<Self> {
        match config.typ {
            DestinationType::S3 => {
                let bucket = required(&config.bucket, "S3 destination requires bucket")?;
                let region = required(&config.region, "S3 destination requires region")?;
                let access_key = required(&config.accessKey, "S3 destination requires accessKey")?;
                let secret_key = required(&config.secretKey, "S3 destination requires secretKey")?;
                tracing::info!("初始化S3目标: bucket={}, region={}", bucket, region);
                Self::s3(
                    bucket,
                    region,
                    access_key,
                    secret_key,
                    config.endpoint.clone(),
                    config.path.clone(),
                )
            }
            DestinationType::WebDav => {
                let endpoint = required(&config.endpoint, "WebDAV destination requires endpoint")?;
                let username = required(&config.username, "WebDAV destination requires username")?;
                let password = required(&config.password, "WebDAV destination requires password")?;
                tracing::info!("创建WebDAV目标: endpoint={}, root={:?}", endpoint, config.path);
                Self::webdav(endpoint, username, password, config.path.clone()).await
            }
            DestinationType::Local => {
                let path = required(&config.path, "Local destination requires path")?;
                tracing::info!("初始化本地目标: {}", path);
                Self::local(path)
            }
            DestinationType::Document => Err(anyhow::anyhow!(
                "Document destination is not an object store"
            )),
        }
    }

    pub fn s3(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<String>,
        prefix: Option<String>,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);

        if let Some(ref ep) = endpoint {
            builder = builder.endpoint(ep);
        }
        if let Some(ref p) = prefix {
            builder = builder.root(p);
        }

        let operator = with_timeouts(Operator::new(builder)?.finish());
        let name = format!(
            "s3://{}{}",
            bucket,
            prefix
                .as_deref()
                .map(|p| format!("/{}", p.trim_matches('/')))
                .unwrap_or_default()
        );

        Ok(Self { operator, name })
    }

    pub async fn webdav(
        endpoint: &str,
        username: &str,
        password: &str,
        root: Option<String>,
    ) -> Result<Self> {
        use opendal::services::Webdav;

        let mut builder = Webdav::default()
            .endpoint(endpoint)
            .username(username)
            .password(password);

        if let Some(ref r) = root {
            builder = builder.root(r);
        }

        let operator = with_timeouts(Operator::new(builder)?.finish());
        let name = format!(
            "webdav://{}{}",
            endpoint.trim_end_matches('/'),
            root.as_deref()
                .map(|r| format!("/{}", r.trim_start_matches('/')))
                .unwrap_or_default()
        );

        // 某些 WebDAV 服务器需要先创建根目录，失败可忽略
        let _ = operator.create_dir("/").await;

        Ok(Self { operator, name })
    }

    pub fn local(path: &str) -> Result<Self> {
        use opendal::services::Fs;

        std::fs::create_dir_all(path)?;
        let operator = Operator::new(Fs::default().root(path))?.finish();
        Ok(Self {
            operator,
            name: format!("local:{}", path),
        })
    }

    /// 内存对象存储，测试用
    pub fn memory() -> Result<Self> {
        use opendal::services::Memory;

        let operator = Operator::new(Memory::default())?.finish();
        Ok(Self {
            operator,
            name: "memory://".to_string(),
        })
    }

    pub async fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(self.operator.read(path).await?.to_vec())
    }
}

#[async_trait]
impl BlobSink for ObjectStore {
    async fn write_object(&self, path: &str, content: Bytes) -> Result<()> {
        self.operator.write(path, content).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
