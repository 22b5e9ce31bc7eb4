//! SQLite 文档集合，作为默认的记录目标

use super::RecordSink;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct SqliteDocumentStore {
    db: Arc<SqlitePool>,
    name: String,
}

impl SqliteDocumentStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self {
            db,
            name: "sqlite:documents".to_string(),
        }
    }

    /// 读取单个文档
    pub async fn get(&self, collection: &str, record_id: &str) -> Result<Option<serde_json::Value>> {
        let body: Option<String> =
            sqlx::query_scalar("SELECT body FROM documents WHERE collection = ? AND doc_id = ?")
                .bind(collection)
                .bind(record_id)
                .fetch_optional(&*self.db)
                .await?;

        match body {
            Some(b) => Ok(Some(serde_json::from_str(&b)?)),
            None => Ok(None),
        }
    }

    /// 集合中的文档数
    pub async fn count(&self, collection: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?")
            .bind(collection)
            .fetch_one(&*self.db)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl RecordSink for SqliteDocumentStore {
    async fn upsert(
        &self,
        collection: &str,
        record_id: &str,
        record: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let body = serde_json::to_string(record)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"INSERT INTO documents (collection, doc_id, body, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(collection, doc_id) DO UPDATE SET
                   body = excluded.body,
                   updated_at = excluded.updated_at"#,
        )
        .bind(collection)
        .bind(record_id)
        .bind(&body)
        .bind(now)
        .execute(&*self.db)
        .await?;

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
