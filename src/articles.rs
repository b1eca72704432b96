//! Article source collaborator.
//!
//! The queue subsystem never owns article CRUD; it only resolves ids to
//! slugs at enqueue time and reads content when the worker generates an
//! embedding. The trait keeps the worker testable against scripted
//! sources.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::models::{now_ms, Article};

#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Fetch one article by id, or `None` if it no longer exists.
    async fn fetch(&self, article_id: &str) -> Result<Option<Article>>;
}

/// Article source reading the article manager's `articles` table.
#[derive(Clone)]
pub struct SqliteArticles {
    pool: SqlitePool,
}

impl SqliteArticles {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace an article. Used by tests and local seeding; the
    /// real article manager writes this table through its own handlers.
    pub async fn upsert(
        &self,
        id: &str,
        slug: &str,
        title: Option<&str>,
        body: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO articles (id, slug, title, body, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                slug = excluded.slug,
                title = excluded.title,
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(slug)
        .bind(title)
        .bind(body)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete an article. Task rows and vectors cascade with it.
    pub async fn delete(&self, article_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM articles WHERE id = ?")
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ArticleSource for SqliteArticles {
    async fn fetch(&self, article_id: &str) -> Result<Option<Article>> {
        let row = sqlx::query("SELECT id, slug, title, body FROM articles WHERE id = ?")
            .bind(article_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Article {
            id: r.get("id"),
            slug: r.get("slug"),
            title: r.get("title"),
            body: r.get("body"),
        }))
    }
}
