//! Vector index collaborator backed by the `article_vectors` table.
//!
//! Embeddings are stored as little-endian f32 blobs. The queue subsystem
//! only upserts and deletes here; similarity search lives with the search
//! side of the article manager.

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use crate::models::now_ms;

#[derive(Clone)]
pub struct VectorIndex {
    pool: SqlitePool,
}

impl VectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(
        &self,
        article_id: &str,
        model: &str,
        dims: usize,
        vector: &[f32],
    ) -> Result<()> {
        let blob = vec_to_blob(vector);

        sqlx::query(
            r#"
            INSERT INTO article_vectors (article_id, model, dims, embedding, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(article_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(article_id)
        .bind(model)
        .bind(dims as i64)
        .bind(&blob)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove an article's vector. Deleting a vector that does not exist
    /// is not an error; delete tasks may run after a cascade already
    /// cleared the row.
    pub async fn delete(&self, article_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM article_vectors WHERE article_id = ?")
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, article_id: &str) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT embedding FROM article_vectors WHERE article_id = ?")
                .bind(article_id)
                .fetch_optional(&self.pool)
                .await?;

        blob.map(|b| blob_to_vec(&b)).transpose()
    }
}

/// Encode a vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

/// Decode a BLOB back into a vector.
pub fn blob_to_vec(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        bail!("Embedding blob length {} is not a multiple of 4", blob.len());
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip() {
        let vector = vec![0.5f32, -1.25, 3.0, 0.0];
        let blob = vec_to_blob(&vector);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_vec(&blob).unwrap(), vector);
    }

    #[test]
    fn blob_rejects_truncated() {
        assert!(blob_to_vec(&[0u8, 1, 2]).is_err());
    }
}
