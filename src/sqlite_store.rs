//! SQLite-backed implementation of the core store traits.
//!
//! Every [`ChunkStore`] and [`ConversationStore`] operation maps to one or
//! more statements against the schema created by [`crate::migrate`].
//! `put_chunks`, `complete_attempt`, and `append_turns` run inside a single
//! transaction, so a failure part-way through rolls back and leaves the
//! previous state intact.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use docent_core::embedding::{blob_to_vec, vec_to_blob};
use docent_core::models::{
    Chunk, ConversationTurn, Document, DocumentStatus, NewTurn, RetrievalResult, Role,
};
use docent_core::store::{
    rank_results, score_chunk, validate_chunk_set, ChunkStore, ConversationStore, ScanFilter,
};
use docent_core::tokens::count_tokens;
use docent_core::{Error, Result};

/// SQLite implementation of [`ChunkStore`] and [`ConversationStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// `Ok(false)` for a conditional update that matched nothing on an
    /// existing document, `NotFound` otherwise.
    async fn not_applied(&self, id: &str) -> Result<bool> {
        match self.document(id).await? {
            Some(_) => Ok(false),
            None => Err(Error::NotFound(format!("document {}", id))),
        }
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let label: String = row.get("status");
    let cause: Option<String> = row.get("cause");
    let status = DocumentStatus::from_label(&label, cause)
        .ok_or_else(|| Error::Storage(format!("unknown document status '{}'", label)))?;
    Ok(Document {
        id: row.get("id"),
        origin: row.get("origin"),
        content: row.get("content"),
        status,
        attempt: row.get("attempt"),
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
    })
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let blob: Vec<u8> = row.get("embedding");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        ordinal: row.get::<i64, _>("ordinal") as usize,
        start: row.get::<i64, _>("start_byte") as usize,
        end: row.get::<i64, _>("end_byte") as usize,
        overlap_bytes: row.get::<i64, _>("overlap_bytes") as usize,
        text: row.get("text"),
        token_count: row.get::<i64, _>("token_count") as usize,
        embedding: blob_to_vec(&blob),
        hash: row.get("hash"),
    }
}

fn row_to_turn(row: &SqliteRow) -> Result<ConversationTurn> {
    let role: String = row.get("role");
    Ok(ConversationTurn {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        role: Role::parse(&role)
            .ok_or_else(|| Error::Storage(format!("unknown turn role '{}'", role)))?,
        text: row.get("text"),
        token_count: row.get::<i64, _>("token_count") as usize,
        sequence: row.get::<i64, _>("sequence") as u64,
        created_at: from_millis(row.get("created_at")),
    })
}

/// Delete the document's chunks and insert `chunks` on an open transaction.
async fn replace_chunks(
    conn: &mut SqliteConnection,
    document_id: &str,
    chunks: &[Chunk],
) -> Result<()> {
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *conn)
        .await
        .map_err(Error::storage)?;

    for chunk in chunks {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, ordinal, start_byte, end_byte, overlap_bytes,
                                text, token_count, dims, embedding, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.ordinal as i64)
        .bind(chunk.start as i64)
        .bind(chunk.end as i64)
        .bind(chunk.overlap_bytes as i64)
        .bind(&chunk.text)
        .bind(chunk.token_count as i64)
        .bind(chunk.embedding.len() as i64)
        .bind(vec_to_blob(&chunk.embedding))
        .bind(&chunk.hash)
        .execute(&mut *conn)
        .await
        .map_err(Error::storage)?;
    }
    Ok(())
}

const DOCUMENT_COLUMNS: &str = "id, origin, content, status, cause, attempt, created_at, updated_at";

const CHUNK_COLUMNS: &str = "id, document_id, ordinal, start_byte, end_byte, overlap_bytes, \
                             text, token_count, embedding, hash";

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn create_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, origin, content, status, cause, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.origin)
        .bind(&doc.content)
        .bind(doc.status.label())
        .bind(doc.status.cause())
        .bind(to_millis(doc.created_at))
        .bind(to_millis(doc.updated_at))
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }

    async fn document(&self, id: &str) -> Result<Option<Document>> {
        let sql = format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::storage)?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn set_status(&self, id: &str, status: &DocumentStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE documents SET status = ?, cause = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.label())
        .bind(status.cause())
        .bind(to_millis(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("document {}", id)));
        }
        Ok(())
    }

    async fn transition(
        &self,
        id: &str,
        expected: &DocumentStatus,
        next: &DocumentStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET status = ?, cause = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(next.label())
        .bind(next.cause())
        .bind(to_millis(Utc::now()))
        .bind(id)
        .bind(expected.label())
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        self.not_applied(id).await
    }

    async fn begin_attempt(&self, id: &str, attempt: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'processing', cause = NULL, attempt = ?, updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(attempt)
        .bind(to_millis(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        self.not_applied(id).await
    }

    async fn complete_attempt(&self, id: &str, attempt: &str, chunks: &[Chunk]) -> Result<bool> {
        validate_chunk_set(id, chunks)?;

        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        let claimed = sqlx::query(
            "UPDATE documents SET status = 'ready', cause = NULL, updated_at = ? \
             WHERE id = ? AND status = 'processing' AND attempt = ?",
        )
        .bind(to_millis(Utc::now()))
        .bind(id)
        .bind(attempt)
        .execute(&mut *tx)
        .await
        .map_err(Error::storage)?;
        if claimed.rows_affected() == 0 {
            tx.rollback().await.map_err(Error::storage)?;
            return self.not_applied(id).await;
        }

        replace_chunks(&mut *tx, id, chunks).await?;
        tx.commit().await.map_err(Error::storage)?;
        Ok(true)
    }

    async fn fail_attempt(&self, id: &str, attempt: &str, cause: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'failed', cause = ?, updated_at = ? \
             WHERE id = ? AND status = 'processing' AND attempt = ?",
        )
        .bind(cause)
        .bind(to_millis(Utc::now()))
        .bind(id)
        .bind(attempt)
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        self.not_applied(id).await
    }

    async fn put_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        validate_chunk_set(document_id, chunks)?;

        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::storage)?;
        if !exists {
            return Err(Error::NotFound(format!("document {}", document_id)));
        }

        replace_chunks(&mut *tx, document_id, chunks).await?;

        tx.commit().await.map_err(Error::storage)?;
        Ok(())
    }

    async fn scan(
        &self,
        query: &[f32],
        k: usize,
        filter: &ScanFilter,
    ) -> Result<Vec<RetrievalResult>> {
        let rows = match &filter.document_ids {
            Some(ids) if ids.is_empty() => return Ok(Vec::new()),
            Some(ids) => {
                let placeholders = vec!["?"; ids.len()].join(", ");
                let sql = format!(
                    "SELECT {} FROM chunks WHERE document_id IN ({})",
                    CHUNK_COLUMNS, placeholders
                );
                let mut q = sqlx::query(&sql);
                for id in ids {
                    q = q.bind(id);
                }
                q.fetch_all(&self.pool).await
            }
            None => {
                let sql = format!("SELECT {} FROM chunks", CHUNK_COLUMNS);
                sqlx::query(&sql).fetch_all(&self.pool).await
            }
        }
        .map_err(Error::storage)?;

        let scored = rows
            .iter()
            .map(|row| score_chunk(query, &row_to_chunk(row)))
            .collect();
        Ok(rank_results(scored, k))
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?;
        sqlx::query("DELETE FROM conversation_documents WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?;
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?;
        tx.commit().await.map_err(Error::storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn chunk_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(count as usize)
    }

    async fn document_chunk_count(&self, document_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(count as usize)
    }

    async fn chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let sql = format!(
            "SELECT {} FROM chunks WHERE document_id = ? ORDER BY ordinal",
            CHUNK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn link_document(&self, conversation_id: &str, document_id: &str) -> Result<()> {
        if self.document(document_id).await?.is_none() {
            return Err(Error::NotFound(format!("document {}", document_id)));
        }
        sqlx::query(
            r#"
            INSERT INTO conversation_documents (conversation_id, document_id, linked_at)
            VALUES (?, ?, ?)
            ON CONFLICT(conversation_id, document_id) DO NOTHING
            "#,
        )
        .bind(conversation_id)
        .bind(document_id)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }

    async fn conversation_documents(&self, conversation_id: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT document_id FROM conversation_documents WHERE conversation_id = ? \
             ORDER BY linked_at, rowid",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)
    }

    async fn append_turns(
        &self,
        conversation_id: &str,
        turns: &[NewTurn],
    ) -> Result<Vec<ConversationTurn>> {
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        let last: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM turns WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(Error::storage)?;
        let mut next = last.unwrap_or(0) as u64 + 1;
        let now = Utc::now();

        let mut created = Vec::with_capacity(turns.len());
        for turn in turns {
            let record = ConversationTurn {
                id: uuid::Uuid::new_v4().to_string(),
                conversation_id: conversation_id.to_string(),
                role: turn.role,
                text: turn.text.clone(),
                token_count: count_tokens(&turn.text),
                sequence: next,
                created_at: now,
            };
            sqlx::query(
                r#"
                INSERT INTO turns (id, conversation_id, sequence, role, text, token_count, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.id)
            .bind(&record.conversation_id)
            .bind(record.sequence as i64)
            .bind(record.role.as_str())
            .bind(&record.text)
            .bind(record.token_count as i64)
            .bind(to_millis(record.created_at))
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?;
            created.push(record);
            next += 1;
        }

        tx.commit().await.map_err(Error::storage)?;
        Ok(created)
    }

    async fn history(&self, conversation_id: &str) -> Result<Vec<ConversationTurn>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, sequence, role, text, token_count, created_at \
             FROM turns WHERE conversation_id = ? ORDER BY sequence",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;
        rows.iter().map(row_to_turn).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use docent_core::chunk::{chunk, make_chunk};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn chunks_for(doc_id: &str, text: &str) -> Vec<Chunk> {
        chunk(text, 4, 1)
            .unwrap()
            .iter()
            .map(|s| make_chunk(doc_id, text, s, vec![s.ordinal as f32 + 1.0, 1.0]))
            .collect()
    }

    #[tokio::test]
    async fn test_document_roundtrip_and_status() {
        let store = store().await;
        let doc = Document::new("a.txt", "hello world");
        store.create_document(&doc).await.unwrap();

        store
            .set_status(&doc.id, &DocumentStatus::failed("boom"))
            .await
            .unwrap();
        let loaded = store.document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.origin, "a.txt");
        assert_eq!(loaded.status, DocumentStatus::failed("boom"));

        assert!(matches!(
            store.set_status("missing", &DocumentStatus::Ready).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_put_chunks_roundtrip() {
        let store = store().await;
        let text = "one two three four five six seven eight nine ten";
        let doc = Document::new("a.txt", text);
        store.create_document(&doc).await.unwrap();
        let chunks = chunks_for(&doc.id, text);
        store.put_chunks(&doc.id, &chunks).await.unwrap();

        let loaded = store.chunks(&doc.id).await.unwrap();
        assert_eq!(loaded.len(), chunks.len());
        assert_eq!(loaded[1].text, chunks[1].text);
        assert_eq!(loaded[1].embedding, chunks[1].embedding);
        assert_eq!(store.chunk_count().await.unwrap(), chunks.len());
    }

    /// A chunk set whose last insert collides with the first chunk's
    /// primary key, so the failure happens inside the transaction.
    fn colliding_chunks(doc_id: &str, text: &str) -> Vec<Chunk> {
        let mut bad = chunks_for(doc_id, text);
        let first_id = bad[0].id.clone();
        if let Some(last) = bad.last_mut() {
            last.id = first_id;
        }
        bad
    }

    #[tokio::test]
    async fn test_put_chunks_rolls_back_mid_write_failure() {
        let store = store().await;
        let text = "one two three four five six seven eight nine ten";
        let doc = Document::new("a.txt", text);
        store.create_document(&doc).await.unwrap();
        let original = chunks_for(&doc.id, text);
        store.put_chunks(&doc.id, &original).await.unwrap();

        assert!(matches!(
            store.put_chunks(&doc.id, &colliding_chunks(&doc.id, text)).await,
            Err(Error::Storage(_))
        ));

        let loaded = store.chunks(&doc.id).await.unwrap();
        assert_eq!(loaded.len(), original.len());
        assert_eq!(loaded[0].id, original[0].id);
    }

    #[tokio::test]
    async fn test_put_chunks_mid_write_failure_on_fresh_document_stores_nothing() {
        let store = store().await;
        let text = "one two three four five six seven eight nine ten";
        let doc = Document::new("a.txt", text);
        store.create_document(&doc).await.unwrap();

        let bad = colliding_chunks(&doc.id, text);
        assert!(bad.len() >= 2);
        assert!(matches!(
            store.put_chunks(&doc.id, &bad).await,
            Err(Error::Storage(_))
        ));

        assert!(store.chunks(&doc.id).await.unwrap().is_empty());
        assert_eq!(store.document_chunk_count(&doc.id).await.unwrap(), 0);
        assert_eq!(store.chunk_count().await.unwrap(), 0);
        assert!(store
            .scan(&[1.0, 1.0], 10, &ScanFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_complete_attempt_is_owned_and_atomic() {
        let store = store().await;
        let text = "one two three four five six seven eight nine ten";
        let doc = Document::new("a.txt", text);
        store.create_document(&doc).await.unwrap();
        assert!(store.begin_attempt(&doc.id, "first").await.unwrap());

        // Cancelled, retried, and claimed again by a newer attempt.
        store
            .set_status(&doc.id, &DocumentStatus::failed("Cancelled"))
            .await
            .unwrap();
        store.set_status(&doc.id, &DocumentStatus::Pending).await.unwrap();
        assert!(store.begin_attempt(&doc.id, "second").await.unwrap());

        let chunks = chunks_for(&doc.id, text);
        assert!(!store.complete_attempt(&doc.id, "first", &chunks).await.unwrap());
        assert!(!store.fail_attempt(&doc.id, "first", "late").await.unwrap());
        assert_eq!(store.document_chunk_count(&doc.id).await.unwrap(), 0);

        // A failing write leaves the owner still processing with no chunks.
        assert!(store
            .complete_attempt(&doc.id, "second", &colliding_chunks(&doc.id, text))
            .await
            .is_err());
        let loaded = store.document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Processing);
        assert_eq!(loaded.attempt.as_deref(), Some("second"));
        assert_eq!(store.document_chunk_count(&doc.id).await.unwrap(), 0);

        assert!(store.complete_attempt(&doc.id, "second", &chunks).await.unwrap());
        let loaded = store.document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Ready);
        assert_eq!(
            store.document_chunk_count(&doc.id).await.unwrap(),
            chunks.len()
        );
        assert!(store
            .complete_attempt("missing", "second", &[])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_migrate_adds_attempt_column_to_old_schema() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE documents (id TEXT PRIMARY KEY, origin TEXT NOT NULL, \
             content TEXT NOT NULL, status TEXT NOT NULL DEFAULT 'pending', cause TEXT, \
             created_at INTEGER NOT NULL, updated_at INTEGER NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        migrate_pool(&pool).await.unwrap();
        migrate_pool(&pool).await.unwrap();

        let store = SqliteStore::new(pool);
        let doc = Document::new("a.txt", "x");
        store.create_document(&doc).await.unwrap();
        assert!(store.begin_attempt(&doc.id, "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_respects_filter() {
        let store = store().await;
        let a = Document::new("a", "alpha");
        let b = Document::new("b", "beta");
        store.create_document(&a).await.unwrap();
        store.create_document(&b).await.unwrap();
        store.put_chunks(&a.id, &chunks_for(&a.id, "alpha")).await.unwrap();
        store.put_chunks(&b.id, &chunks_for(&b.id, "beta")).await.unwrap();

        let all = store.scan(&[1.0, 1.0], 10, &ScanFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        let only_a = store
            .scan(&[1.0, 1.0], 10, &ScanFilter::documents(vec![a.id.clone()]))
            .await
            .unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].document_id, a.id);
        assert!(store
            .scan(&[1.0, 1.0], 10, &ScanFilter::documents(vec![]))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_cascades_to_chunks_and_links() {
        let store = store().await;
        let doc = Document::new("a", "alpha beta");
        store.create_document(&doc).await.unwrap();
        store.put_chunks(&doc.id, &chunks_for(&doc.id, "alpha beta")).await.unwrap();
        store.link_document("c1", &doc.id).await.unwrap();

        assert!(store.delete_document(&doc.id).await.unwrap());
        assert_eq!(store.chunk_count().await.unwrap(), 0);
        assert!(store.conversation_documents("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_turns_are_gapless() {
        let store = store().await;
        store
            .append_turns("c", &[NewTurn::user("q1"), NewTurn::assistant("a1")])
            .await
            .unwrap();
        store
            .append_turns("c", &[NewTurn::user("q2"), NewTurn::assistant("a2")])
            .await
            .unwrap();
        let history = store.history("c").await.unwrap();
        let seqs: Vec<u64> = history.iter().map(|t| t.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert_eq!(history[3].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_transition_compare_and_set() {
        let store = store().await;
        let doc = Document::new("a", "x");
        store.create_document(&doc).await.unwrap();
        assert!(store
            .transition(&doc.id, &DocumentStatus::Pending, &DocumentStatus::Processing)
            .await
            .unwrap());
        assert!(!store
            .transition(&doc.id, &DocumentStatus::Pending, &DocumentStatus::Processing)
            .await
            .unwrap());
        assert!(store
            .transition("missing", &DocumentStatus::Pending, &DocumentStatus::Ready)
            .await
            .is_err());
    }
}
