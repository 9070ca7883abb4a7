//! Ingestion pipeline: deferred, cancellable units of work.
//!
//! [`IngestionPipeline::submit_document`] records a `Pending` document,
//! links it to its conversation, queues a job, and returns the document ID
//! without waiting. A fixed pool of workers drains the queue; each job runs
//! the stages of one document strictly in order:
//!
//! ```text
//! Pending ─▶ Processing ─▶ chunk ─▶ embed_batch ─▶ store chunks and Ready
//!                 │
//!                 └──────────── any failure ──────────────────▶ Failed { cause }
//! ```
//!
//! Each job claims its document under a fresh attempt ID. Chunks are only
//! written together with the `Ready` status, and only while that attempt
//! still owns the document, so a worker never overwrites a status someone
//! else set. Cancellation marks the document `Failed { cause: "Cancelled" }`
//! first and then trips the job's token; a worker that loses that race
//! finds its attempt no longer current and stores nothing. Retrying a
//! failed document re-chunks its stored content from scratch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use docent_core::chunk::{chunk_with, make_chunk, ChunkParams};
use docent_core::embedding::{check_dims, Embedder};
use docent_core::models::{Chunk, Document, DocumentStatus, CANCELLED_CAUSE};
use docent_core::store::{ChunkStore, ConversationStore};
use docent_core::{Error, Result};

use crate::config::IngestConfig;

/// Status snapshot returned by [`IngestionPipeline::get_document_status`].
#[derive(Debug, Clone, Serialize)]
pub struct DocumentProgress {
    pub document_id: String,
    pub origin: String,
    #[serde(flatten)]
    pub status: DocumentStatus,
    pub chunk_count: usize,
}

struct Job {
    document_id: String,
    attempt: String,
    cancel: CancellationToken,
}

/// Live cancellation tokens keyed by document ID, tagged with the attempt
/// of the job that owns them.
type TokenMap = Arc<Mutex<HashMap<String, (String, CancellationToken)>>>;

fn lock(tokens: &TokenMap) -> MutexGuard<'_, HashMap<String, (String, CancellationToken)>> {
    tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to the worker pool. Dropping the last handle closes the queue and
/// lets the workers exit once it drains.
#[derive(Clone)]
pub struct IngestionPipeline {
    store: Arc<dyn ChunkStore>,
    conversations: Arc<dyn ConversationStore>,
    queue: mpsc::Sender<Job>,
    tokens: TokenMap,
}

impl IngestionPipeline {
    /// Spawn `config.workers` workers on the current Tokio runtime.
    pub fn start(
        store: Arc<dyn ChunkStore>,
        conversations: Arc<dyn ConversationStore>,
        embedder: Arc<dyn Embedder>,
        params: ChunkParams,
        config: &IngestConfig,
    ) -> Result<Self> {
        params.validate()?;
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let tokens: TokenMap = Arc::new(Mutex::new(HashMap::new()));

        for index in 0..config.workers.max(1) {
            let worker = Worker {
                store: Arc::clone(&store),
                embedder: Arc::clone(&embedder),
                params,
                tokens: Arc::clone(&tokens),
            };
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => worker.run(job).await,
                        None => break,
                    }
                }
                tracing::debug!(worker = index, "ingestion worker stopped");
            });
        }

        Ok(Self {
            store,
            conversations,
            queue: tx,
            tokens,
        })
    }

    /// Record a new document and queue it for ingestion.
    ///
    /// Returns as soon as the job is queued. When `conversation_id` is
    /// given, the document is linked to that conversation.
    pub async fn submit_document(
        &self,
        content: &str,
        origin: &str,
        conversation_id: Option<&str>,
    ) -> Result<String> {
        if content.trim().is_empty() {
            return Err(Error::InvalidInput("document content is empty".into()));
        }
        let doc = Document::new(origin, content);
        self.store.create_document(&doc).await?;
        if let Some(conversation_id) = conversation_id {
            self.conversations
                .link_document(conversation_id, &doc.id)
                .await?;
        }
        tracing::info!(document_id = %doc.id, origin, "document submitted");
        self.enqueue(&doc.id).await?;
        Ok(doc.id)
    }

    pub async fn get_document_status(&self, document_id: &str) -> Result<DocumentProgress> {
        let doc = self.require(document_id).await?;
        let chunk_count = self.store.document_chunk_count(document_id).await?;
        Ok(DocumentProgress {
            document_id: doc.id,
            origin: doc.origin,
            status: doc.status,
            chunk_count,
        })
    }

    /// Total chunks stored across all documents.
    pub async fn total_chunks(&self) -> Result<usize> {
        self.store.chunk_count().await
    }

    /// Re-run a `Failed` document from its stored content.
    pub async fn retry_document(&self, document_id: &str) -> Result<DocumentProgress> {
        let doc = self.require(document_id).await?;
        if !matches!(doc.status, DocumentStatus::Failed { .. }) {
            return Err(Error::InvalidInput(format!(
                "document {} is {}; only failed documents can be retried",
                document_id,
                doc.status.label()
            )));
        }
        self.store.put_chunks(document_id, &[]).await?;
        if !self
            .store
            .transition(document_id, &doc.status, &DocumentStatus::Pending)
            .await?
        {
            return Err(Error::InvalidInput(format!(
                "document {} changed state during retry",
                document_id
            )));
        }
        tracing::info!(document_id, "document re-queued");
        self.enqueue(document_id).await?;
        self.get_document_status(document_id).await
    }

    /// Mark a pending or processing document `Failed { cause: "Cancelled" }`
    /// and stop its worker.
    pub async fn cancel_document(&self, document_id: &str) -> Result<DocumentProgress> {
        let cancelled = DocumentStatus::failed(CANCELLED_CAUSE);
        loop {
            let doc = self.require(document_id).await?;
            if doc.status.is_terminal() {
                return Err(Error::InvalidInput(format!(
                    "document {} is already {}",
                    document_id,
                    doc.status.label()
                )));
            }
            if self
                .store
                .transition(document_id, &doc.status, &cancelled)
                .await?
            {
                break;
            }
        }
        if let Some((_, token)) = lock(&self.tokens).remove(document_id) {
            token.cancel();
        }
        tracing::info!(document_id, "document cancelled");
        self.get_document_status(document_id).await
    }

    /// Delete a document with its chunks and links, cancelling any job.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        if let Some((_, token)) = lock(&self.tokens).remove(document_id) {
            token.cancel();
        }
        if !self.store.delete_document(document_id).await? {
            return Err(Error::NotFound(format!("document {}", document_id)));
        }
        tracing::info!(document_id, "document deleted");
        Ok(())
    }

    /// Poll until the document reaches `Ready` or `Failed`.
    pub async fn wait_for_terminal(
        &self,
        document_id: &str,
        timeout: Duration,
    ) -> Result<DocumentProgress> {
        let poll = async {
            loop {
                let progress = self.get_document_status(document_id).await?;
                if progress.status.is_terminal() {
                    return Ok(progress);
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| Error::Timeout {
                operation: "ingestion".into(),
                after_ms: timeout.as_millis() as u64,
            })?
    }

    async fn require(&self, document_id: &str) -> Result<Document> {
        self.store
            .document(document_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("document {}", document_id)))
    }

    async fn enqueue(&self, document_id: &str) -> Result<()> {
        let cancel = CancellationToken::new();
        let attempt = uuid::Uuid::new_v4().to_string();
        lock(&self.tokens).insert(document_id.to_string(), (attempt.clone(), cancel.clone()));
        let job = Job {
            document_id: document_id.to_string(),
            attempt,
            cancel,
        };
        if self.queue.send(job).await.is_err() {
            lock(&self.tokens).remove(document_id);
            let cause = "ingestion queue is closed";
            self.store
                .set_status(document_id, &DocumentStatus::failed(cause))
                .await?;
            return Err(Error::Storage(cause.into()));
        }
        Ok(())
    }
}

struct Worker {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    params: ChunkParams,
    tokens: TokenMap,
}

impl Worker {
    async fn run(&self, job: Job) {
        let span = tracing::info_span!("ingest", document_id = %job.document_id);
        self.run_job(&job).instrument(span).await;
        let mut tokens = lock(&self.tokens);
        // A retry may already have registered a newer attempt for this id.
        if tokens
            .get(&job.document_id)
            .is_some_and(|(attempt, _)| *attempt == job.attempt)
        {
            tokens.remove(&job.document_id);
        }
    }

    async fn run_job(&self, job: &Job) {
        let id = job.document_id.as_str();
        if job.cancel.is_cancelled() {
            tracing::debug!("job cancelled before start");
            return;
        }
        match self.store.begin_attempt(id, &job.attempt).await {
            Ok(true) => tracing::info!("processing"),
            Ok(false) => {
                tracing::debug!("document no longer pending; skipping");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "could not start ingestion");
                return;
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = job.cancel.cancelled() => Err(Error::Cancelled),
            result = self.process(id) => result,
        };

        match outcome {
            Ok(chunks) => match self.store.complete_attempt(id, &job.attempt, &chunks).await {
                Ok(true) => tracing::info!(chunks = chunks.len(), "ready"),
                Ok(false) => tracing::info!("superseded before storage; chunks dropped"),
                Err(e) => self.fail(job, &e).await,
            },
            Err(Error::Cancelled) => {
                tracing::info!("ingestion cancelled");
                // Only matches if this job claimed a document retried after
                // its cancellation; otherwise cancel already set the status.
                if let Err(e) = self
                    .store
                    .fail_attempt(id, &job.attempt, CANCELLED_CAUSE)
                    .await
                {
                    tracing::debug!(error = %e, "could not release cancelled attempt");
                }
            }
            Err(e) => self.fail(job, &e).await,
        }
    }

    /// Chunk and embed one document. Nothing is stored here.
    async fn process(&self, id: &str) -> Result<Vec<Chunk>> {
        let doc = self
            .store
            .document(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))?;

        let spans = chunk_with(&doc.content, &self.params)?;
        tracing::debug!(spans = spans.len(), "chunked");

        let texts: Vec<String> = spans
            .iter()
            .map(|span| span.text(&doc.content).to_string())
            .collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                texts.len()
            )));
        }
        check_dims(&vectors, self.embedder.dims())?;

        Ok(spans
            .iter()
            .zip(vectors)
            .map(|(span, vector)| make_chunk(id, &doc.content, span, vector))
            .collect())
    }

    async fn fail(&self, job: &Job, error: &Error) {
        tracing::error!(error = %error, "ingestion failed");
        match self
            .store
            .fail_attempt(&job.document_id, &job.attempt, &error.to_string())
            .await
        {
            Ok(true) | Err(Error::NotFound(_)) => {}
            Ok(false) => tracing::debug!("superseded; failure not recorded"),
            Err(e) => tracing::error!(error = %e, "could not record failure"),
        }
    }
}
