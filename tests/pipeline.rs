//! End-to-end tests over a real SQLite database: upload → ingest → link →
//! message → history.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use docent::app::App;
use docent::config::{parse_config, Config};
use docent::embedding::create_embedder;
use docent::generation::Generator;
use docent::sqlite_store::SqliteStore;
use docent_core::context::PromptMessage;
use docent_core::models::{DocumentStatus, Role};
use docent_core::store::ChunkStore;
use docent_core::{Error, Result};

/// Answers "answer N" and records every prompt it was given.
#[derive(Default)]
struct ScriptedGenerator {
    fail: AtomicBool,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, messages: &[PromptMessage]) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::GenerationUnavailable("scripted outage".into()));
        }
        let joined: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        self.prompts.lock().unwrap().push(joined.join("\n"));
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("answer {}", n))
    }
}

fn test_config(root: &std::path::Path) -> Config {
    parse_config(&format!(
        r#"
[db]
path = '{root}/data/docent.sqlite'

[embedding]
provider = "hashing"
dims = 64

[retrieval]
top_k = 4

[agent]
workspace_dir = '{root}/workspace'
"#,
        root = root.display()
    ))
    .unwrap()
}

async fn open_app(root: &std::path::Path, generator: Arc<ScriptedGenerator>) -> (App, Arc<SqliteStore>) {
    let config = test_config(root);
    let pool = docent::db::connect(&config).await.unwrap();
    docent::migrate::migrate_pool(&pool).await.unwrap();
    let store = Arc::new(SqliteStore::new(pool));
    let embedder = create_embedder(&config.embedding).unwrap();
    let app = App::from_parts(config, store.clone(), store.clone(), embedder, generator).unwrap();
    (app, store)
}

async fn ingest_ready(app: &App, content: &str, origin: &str, conversation: &str) -> String {
    let id = app
        .ingest
        .submit_document(content, origin, Some(conversation))
        .await
        .unwrap();
    let progress = app
        .ingest
        .wait_for_terminal(&id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(progress.status, DocumentStatus::Ready, "{:?}", progress);
    id
}

fn words(prefix: &str, n: usize) -> String {
    (0..n)
        .map(|i| format!("{}{}", prefix, i))
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::test]
async fn test_long_document_is_chunked_and_answered() {
    let tmp = TempDir::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::default());
    let (app, store) = open_app(tmp.path(), generator.clone()).await;

    let id = ingest_ready(&app, &words("w", 3000), "long.txt", "c1").await;

    let progress = app.ingest.get_document_status(&id).await.unwrap();
    assert_eq!(progress.chunk_count, 7);
    assert_eq!(app.ingest.total_chunks().await.unwrap(), 7);

    let chunks = store.chunks(&id).await.unwrap();
    let ordinals: Vec<usize> = chunks.iter().map(|c| c.ordinal).collect();
    assert_eq!(ordinals, (0..7).collect::<Vec<_>>());
    assert!(chunks.iter().all(|c| c.embedding.len() == 64));

    let reply = app.conversations.handle_message("c1", "where is w1200").await.unwrap();
    assert_eq!(reply.text, "answer 1");
    assert!(!reply.citations.is_empty());
    assert!(reply.citations.len() <= 4);
    assert!(reply.citations.iter().all(|c| c.document_id == id));
    assert!(reply.citations.iter().all(|c| c.origin == "long.txt"));
    assert!(reply.accounting.total <= reply.accounting.available);

    let prompt = generator.prompts.lock().unwrap()[0].clone();
    assert!(prompt.contains("where is w1200"));
}

#[tokio::test]
async fn test_conversations_only_see_linked_documents() {
    let tmp = TempDir::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::default());
    let (app, _store) = open_app(tmp.path(), generator.clone()).await;

    let rust = ingest_ready(&app, "cargo builds rust crates quickly", "rust.md", "c1").await;
    let python = ingest_ready(&app, "pip installs python packages slowly", "python.md", "c2").await;

    let reply = app.conversations.handle_message("c1", "how do packages install").await.unwrap();
    assert!(!reply.citations.is_empty());
    assert!(reply.citations.iter().all(|c| c.document_id == rust));

    let reply = app.conversations.handle_message("c2", "how do crates build").await.unwrap();
    assert!(!reply.citations.is_empty());
    assert!(reply.citations.iter().all(|c| c.document_id == python));

    // A conversation with no linked documents retrieves nothing.
    let reply = app.conversations.handle_message("c3", "anything").await.unwrap();
    assert!(reply.citations.is_empty());

    // Linking a second document widens the conversation's search space.
    app.conversations.link_document("c1", &python).await.unwrap();
    let reply = app.conversations.handle_message("c1", "pip or cargo").await.unwrap();
    let mut docs: Vec<&str> = reply.citations.iter().map(|c| c.document_id.as_str()).collect();
    docs.sort();
    docs.dedup();
    assert_eq!(docs.len(), 2);
}

#[tokio::test]
async fn test_failed_generation_leaves_history_unchanged() {
    let tmp = TempDir::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::default());
    let (app, _store) = open_app(tmp.path(), generator.clone()).await;

    app.conversations.handle_message("c1", "first").await.unwrap();

    generator.fail.store(true, Ordering::SeqCst);
    let err = app.conversations.handle_message("c1", "second").await.unwrap_err();
    assert!(matches!(err, Error::GenerationUnavailable(_)));
    assert_eq!(app.conversations.history("c1").await.unwrap().len(), 2);

    generator.fail.store(false, Ordering::SeqCst);
    app.conversations.handle_message("c1", "third").await.unwrap();

    let history = app.conversations.history("c1").await.unwrap();
    let sequences: Vec<u64> = history.iter().map(|t| t.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
    let texts: Vec<&str> = history.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "answer 1", "third", "answer 2"]);
}

#[tokio::test]
async fn test_concurrent_messages_keep_sequences_gapless() {
    let tmp = TempDir::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::default());
    let (app, _store) = open_app(tmp.path(), generator).await;

    let mut handles = Vec::new();
    for i in 0..6 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            app.conversations
                .handle_message("busy", &format!("question {}", i))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let history = app.conversations.history("busy").await.unwrap();
    assert_eq!(history.len(), 12);
    for (i, turn) in history.iter().enumerate() {
        assert_eq!(turn.sequence, i as u64 + 1);
        let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
        assert_eq!(turn.role, expected);
    }
}

#[tokio::test]
async fn test_deleted_document_leaves_retrieval() {
    let tmp = TempDir::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::default());
    let (app, _store) = open_app(tmp.path(), generator).await;

    let id = ingest_ready(&app, "ephemeral notes about deployment", "notes.md", "c1").await;
    app.ingest.delete_document(&id).await.unwrap();

    assert!(matches!(
        app.ingest.get_document_status(&id).await,
        Err(Error::NotFound(_))
    ));
    assert_eq!(app.ingest.total_chunks().await.unwrap(), 0);

    let reply = app.conversations.handle_message("c1", "deployment?").await.unwrap();
    assert!(reply.citations.is_empty());
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let id;
    {
        let generator = Arc::new(ScriptedGenerator::default());
        let (app, _store) = open_app(tmp.path(), generator).await;
        id = ingest_ready(&app, &words("k", 800), "k.txt", "c1").await;
        app.conversations.handle_message("c1", "hello").await.unwrap();
    }

    let generator = Arc::new(ScriptedGenerator::default());
    let (app, _store) = open_app(tmp.path(), generator).await;
    let progress = app.ingest.get_document_status(&id).await.unwrap();
    assert_eq!(progress.status, DocumentStatus::Ready);
    assert_eq!(progress.chunk_count, 2);

    let history = app.conversations.history("c1").await.unwrap();
    assert_eq!(history.len(), 2);

    let reply = app.conversations.handle_message("c1", "again").await.unwrap();
    assert_eq!(reply.turns[0].sequence, 3);
    assert!(reply.citations.iter().all(|c| c.document_id == id));
}
