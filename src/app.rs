//! Service wiring.
//!
//! [`App`] builds every long-lived service from a [`Config`]: the SQLite
//! store, the embedding and generation providers, the ingestion worker
//! pool, the conversation service, the tool providers, and the
//! documentation agent. The CLI and the HTTP server both start from here.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use docent_core::chunk::ChunkParams;
use docent_core::context::{ContextBudget, ContextWindowManager};
use docent_core::embedding::Embedder;
use docent_core::protocol::{MethodRegistry, Responder};
use docent_core::store::{ChunkStore, ConversationStore};

use crate::acp::{Caller, InProcessTransport};
use crate::agent::{register_agent_methods, DocAgent};
use crate::config::Config;
use crate::conversation::ConversationService;
use crate::db;
use crate::embedding::create_embedder;
use crate::generation::{create_generator, Generator};
use crate::ingest::IngestionPipeline;
use crate::migrate;
use crate::sqlite_store::SqliteStore;
use crate::tools::{register_tools, Workspace};

/// Queue depth of the in-process tool transport.
const TOOL_QUEUE: usize = 64;

#[derive(Clone)]
pub struct App {
    pub config: Arc<Config>,
    pub ingest: IngestionPipeline,
    pub conversations: Arc<ConversationService>,
    pub agent: DocAgent,
    /// Serves the tool methods and the agent methods on `/acp`.
    pub responder: Responder,
}

impl App {
    /// Connect to the configured database (migrating it) and start every
    /// service with the configured providers.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::migrate_pool(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool));
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        tracing::info!(
            embedder = embedder.model_name(),
            generator = generator.model_name(),
            "providers ready"
        );
        Self::from_parts(config, store.clone(), store, embedder, generator)
    }

    /// Start every service on explicit stores and providers.
    pub fn from_parts(
        config: Config,
        chunks: Arc<dyn ChunkStore>,
        conversations: Arc<dyn ConversationStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> anyhow::Result<Self> {
        let params = ChunkParams {
            max_tokens: config.chunking.max_tokens,
            overlap_tokens: config.chunking.overlap_tokens,
            boundary_window: config.chunking.boundary_window,
        };
        let ingest = IngestionPipeline::start(
            Arc::clone(&chunks),
            Arc::clone(&conversations),
            Arc::clone(&embedder),
            params,
            &config.ingest,
        )
        .context("Failed to start ingestion workers")?;

        let window = ContextWindowManager::new(
            ContextBudget {
                budget_tokens: config.context.budget_tokens,
                system_reserve_tokens: config.context.system_reserve_tokens,
                chunk_budget_tokens: config.context.chunk_budget_tokens,
            },
            config.context.system_prompt.clone(),
        )
        .context("Invalid [context] configuration")?;
        let conversation_service = Arc::new(ConversationService::new(
            chunks,
            conversations,
            embedder,
            Arc::clone(&generator),
            window,
            &config.retrieval,
        ));

        let workspace = Arc::new(Workspace::new(config.agent.workspace_dir.clone()));
        let mut tools = MethodRegistry::new();
        register_tools(&mut tools, workspace)?;
        let transport = InProcessTransport::spawn(Responder::new(tools.clone()), TOOL_QUEUE);
        let caller = Caller::new(
            Arc::new(transport),
            Duration::from_secs(config.agent.call_timeout_secs),
        )
        .with_protocol_version(config.agent.protocol_version.clone());
        let agent = DocAgent::new(caller, generator, ingest.clone(), config.agent.clone());

        let mut methods = tools;
        register_agent_methods(&mut methods, agent.clone())?;

        Ok(Self {
            config: Arc::new(config),
            ingest,
            conversations: conversation_service,
            agent,
            responder: Responder::new(methods),
        })
    }
}
