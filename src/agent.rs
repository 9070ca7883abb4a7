//! The documentation agent.
//!
//! A peer agent that answers two protocol methods:
//!
//! - `generate_docs { repo_url, conversation_id? }` queues a job and
//!   returns `{ status: "queued", job_id }` immediately.
//! - `job_status { job_id }` reports where the job is.
//!
//! A job drives the tool providers through a [`Caller`], so the same code
//! works whether the tools live in this process or behind HTTP:
//!
//! ```text
//! Pending → Cloning → Generating → Indexing → Completed
//!    clone_repository   list_files / read_file      submit_document
//!                       generate / write_documentation
//! ```
//!
//! Any failure moves the job to `Failed` with the error message.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::Instrument;

use docent_core::context::{PromptMessage, PromptRole};
use docent_core::protocol::{MethodHandler, MethodRegistry};
use docent_core::tokens::truncate_to_tokens;
use docent_core::{Error, Result};

use crate::acp::Caller;
use crate::config::AgentConfig;
use crate::generation::Generator;
use crate::ingest::IngestionPipeline;
use crate::tools::BINARY_MARKER;

/// Tokens of each source file included in the generation prompt.
const FILE_TOKEN_LIMIT: usize = 800;

/// Files treated as source worth reading.
const SOURCE_GLOBS: &[&str] = &[
    "*.rs", "*.py", "*.js", "*.ts", "*.tsx", "*.go", "*.java", "*.kt", "*.c", "*.h", "*.cpp",
    "*.hpp", "*.cs", "*.rb", "*.php", "*.swift", "*.scala", "*.md", "*.toml", "*.yaml",
    "*.yml", "*.json",
];

/// Lockfiles match the globs above but say nothing about the code.
const SKIP_GLOBS: &[&str] = &["*.lock", "*-lock.json", "*.min.js"];

/// How long a finished job stays visible to `job_status`.
const FINISHED_JOB_TTL_SECS: i64 = 60 * 60;

/// Finished jobs kept at most; the oldest go first.
const MAX_FINISHED_JOBS: usize = 256;

const SYSTEM_PROMPT: &str = "You are a senior engineer writing technical documentation for a \
code repository. Write Markdown. Be specific: name files, types, and functions.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Cloning,
    Generating,
    Indexing,
    Completed {
        document_id: String,
        output_path: String,
    },
    Failed {
        error: String,
    },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocJob {
    pub job_id: String,
    pub repo_url: String,
    #[serde(flatten)]
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Generates repository documentation and indexes it for retrieval.
#[derive(Clone)]
pub struct DocAgent {
    tools: Caller,
    generator: Arc<dyn Generator>,
    ingest: IngestionPipeline,
    config: AgentConfig,
    jobs: Arc<Mutex<HashMap<String, DocJob>>>,
}

impl DocAgent {
    pub fn new(
        tools: Caller,
        generator: Arc<dyn Generator>,
        ingest: IngestionPipeline,
        config: AgentConfig,
    ) -> Self {
        Self {
            tools,
            generator,
            ingest,
            config,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue a documentation job and return its ID.
    pub fn submit(&self, repo_url: &str, conversation_id: Option<String>) -> String {
        let job_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut jobs = self.jobs_mut();
        prune_finished(&mut jobs, now);
        jobs.insert(
            job_id.clone(),
            DocJob {
                job_id: job_id.clone(),
                repo_url: repo_url.to_string(),
                state: JobState::Pending,
                created_at: now,
                updated_at: now,
            },
        );
        drop(jobs);

        let agent = self.clone();
        let repo_url = repo_url.to_string();
        let id = job_id.clone();
        let span = tracing::info_span!("doc_job", job_id = %job_id);
        tokio::spawn(
            async move {
                let state = match agent.run(&id, &repo_url, conversation_id.as_deref()).await {
                    Ok(state) => state,
                    Err(e) => {
                        tracing::error!(error = %e, "documentation job failed");
                        JobState::Failed {
                            error: e.to_string(),
                        }
                    }
                };
                agent.set_state(&id, state);
            }
            .instrument(span),
        );
        job_id
    }

    pub fn job(&self, job_id: &str) -> Option<DocJob> {
        self.jobs_mut().get(job_id).cloned()
    }

    fn jobs_mut(&self) -> std::sync::MutexGuard<'_, HashMap<String, DocJob>> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, job_id: &str, state: JobState) {
        tracing::info!(?state, "job state");
        if let Some(job) = self.jobs_mut().get_mut(job_id) {
            job.state = state;
            job.updated_at = Utc::now();
        }
    }

    async fn run(
        &self,
        job_id: &str,
        repo_url: &str,
        conversation_id: Option<&str>,
    ) -> Result<JobState> {
        self.set_state(job_id, JobState::Cloning);
        let cloned = self
            .tools
            .call("clone_repository", json!({ "repo_url": repo_url }))
            .await?;
        let repo = cloned["path"]
            .as_str()
            .ok_or_else(|| Error::InvalidInput("clone_repository returned no path".into()))?
            .to_string();

        self.set_state(job_id, JobState::Generating);
        let listing = self
            .tools
            .call(
                "list_files",
                json!({ "directory_path": repo, "recursive": true }),
            )
            .await?;
        let files = select_sources(&listing, self.config.max_files)?;
        tracing::debug!(files = files.len(), "reading sources");

        let mut sources = Vec::with_capacity(files.len());
        for file in &files {
            let read = self
                .tools
                .call("read_file", json!({ "file_path": file }))
                .await?;
            let content = read["content"].as_str().unwrap_or_default();
            if content == BINARY_MARKER || content.trim().is_empty() {
                continue;
            }
            sources.push((file.clone(), truncate_to_tokens(content, FILE_TOKEN_LIMIT).to_string()));
        }

        let messages = build_prompt(&repo, repo_url, &sources);
        let markdown = self.generator.generate(&messages).await?;

        let output_path = format!(
            "{}/{}/index.md",
            self.config.docs_dir.to_string_lossy().trim_end_matches('/'),
            repo
        );
        self.tools
            .call(
                "write_documentation",
                json!({ "content": markdown, "output_path": output_path }),
            )
            .await?;

        self.set_state(job_id, JobState::Indexing);
        let document_id = self
            .ingest
            .submit_document(&markdown, &output_path, conversation_id)
            .await?;

        Ok(JobState::Completed {
            document_id,
            output_path,
        })
    }
}

/// Drop finished jobs past their TTL, then the oldest finished jobs beyond
/// the cap. Running jobs are never dropped.
fn prune_finished(jobs: &mut HashMap<String, DocJob>, now: DateTime<Utc>) {
    let cutoff = now - chrono::Duration::seconds(FINISHED_JOB_TTL_SECS);
    jobs.retain(|_, job| !job.state.is_terminal() || job.updated_at > cutoff);

    let mut finished: Vec<(DateTime<Utc>, String)> = jobs
        .values()
        .filter(|job| job.state.is_terminal())
        .map(|job| (job.updated_at, job.job_id.clone()))
        .collect();
    if finished.len() > MAX_FINISHED_JOBS {
        finished.sort();
        let excess = finished.len() - MAX_FINISHED_JOBS;
        for (_, job_id) in finished.into_iter().take(excess) {
            jobs.remove(&job_id);
        }
    }
}

fn glob_set(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| Error::InvalidInput(e.to_string()))?);
    }
    builder
        .build()
        .map_err(|e| Error::InvalidInput(e.to_string()))
}

/// Pick up to `limit` source files from a `list_files` result, shallow
/// paths first.
fn select_sources(listing: &Value, limit: usize) -> Result<Vec<String>> {
    let include = glob_set(SOURCE_GLOBS)?;
    let skip = glob_set(SKIP_GLOBS)?;
    let mut files: Vec<String> = listing["files"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str())
                .filter(|f| include.is_match(f) && !skip.is_match(f))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    files.sort_by(|a, b| {
        a.matches('/')
            .count()
            .cmp(&b.matches('/').count())
            .then_with(|| a.cmp(b))
    });
    files.truncate(limit);
    Ok(files)
}

fn build_prompt(repo: &str, repo_url: &str, sources: &[(String, String)]) -> Vec<PromptMessage> {
    let mut user = format!(
        "Repository '{}' ({}).\n\
         Write an index.md with these sections: Project Overview, Architecture, \
         Key Modules, Setup & Usage, Future Improvements.\n",
        repo, repo_url
    );
    for (path, content) in sources {
        user.push_str(&format!("\n### File: {}\n```\n{}\n```\n", path, content.trim_end()));
    }
    vec![
        PromptMessage {
            role: PromptRole::System,
            content: SYSTEM_PROMPT.to_string(),
        },
        PromptMessage {
            role: PromptRole::User,
            content: user,
        },
    ]
}

// ============ Protocol methods ============

pub struct GenerateDocs {
    agent: DocAgent,
}

#[async_trait]
impl MethodHandler for GenerateDocs {
    fn name(&self) -> &str {
        "generate_docs"
    }

    fn description(&self) -> &str {
        "Queue documentation generation for a git repository"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_url": { "type": "string" },
                "conversation_id": {
                    "type": "string",
                    "description": "Link the generated document to this conversation"
                }
            },
            "required": ["repo_url"]
        })
    }

    async fn invoke(&self, params: Value) -> Result<Value> {
        let repo_url = params["repo_url"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::InvalidParams("repo_url must be a non-empty string".into()))?;
        let conversation_id = params["conversation_id"].as_str().map(String::from);
        let job_id = self.agent.submit(repo_url, conversation_id);
        Ok(json!({ "status": "queued", "job_id": job_id }))
    }
}

pub struct JobStatus {
    agent: DocAgent,
}

#[async_trait]
impl MethodHandler for JobStatus {
    fn name(&self) -> &str {
        "job_status"
    }

    fn description(&self) -> &str {
        "Report the state of a documentation job"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "job_id": { "type": "string" } },
            "required": ["job_id"]
        })
    }

    async fn invoke(&self, params: Value) -> Result<Value> {
        let job_id = params["job_id"].as_str().unwrap_or_default();
        let job = self
            .agent
            .job(job_id)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        serde_json::to_value(job).map_err(|e| Error::Storage(e.to_string()))
    }
}

/// Register `generate_docs` and `job_status`.
pub fn register_agent_methods(registry: &mut MethodRegistry, agent: DocAgent) -> Result<()> {
    registry.register(Arc::new(GenerateDocs {
        agent: agent.clone(),
    }))?;
    registry.register(Arc::new(JobStatus { agent }))?;
    Ok(())
}
