//! Filesystem and git tool providers.
//!
//! Four [`MethodHandler`]s that give the documentation agent controlled
//! access to a workspace directory:
//!
//! | Method | Params | Result |
//! |--------|--------|--------|
//! | `clone_repository` | `repo_url`, `repo_name?` | `{ path, action }` |
//! | `list_files` | `directory_path?`, `recursive?` | `{ files }` |
//! | `read_file` | `file_path` | `{ path, content }` |
//! | `write_documentation` | `content`, `output_path` | `{ path, bytes }` |
//!
//! Every path parameter is relative to the workspace root. Absolute paths
//! and `..` components are rejected as invalid params, and so is any path
//! whose symlinks lead outside the root: cloned repositories are untrusted
//! and may carry links to arbitrary locations.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use docent_core::protocol::{MethodHandler, MethodRegistry};
use docent_core::{Error, Result};

/// Returned by `read_file` in place of content that is not UTF-8.
pub const BINARY_MARKER: &str = "<Binary File or Non-UTF8 Content>";

/// Directory and file names `list_files` never descends into or reports.
const IGNORED: &[&str] = &[
    ".git",
    "__pycache__",
    "node_modules",
    "venv",
    ".venv",
    "target",
    ".env",
    ".idea",
    ".vscode",
];

/// Code for a tool that ran but failed.
const TOOL_FAILED: i64 = -32000;

fn tool_failed(message: impl Into<String>) -> Error {
    Error::Remote {
        code: TOOL_FAILED,
        message: message.into(),
    }
}

/// The directory every tool is confined to.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative path lexically. Symlinks are not
    /// followed; use [`resolve_existing`](Self::resolve_existing) or
    /// [`resolve_for_write`](Self::resolve_for_write) before touching the
    /// filesystem.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let path = Path::new(relative);
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(Error::InvalidParams(format!(
                        "path '{}' escapes the workspace",
                        relative
                    )))
                }
            }
        }
        Ok(self.root.join(path))
    }

    /// The root with every symlink resolved, created if missing.
    pub async fn canonical_root(&self) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| tool_failed(format!("cannot create workspace: {}", e)))?;
        tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| tool_failed(format!("cannot resolve workspace: {}", e)))
    }

    /// Resolve an existing path, following symlinks. The real location
    /// must lie under the canonical root.
    pub async fn resolve_existing(&self, relative: &str) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        let root = self.canonical_root().await?;
        let real = tokio::fs::canonicalize(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::NotFound(format!("path {}", relative)),
                _ => tool_failed(format!("cannot resolve {}: {}", relative, e)),
            })?;
        confine(&root, &real, relative)?;
        Ok(real)
    }

    /// Resolve a file path about to be written, creating its parent
    /// directories. The parent must resolve under the canonical root and
    /// the file itself must not be a symlink.
    pub async fn resolve_for_write(&self, relative: &str) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        let name = path
            .file_name()
            .filter(|_| path != self.root)
            .map(|n| n.to_os_string())
            .ok_or_else(|| Error::InvalidParams(format!("path '{}' names no file", relative)))?;
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        let root = self.canonical_root().await?;

        // Check the deepest existing ancestor before creating anything, so a
        // symlinked directory cannot make create_dir_all build outside.
        let mut existing = parent.as_path();
        while !tokio::fs::try_exists(existing).await.unwrap_or(false) {
            match existing.parent() {
                Some(up) => existing = up,
                None => break,
            }
        }
        let real = tokio::fs::canonicalize(existing)
            .await
            .map_err(|e| tool_failed(format!("cannot resolve {}: {}", relative, e)))?;
        confine(&root, &real, relative)?;

        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| tool_failed(e.to_string()))?;
        let real_parent = tokio::fs::canonicalize(&parent)
            .await
            .map_err(|e| tool_failed(format!("cannot resolve {}: {}", relative, e)))?;
        confine(&root, &real_parent, relative)?;

        let target = real_parent.join(name);
        if let Ok(meta) = tokio::fs::symlink_metadata(&target).await {
            if meta.file_type().is_symlink() {
                return Err(Error::InvalidParams(format!(
                    "path '{}' is a symlink",
                    relative
                )));
            }
        }
        Ok(target)
    }
}

fn confine(root: &Path, real: &Path, relative: &str) -> Result<()> {
    if real.starts_with(root) {
        Ok(())
    } else {
        tracing::warn!(path = relative, "path resolves outside the workspace");
        Err(Error::InvalidParams(format!(
            "path '{}' escapes the workspace",
            relative
        )))
    }
}

/// Path of `full` relative to `root`, with `/` separators.
fn display(root: &Path, full: &Path) -> String {
    let rel = full.strip_prefix(root).unwrap_or(full);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidParams(format!("missing string param '{}'", key)))
}

/// The four tool handlers, confined to `workspace`.
pub fn workspace_tools(workspace: Arc<Workspace>) -> Vec<Arc<dyn MethodHandler>> {
    vec![
        Arc::new(CloneRepository {
            workspace: Arc::clone(&workspace),
        }),
        Arc::new(ListFiles {
            workspace: Arc::clone(&workspace),
        }),
        Arc::new(ReadFile {
            workspace: Arc::clone(&workspace),
        }),
        Arc::new(WriteDocumentation { workspace }),
    ]
}

/// Register all four tools against `workspace`.
pub fn register_tools(registry: &mut MethodRegistry, workspace: Arc<Workspace>) -> Result<()> {
    for tool in workspace_tools(workspace) {
        registry.register(tool)?;
    }
    Ok(())
}

// ============ clone_repository ============

pub struct CloneRepository {
    workspace: Arc<Workspace>,
}

/// `https://host/org/repo.git` → `repo`.
pub fn repo_name_from_url(url: &str) -> Option<String> {
    let last = url.trim_end_matches('/').rsplit(['/', ':']).next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    (!name.is_empty()).then(|| name.to_string())
}

async fn git(args: &[&str], cwd: Option<&Path>) -> Result<()> {
    let mut cmd = tokio::process::Command::new("git");
    cmd.args(args).env("GIT_TERMINAL_PROMPT", "0");
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd
        .output()
        .await
        .map_err(|e| tool_failed(format!("failed to run git: {}", e)))?;
    if !output.status.success() {
        return Err(tool_failed(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

#[async_trait]
impl MethodHandler for CloneRepository {
    fn name(&self) -> &str {
        "clone_repository"
    }

    fn description(&self) -> &str {
        "Clone a git repository into the workspace, or pull if it is already there"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_url": { "type": "string", "description": "Repository URL" },
                "repo_name": { "type": "string", "description": "Directory name (default: from URL)" }
            },
            "required": ["repo_url"]
        })
    }

    async fn invoke(&self, params: Value) -> Result<Value> {
        let url = str_param(&params, "repo_url")?;
        if url.starts_with('-') {
            return Err(Error::InvalidParams("repo_url must not start with '-'".into()));
        }
        let name = match params.get("repo_name").and_then(|v| v.as_str()) {
            Some(name) => name.to_string(),
            None => repo_name_from_url(url).ok_or_else(|| {
                Error::InvalidParams(format!("cannot derive a repository name from '{}'", url))
            })?,
        };
        if Path::new(&name).components().count() != 1 {
            return Err(Error::InvalidParams(format!(
                "repo_name '{}' must be a single directory name",
                name
            )));
        }
        let target = self.workspace.resolve(&name)?;
        if let Ok(meta) = tokio::fs::symlink_metadata(&target).await {
            if meta.file_type().is_symlink() {
                return Err(Error::InvalidParams(format!(
                    "repo_name '{}' is a symlink",
                    name
                )));
            }
        }

        let action = if target.join(".git").exists() {
            git(&["pull", "--ff-only"], Some(&target)).await?;
            "pulled"
        } else {
            tokio::fs::create_dir_all(self.workspace.root())
                .await
                .map_err(|e| tool_failed(e.to_string()))?;
            let target_str = target.to_string_lossy();
            git(&["clone", "--depth", "1", "--", url, &target_str], None).await?;
            "cloned"
        };
        tracing::info!(repo = %name, action, "repository ready");
        Ok(json!({ "path": name, "action": action }))
    }
}

// ============ list_files ============

pub struct ListFiles {
    workspace: Arc<Workspace>,
}

fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || IGNORED.contains(&name)
}

#[async_trait]
impl MethodHandler for ListFiles {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files under a workspace directory, skipping hidden and vendored paths"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory_path": { "type": "string", "default": "." },
                "recursive": { "type": "boolean", "default": true }
            }
        })
    }

    async fn invoke(&self, params: Value) -> Result<Value> {
        let rel = params["directory_path"].as_str().unwrap_or(".");
        let root = self.workspace.canonical_root().await?;
        let dir = self.workspace.resolve_existing(rel).await?;
        if !dir.is_dir() {
            return Err(Error::NotFound(format!("directory {}", rel)));
        }
        let recursive = params["recursive"].as_bool().unwrap_or(true);

        let files = tokio::task::spawn_blocking(move || {
            let mut walker = walkdir::WalkDir::new(&dir).sort_by_file_name();
            if !recursive {
                walker = walker.max_depth(1);
            }
            walker
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_ignored(&e.file_name().to_string_lossy()))
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| display(&root, e.path()))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| tool_failed(e.to_string()))?;

        Ok(json!({ "files": files }))
    }
}

// ============ read_file ============

pub struct ReadFile {
    workspace: Arc<Workspace>,
}

#[async_trait]
impl MethodHandler for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file from the workspace"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "file_path": { "type": "string" } },
            "required": ["file_path"]
        })
    }

    async fn invoke(&self, params: Value) -> Result<Value> {
        let rel = str_param(&params, "file_path")?;
        let path = self.workspace.resolve_existing(rel).await.map_err(|e| match e {
            Error::NotFound(_) => Error::NotFound(format!("file {}", rel)),
            other => other,
        })?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(format!("file {}", rel)),
            _ => tool_failed(format!("failed to read {}: {}", rel, e)),
        })?;
        let content = String::from_utf8(bytes).unwrap_or_else(|_| BINARY_MARKER.to_string());
        Ok(json!({ "path": rel, "content": content }))
    }
}

// ============ write_documentation ============

pub struct WriteDocumentation {
    workspace: Arc<Workspace>,
}

#[async_trait]
impl MethodHandler for WriteDocumentation {
    fn name(&self) -> &str {
        "write_documentation"
    }

    fn description(&self) -> &str {
        "Write generated documentation into the workspace"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string" },
                "output_path": { "type": "string" }
            },
            "required": ["content", "output_path"]
        })
    }

    async fn invoke(&self, params: Value) -> Result<Value> {
        let content = str_param(&params, "content")?;
        let rel = str_param(&params, "output_path")?;
        let path = self.workspace.resolve_for_write(rel).await?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| tool_failed(format!("failed to write {}: {}", rel, e)))?;
        tracing::info!(path = rel, bytes = content.len(), "documentation written");
        Ok(json!({ "path": rel, "bytes": content.len() }))
    }
}
