//! HTTP API and `/acp` protocol tests against a live server on an
//! ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use docent::acp::{Caller, HttpTransport};
use docent::app::App;
use docent::config::parse_config;
use docent::embedding::create_embedder;
use docent::generation::Generator;
use docent::sqlite_store::SqliteStore;
use docent_core::context::PromptMessage;
use docent_core::protocol::AgentEnvelope;
use docent_core::{Error, Result};

struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, messages: &[PromptMessage]) -> Result<String> {
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        Ok(format!("echo: {}", last))
    }
}

struct TestServer {
    _tmp: TempDir,
    base: String,
    client: reqwest::Client,
}

async fn start_server() -> TestServer {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    std::fs::create_dir_all(root.join("workspace/demo/src")).unwrap();
    std::fs::write(root.join("workspace/demo/README.md"), "# Demo\n").unwrap();
    std::fs::write(root.join("workspace/demo/src/main.rs"), "fn main() {}\n").unwrap();
    std::fs::create_dir_all(root.join("workspace/demo/.git")).unwrap();
    std::fs::write(root.join("workspace/demo/.git/HEAD"), "ref: main\n").unwrap();

    let config = parse_config(&format!(
        r#"
[db]
path = '{root}/data/docent.sqlite'

[embedding]
provider = "hashing"
dims = 32

[agent]
workspace_dir = '{root}/workspace'
"#,
        root = root.display()
    ))
    .unwrap();
    let pool = docent::db::connect(&config).await.unwrap();
    docent::migrate::migrate_pool(&pool).await.unwrap();
    let store = Arc::new(SqliteStore::new(pool));
    let embedder = create_embedder(&config.embedding).unwrap();
    let app = App::from_parts(config, store.clone(), store, embedder, Arc::new(EchoGenerator)).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        docent::server::serve(listener, app).await.unwrap();
    });

    TestServer {
        _tmp: tmp,
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    async fn upload(&self, body: &str, conversation: &str) -> String {
        let resp = self
            .client
            .post(format!(
                "{}/documents?origin=notes.txt&conversation_id={}",
                self.base, conversation
            ))
            .header("content-type", "text/plain; charset=utf-8")
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 202);
        let json: Value = resp.json().await.unwrap();
        assert_eq!(json["status"], "pending");
        json["document_id"].as_str().unwrap().to_string()
    }

    async fn wait_ready(&self, id: &str) -> Value {
        for _ in 0..200 {
            let json: Value = self
                .client
                .get(format!("{}/documents/{}", self.base, id))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if json["status"] == "ready" || json["status"] == "failed" {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("document {} never reached a terminal state", id);
    }

    async fn acp(&self, envelope: &AgentEnvelope) -> AgentEnvelope {
        let resp = self
            .client
            .post(format!("{}/acp", self.base))
            .json(envelope)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }
}

// ============ REST ============

#[tokio::test]
async fn test_health() {
    let server = start_server().await;
    let json: Value = server
        .client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_upload_link_and_converse() {
    let server = start_server().await;
    let id = server.upload("kubernetes runs containers in pods", "c1").await;

    let status = server.wait_ready(&id).await;
    assert_eq!(status["status"], "ready");
    assert_eq!(status["chunk_count"], 1);
    assert_eq!(status["total_chunks"], 1);
    assert_eq!(status["origin"], "notes.txt");

    let resp = server
        .client
        .post(format!("{}/conversations/c1/messages", server.base))
        .json(&json!({ "text": "what runs pods?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let reply: Value = resp.json().await.unwrap();
    assert_eq!(reply["conversation_id"], "c1");
    assert_eq!(reply["text"], "echo: what runs pods?");
    assert_eq!(reply["citations"][0]["document_id"], id.as_str());
    assert_eq!(reply["turns"].as_array().unwrap().len(), 2);

    let history: Value = server
        .client
        .get(format!("{}/conversations/c1/messages", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let turns = history["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0]["role"], "user");
    assert_eq!(turns[0]["sequence"], 1);
    assert_eq!(turns[1]["role"], "assistant");
    assert_eq!(turns[1]["sequence"], 2);

    // A second conversation sees the document only once linked.
    let reply: Value = server
        .client
        .post(format!("{}/conversations/c2/messages", server.base))
        .json(&json!({ "text": "pods?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(reply["citations"].as_array().unwrap().is_empty());

    let resp = server
        .client
        .post(format!("{}/conversations/c2/documents/{}", server.base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    let reply: Value = server
        .client
        .post(format!("{}/conversations/c2/messages", server.base))
        .json(&json!({ "text": "pods?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply["citations"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_error_contract() {
    let server = start_server().await;

    let resp = server
        .client
        .post(format!("{}/documents", server.base))
        .body("   ")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["error"]["code"], "bad_request");

    let resp = server
        .client
        .post(format!("{}/documents", server.base))
        .header("content-type", "image/png")
        .body(vec![0u8, 1, 2])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = server
        .client
        .get(format!("{}/documents/missing", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["error"]["code"], "not_found");

    let resp = server
        .client
        .post(format!("{}/conversations/c1/messages", server.base))
        .json(&json!({ "text": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_retry_cancel_and_delete() {
    let server = start_server().await;
    let id = server.upload("short lived document", "c1").await;
    server.wait_ready(&id).await;

    // Ready documents are neither retryable nor cancellable.
    for action in ["retry", "cancel"] {
        let resp = server
            .client
            .post(format!("{}/documents/{}/{}", server.base, id, action))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "{} of a ready document", action);
    }

    let resp = server
        .client
        .delete(format!("{}/documents/{}", server.base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = server
        .client
        .delete(format!("{}/documents/{}", server.base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

// ============ /acp ============

#[tokio::test]
async fn test_tools_list_exposes_schemas() {
    let server = start_server().await;
    let json: Value = server
        .client
        .get(format!("{}/tools/list", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let tools = json["tools"].as_array().unwrap();
    let read = tools.iter().find(|t| t["name"] == "read_file").unwrap();
    assert_eq!(read["inputSchema"]["required"][0], "file_path");
    assert!(tools.iter().any(|t| t["name"] == "generate_docs"));
}

#[tokio::test]
async fn test_acp_envelope_resolution() {
    let server = start_server().await;

    let env = AgentEnvelope::with_correlation("corr-1", "list_files", json!({ "directory_path": "demo" }));
    let out = server.acp(&env).await;
    assert_eq!(out.correlation_id, "corr-1");
    assert!(out.error.is_none());
    let files = out.result.unwrap()["files"].clone();
    assert_eq!(files, json!(["demo/README.md", "demo/src/main.rs"]));

    let out = server.acp(&AgentEnvelope::request("no_such_method", json!({}))).await;
    assert_eq!(out.error.unwrap().code, -32601);

    let out = server.acp(&AgentEnvelope::request("read_file", json!({}))).await;
    assert_eq!(out.error.unwrap().code, -32602);

    let mut resolved = AgentEnvelope::request("list_files", json!({}));
    resolved.resolve_ok(json!({})).unwrap();
    let out = server.acp(&resolved).await;
    assert_eq!(out.error.unwrap().code, -32005);
    assert!(out.result.is_none());

    let out = server
        .acp(&AgentEnvelope::request("job_status", json!({ "job_id": "nope" })))
        .await;
    assert_eq!(out.error.unwrap().code, -32010);
}

#[tokio::test]
async fn test_http_transport_caller() {
    let server = start_server().await;
    let caller = Caller::new(
        Arc::new(HttpTransport::new(&server.base)),
        Duration::from_secs(5),
    );

    let out = caller
        .call("read_file", json!({ "file_path": "demo/README.md" }))
        .await
        .unwrap();
    assert_eq!(out["content"], "# Demo\n");

    let out = caller
        .call("write_documentation", json!({ "output_path": "docs/demo/index.md", "content": "hello" }))
        .await
        .unwrap();
    assert_eq!(out["bytes"], 5);

    let err = caller
        .call("read_file", json!({ "file_path": "../escape.txt" }))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParams(_)));

    let err = caller.call("nope", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::MethodNotFound(_)));
    assert_eq!(caller.in_flight(), 0);
}

#[tokio::test]
async fn test_http_transport_unreachable_is_remote_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let caller = Caller::new(
        Arc::new(HttpTransport::new(&format!("http://{}", addr))),
        Duration::from_secs(5),
    );
    let err = caller.call("list_files", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::Remote { code: -32603, .. }));
}
