use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docent_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docent"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    )
    .unwrap();
    let long: Vec<String> = (0..3000).map(|i| format!("w{}", i)).collect();
    fs::write(files_dir.join("long.txt"), long.join(" ")).unwrap();
    fs::write(files_dir.join("empty.txt"), "   \n").unwrap();

    let config_content = format!(
        r#"[db]
path = '{root}/data/docent.sqlite'

[chunking]
max_tokens = 500
overlap_tokens = 50

[embedding]
provider = "hashing"
dims = 64

[agent]
workspace_dir = '{root}/workspace'
"#,
        root = root.display()
    );

    let config_path = config_dir.join("docent.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docent(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docent_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docent binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Ingest a file and return its document id from the `queued` line.
fn ingest(config_path: &Path, file: &Path, extra: &[&str]) -> (String, String) {
    let mut args = vec!["ingest", file.to_str().unwrap()];
    args.extend_from_slice(extra);
    let (stdout, stderr, success) = run_docent(config_path, &args);
    assert!(success, "ingest failed: {}", stderr);
    let id = stdout
        .lines()
        .find_map(|l| l.strip_prefix("document ").and_then(|r| r.strip_suffix(" queued")))
        .unwrap_or_else(|| panic!("no document id in: {}", stdout))
        .to_string();
    (id, stdout)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docent(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/docent.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_docent(&config_path, &["init"]);
    let (_, stderr, second) = run_docent(&config_path, &["init"]);
    assert!(first);
    assert!(second, "second init failed: {}", stderr);
}

#[test]
fn test_ingest_long_document_becomes_ready() {
    let (tmp, config_path) = setup_test_env();
    run_docent(&config_path, &["init"]);

    let (_, stdout) = ingest(&config_path, &tmp.path().join("files/long.txt"), &[]);
    assert!(stdout.contains("\"status\": \"ready\""), "{}", stdout);
    assert!(stdout.contains("\"chunk_count\": 7"), "{}", stdout);
}

#[test]
fn test_ingest_empty_file_is_rejected() {
    let (tmp, config_path) = setup_test_env();
    run_docent(&config_path, &["init"]);

    let file = tmp.path().join("files/empty.txt");
    let (_, stderr, success) = run_docent(&config_path, &["ingest", file.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("empty"), "{}", stderr);
}

#[test]
fn test_status_and_delete() {
    let (tmp, config_path) = setup_test_env();
    run_docent(&config_path, &["init"]);

    let (id, _) = ingest(&config_path, &tmp.path().join("files/alpha.md"), &[]);

    let (stdout, stderr, success) = run_docent(&config_path, &["status", &id]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("alpha.md"));
    assert!(stdout.contains("total chunks: 1"));

    let (_, stderr, success) = run_docent(&config_path, &["delete", &id]);
    assert!(success, "delete failed: {}", stderr);

    let (_, stderr, success) = run_docent(&config_path, &["status", &id]);
    assert!(!success);
    assert!(stderr.contains("not found"), "{}", stderr);
}

#[test]
fn test_retry_requires_failed_document() {
    let (tmp, config_path) = setup_test_env();
    run_docent(&config_path, &["init"]);

    let (id, _) = ingest(&config_path, &tmp.path().join("files/alpha.md"), &[]);
    let (_, _, success) = run_docent(&config_path, &["retry", &id]);
    assert!(!success);
}

#[test]
fn test_ask_errors_when_generation_disabled() {
    let (tmp, config_path) = setup_test_env();
    run_docent(&config_path, &["init"]);

    ingest(
        &config_path,
        &tmp.path().join("files/alpha.md"),
        &["--conversation", "c1"],
    );

    let (_, stderr, success) = run_docent(&config_path, &["ask", "c1", "what about cargo?"]);
    assert!(!success);
    assert!(stderr.contains("generation"), "{}", stderr);

    // A failed answer leaves no turns behind.
    let (stdout, _, success) = run_docent(&config_path, &["history", "c1"]);
    assert!(success);
    assert!(stdout.trim().is_empty(), "unexpected history: {}", stdout);
}

#[test]
fn test_link_unknown_document_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_docent(&config_path, &["init"]);

    let (_, _, success) = run_docent(&config_path, &["link", "c1", "no-such-doc"]);
    assert!(!success);
}

#[test]
fn test_tools_lists_protocol_methods() {
    let (_tmp, config_path) = setup_test_env();
    run_docent(&config_path, &["init"]);

    let (stdout, stderr, success) = run_docent(&config_path, &["tools"]);
    assert!(success, "tools failed: {}", stderr);
    for name in [
        "clone_repository",
        "list_files",
        "read_file",
        "write_documentation",
        "generate_docs",
        "job_status",
    ] {
        assert!(stdout.contains(name), "missing {} in {}", name, stdout);
    }
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, _, success) = run_docent(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
}
