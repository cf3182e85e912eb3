use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn auslaw_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("auslaw");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let corpus = [
        r#"{"external_id":"rta-2010-s41","citation":"Residential Tenancies Act 2010 (NSW) s 41","jurisdiction":"NSW","source_url":"https://legislation.nsw.gov.au/view/html/inforce/current/act-2010-042#sec.41","text":"A landlord must not increase the rent payable unless the landlord gives the tenant not less than 60 days written notice of the increase."}"#,
        r#"{"external_id":"rta-qld-s91","citation":"Residential Tenancies and Rooming Accommodation Act 2008 (Qld) s 91","jurisdiction":"QLD","text":"The lessor may increase the rent only by giving the tenant at least 2 months notice in writing.","effective_date":"2008-07-01"}"#,
        r#"{"external_id":"bad","citation":"Nothing","jurisdiction":"Atlantis","text":"Ignored."}"#,
        "not json at all",
    ];
    fs::write(root.join("corpus.jsonl"), corpus.join("\n")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/auslaw.sqlite"

[chunking]
small_doc_chars = 2000
parent_tokens = 500
child_tokens = 150

[retrieval]
final_limit = 5

[server]
bind = "127.0.0.1:7331"
"#,
        root.display()
    );

    let config_path = config_dir.join("auslaw.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_auslaw(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = auslaw_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run auslaw binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_auslaw(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully"));

    let (_, stderr, ok) = run_auslaw(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_ingest_counts_and_rejects() {
    let (tmp, config) = setup_test_env();
    let corpus = tmp.path().join("corpus.jsonl");
    run_auslaw(&config, &["init"]);

    let (stdout, stderr, ok) = run_auslaw(&config, &["ingest", corpus.to_str().unwrap()]);
    assert!(ok, "ingest failed: {}", stderr);
    assert!(stdout.contains("documents: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("rejected lines: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("ok"));

    // Re-ingesting replaces rather than duplicates.
    let (stdout, _, ok) = run_auslaw(&config, &["ingest", corpus.to_str().unwrap()]);
    assert!(ok);
    assert!(stdout.contains("documents: 2"));
}

#[test]
fn test_ingest_dry_run() {
    let (tmp, config) = setup_test_env();
    let corpus = tmp.path().join("corpus.jsonl");
    run_auslaw(&config, &["init"]);

    let (stdout, stderr, ok) = run_auslaw(&config, &["ingest", corpus.to_str().unwrap(), "--dry-run"]);
    assert!(ok, "dry run failed: {}", stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("documents: 2"));
}

#[test]
fn test_ingest_missing_file_fails() {
    let (tmp, config) = setup_test_env();
    run_auslaw(&config, &["init"]);

    let missing = tmp.path().join("nope.jsonl");
    let (_, stderr, ok) = run_auslaw(&config, &["ingest", missing.to_str().unwrap()]);
    assert!(!ok);
    assert!(stderr.contains("Failed to open ingest file"));
}

#[test]
fn test_embed_requires_provider() {
    let (_tmp, config) = setup_test_env();
    run_auslaw(&config, &["init"]);

    let (_, stderr, ok) = run_auslaw(&config, &["embed", "pending"]);
    assert!(!ok);
    assert!(stderr.contains("Embedding provider is disabled"));
}

#[test]
fn test_search_rejects_unknown_state() {
    let (_tmp, config) = setup_test_env();
    run_auslaw(&config, &["init"]);

    let (_, _, ok) = run_auslaw(&config, &["search", "rent increase", "--state", "Atlantis"]);
    assert!(!ok);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, _, ok) = run_auslaw(&tmp.path().join("absent.toml"), &["init"]);
    assert!(!ok);
}
