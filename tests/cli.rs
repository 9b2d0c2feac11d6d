use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docbridge_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docbridge"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha\n\nReceipts from the hardware store.",
    )
    .unwrap();
    fs::write(files_dir.join("beta.txt"), "Beta plain text notes.").unwrap();

    let config_content = format!(
        r#"[state]
path = "{root}/data/state.sqlite"

[knowledge_base]
path = "{root}/data/knowledge_base"

[chunking]
max_chars = 800
overlap_chars = 80
"#,
        root = root.display()
    );

    let config_path = config_dir.join("docbridge.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docbridge(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docbridge_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docbridge binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_owner_and_folder_commands() {
    let (tmp, config) = setup_test_env();
    let files = tmp.path().join("files");

    let (_, stderr, ok) = run_docbridge(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(tmp.path().join("data/state.sqlite").exists());

    let (_, stderr, ok) = run_docbridge(&config, &["owner", "add", "alice"]);
    assert!(ok, "owner add failed: {}", stderr);

    let (_, stderr, ok) = run_docbridge(
        &config,
        &["folder", "add", files.to_str().unwrap(), "--owner", "alice"],
    );
    assert!(ok, "folder add failed: {}", stderr);

    let (stdout, _, ok) = run_docbridge(&config, &["folder", "list"]);
    assert!(ok);
    assert!(stdout.contains("alice"));
    assert!(stdout.contains("files"));

    // Unknown owner is rejected.
    let (_, stderr, ok) = run_docbridge(
        &config,
        &["folder", "add", files.to_str().unwrap(), "--owner", "mallory"],
    );
    assert!(!ok);
    assert!(stderr.contains("owner"), "{}", stderr);
}

#[test]
fn test_process_without_embedder_reports_failures() {
    let (tmp, config) = setup_test_env();
    let files = tmp.path().join("files");
    run_docbridge(&config, &["owner", "add", "alice"]);
    run_docbridge(
        &config,
        &["folder", "add", files.to_str().unwrap(), "--owner", "alice"],
    );

    let (stdout, stderr, ok) = run_docbridge(&config, &["process"]);
    assert!(ok, "process failed: {}", stderr);
    let result: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(result["failed"], 2);
    assert_eq!(result["processed"], 0);
}

#[test]
fn test_export_of_empty_store_fails() {
    let (tmp, config) = setup_test_env();
    run_docbridge(&config, &["init"]);
    let out = tmp.path().join("exports");

    let (stdout, _, ok) = run_docbridge(&config, &["export", "--output", out.to_str().unwrap()]);
    assert!(!ok);
    assert!(stdout.contains("nothing to export"));
}

#[test]
fn test_validate_package_on_missing_dir() {
    let (tmp, config) = setup_test_env();
    let (stdout, _, ok) = run_docbridge(
        &config,
        &[
            "validate-package",
            tmp.path().join("missing").to_str().unwrap(),
        ],
    );
    assert!(!ok);
    assert!(stdout.contains("Package directory not found"));
}

#[test]
fn test_stats_on_fresh_store() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_docbridge(&config, &["stats"]);
    assert!(ok, "stats failed: {}", stderr);
    assert!(stdout.contains("Chunks:      0"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_docbridge(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_check_replica_requires_deployed_store() {
    let (tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_docbridge(&config, &["check-replica"]);
    assert!(!ok);
    assert!(stderr.contains("not found"), "{}", stderr);
    assert!(!tmp.path().join("data/knowledge_base").exists());
}
