//! CLI tests: drive the `tributary` binary end to end against a temporary
//! home directory and parse its `--json` output.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn tributary_bin() -> &'static str {
    env!("CARGO_BIN_EXE_tributary")
}

fn run_cli(args: &[String], envs: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(tributary_bin());
    cmd.args(args);
    cmd.env_remove("TRIBUTARY_CONFIG");
    cmd.env_remove("TRIBUTARY_REMOTE_TOKEN");
    for (key, value) in envs {
        cmd.env(key, value);
    }
    cmd.output().expect("failed to execute tributary CLI")
}

fn assert_cli_success(output: &Output, args: &[String]) {
    assert!(
        output.status.success(),
        "command failed: {}\nstdout:\n{}\nstderr:\n{}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn run_cli_json<T: DeserializeOwned>(args: &[String], envs: &[(&str, &str)]) -> T {
    let output = run_cli(args, envs);
    assert_cli_success(&output, args);
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).unwrap_or_else(|err| {
        panic!(
            "failed to parse JSON output: {}\nstdout:\n{}\nstderr:\n{}",
            err,
            stdout,
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigJson {
    name: String,
    workspace: String,
    root_folder_ids: Vec<String>,
    last_sync_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunJson {
    config_name: String,
    status: String,
    removal_skipped: bool,
    counts: CountsJson,
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountsJson {
    files_created: u64,
    files_unchanged: u64,
    folders_created: u64,
    items_removed: u64,
    documents_written: u64,
}

struct Fixture {
    home: TempDir,
    source: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let source = TempDir::new().expect("create source dir");
        let notes = source.path().join("notes");
        fs::create_dir_all(notes.join("sub")).unwrap();
        fs::write(notes.join("a.md"), "# A\nsee [[b]]\n").unwrap();
        fs::write(notes.join("b.md"), "# B\n").unwrap();
        fs::write(notes.join("sub/c.md"), "[[a]] and [[b]]\n").unwrap();
        Self {
            home: TempDir::new().expect("create temp home"),
            source,
        }
    }

    fn home(&self) -> String {
        path_arg(self.home.path())
    }

    fn output(&self) -> String {
        path_arg(&self.home.path().join("out"))
    }

    fn scrape_args(&self, extra: &[&str]) -> Vec<String> {
        let mut a = args(&["scrape", "--user", "alice", "--json", "--source"]);
        a.push(path_arg(self.source.path()));
        a.push("--output".into());
        a.push(self.output());
        a.extend(extra.iter().map(|s| s.to_string()));
        a
    }
}

#[test]
fn test_config_scrape_runs_and_backlinks() {
    let fx = Fixture::new();
    let home = fx.home();
    let envs = [
        ("TRIBUTARY_HOME", home.as_str()),
        ("TRIBUTARY_REMOTE_TOKEN", "secret"),
        ("RUST_LOG", "error"),
    ];

    let upsert = args(&[
        "config", "upsert", "--user", "alice", "--name", "notes", "--root", "notes", "--json",
    ]);
    let config: ConfigJson = run_cli_json(&upsert, &envs);
    assert_eq!(config.name, "notes");
    assert_eq!(config.workspace, "default");
    assert_eq!(config.root_folder_ids, vec!["notes"]);
    assert_eq!(config.last_sync_status, None);

    let results: Vec<RunJson> = run_cli_json(&fx.scrape_args(&[]), &envs);
    assert_eq!(results.len(), 1);
    let run = &results[0];
    assert_eq!(run.config_name, "notes");
    assert_eq!(run.status, "success");
    assert!(run.errors.is_empty());
    assert_eq!(run.counts.files_created, 3);
    assert_eq!(run.counts.folders_created, 1);
    assert_eq!(run.counts.documents_written, 3);

    let doc = fx.home.path().join("out/default/notes/notes/sub/c.md");
    assert!(doc.exists(), "missing generated document {}", doc.display());

    let mut backlinks = args(&["backlinks", "b", "--json", "--root"]);
    backlinks.push(fx.output());
    let mut sources: Vec<String> = run_cli_json(&backlinks, &envs);
    sources.sort();
    assert_eq!(
        sources,
        vec!["default/notes/notes/a", "default/notes/notes/sub/c"]
    );

    // Second pass sees nothing new; a deleted file is marked stale
    fs::remove_file(fx.source.path().join("notes/b.md")).unwrap();
    let results: Vec<RunJson> = run_cli_json(&fx.scrape_args(&[]), &envs);
    let run = &results[0];
    assert_eq!(run.counts.files_created, 0);
    assert_eq!(run.counts.files_unchanged, 2);
    assert_eq!(run.counts.items_removed, 1);
    assert!(!run.removal_skipped);

    let history: Vec<RunJson> = run_cli_json(
        &args(&["runs", "--user", "alice", "--name", "notes", "--json"]),
        &envs,
    );
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].counts.items_removed, 1);

    let listed: Vec<ConfigJson> =
        run_cli_json(&args(&["config", "list", "--user", "alice", "--json"]), &envs);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].last_sync_status.as_deref(), Some("success"));
}

#[test]
fn test_scrape_without_credential_fails_with_guidance() {
    let fx = Fixture::new();
    let home = fx.home();
    let envs = [("TRIBUTARY_HOME", home.as_str()), ("RUST_LOG", "error")];

    let upsert = args(&[
        "config", "upsert", "--user", "alice", "--name", "notes", "--root", "notes",
    ]);
    assert_cli_success(&run_cli(&upsert, &envs), &upsert);

    let output = run_cli(&fx.scrape_args(&[]), &envs);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR: Remote credential missing"), "stderr:\n{stderr}");
    assert!(stderr.contains("TRIBUTARY_REMOTE_TOKEN"), "stderr:\n{stderr}");
    assert!(!fx.home.path().join("out").exists());
}

#[test]
fn test_config_show_names_home_and_resolved_paths() {
    let home = TempDir::new().unwrap();
    let home_str = path_arg(home.path());
    let envs = [("TRIBUTARY_HOME", home_str.as_str()), ("RUST_LOG", "error")];

    let show = args(&["config", "show"]);
    let output = run_cli(&show, &envs);
    assert_cli_success(&output, &show);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&format!("# home: {home_str}")), "stdout:\n{stdout}");
    assert!(
        stdout.contains(&format!("# config: {}", path_arg(&home.path().join("config.toml")))),
        "stdout:\n{stdout}"
    );
    assert!(stdout.contains("removal_policy = \"mark-stale\""), "stdout:\n{stdout}");
}

#[test]
fn test_sign_check_and_remove() {
    let home = TempDir::new().unwrap();
    let home_str = path_arg(home.path());
    let envs = [("TRIBUTARY_HOME", home_str.as_str()), ("RUST_LOG", "error")];
    let file = home.path().join("page.md");
    fs::write(&file, "# Page\n").unwrap();

    let mut sign = args(&["sign", "--source-id", "page-1"]);
    sign.push(path_arg(&file));
    assert_cli_success(&run_cli(&sign, &envs), &sign);
    let signed = fs::read_to_string(&file).unwrap();
    assert!(signed.starts_with("# Page\n"));
    assert!(signed.contains("page-1"));

    // Signing again only refreshes the block
    assert_cli_success(&run_cli(&sign, &envs), &sign);
    let resigned = fs::read_to_string(&file).unwrap();
    assert_eq!(resigned.matches("page-1").count(), signed.matches("page-1").count());

    let mut check = args(&["sign", "--check"]);
    check.push(path_arg(&file));
    let output = run_cli(&check, &envs);
    assert_cli_success(&output, &check);
    assert!(String::from_utf8_lossy(&output.stdout).contains("source-id: page-1"));

    let mut remove = args(&["sign", "--remove"]);
    remove.push(path_arg(&file));
    assert_cli_success(&run_cli(&remove, &envs), &remove);
    assert_eq!(fs::read_to_string(&file).unwrap(), "# Page\n");
}
