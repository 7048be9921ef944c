// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

const AUTH: &str = r#"def authenticate(user, password):
    """Authentication: check the password and issue a session token."""
    if not verify_password(user, password):
        raise AuthenticationError(user)
    return issue_token(user)
"#;

const UTILS: &str = r#"def format_date(value):
    return value.strftime("%Y-%m-%d")

def slugify(text):
    return text.lower().replace(" ", "-")
"#;

struct Fixture {
    repo: TempDir,
    cache: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let repo = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        fs::create_dir_all(repo.path().join(".git")).unwrap();
        fs::write(
            repo.path().join(".discoverrc.toml"),
            r#"
[embeddings]
provider = "hash"
dimension = 256

[chunking]
min_chunk_bytes = 5
"#,
        )
        .unwrap();
        let fixture = Self { repo, cache };
        fixture.write("auth.py", AUTH);
        fixture.write("utils.py", UTILS);
        fixture
    }

    fn write(&self, rel: &str, contents: &str) {
        let path = self.repo.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = cargo_bin_cmd!("cdiscover");
        cmd.current_dir(self.repo.path())
            .env("CDISCOVER_CACHE_DIR", self.cache.path())
            .env("NO_COLOR", "1");
        cmd
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.cmd().arg("--format").arg("json").args(args).output().unwrap();
        assert!(
            output.status.success(),
            "command failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }

    fn ranked_paths(&self, query: &str) -> Vec<String> {
        let value = self.json(&["discover", query, "--refresh"]);
        value["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["path"].as_str().unwrap().to_string())
            .collect()
    }

    fn index_path(&self) -> PathBuf {
        let status = self.json(&["status"]);
        PathBuf::from(status["index_path"].as_str().unwrap())
    }
}

fn position(haystack: &str, needle: &str) -> usize {
    haystack.find(needle).unwrap_or(usize::MAX)
}

#[test]
fn discover_builds_missing_index_and_ranks_auth_first() {
    let fx = Fixture::new();
    let output = fx
        .cmd()
        .args(["discover", "authentication logic"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("auth.py"));
    assert!(position(&stdout, "auth.py") < position(&stdout, "utils.py"));
}

#[test]
fn add_mode_prints_paths_on_stdout() {
    let fx = Fixture::new();
    let output = fx
        .cmd()
        .args(["discover", "authentication logic", "--add", "--limit", "1"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().collect::<Vec<_>>(), vec!["auth.py"]);
    assert!(String::from_utf8_lossy(&output.stderr).contains("1. auth.py"));
}

#[test]
fn json_results_respect_limit_and_order() {
    let fx = Fixture::new();
    for i in 0..4 {
        fx.write(&format!("handlers/h{}.py", i), &format!("def handle_{}(request):\n    return route(request, {})\n", i, i));
    }
    let value = fx.json(&["discover", "request handler", "-l", "3"]);
    let results = value["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    let scores: Vec<f64> = results.iter().map(|r| r["score"].as_f64().unwrap()).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert!(results[0]["excerpt"].as_str().unwrap().contains("def handle_"));
}

#[test]
fn oversized_and_ignored_files_never_appear() {
    let fx = Fixture::new();
    fx.write("big_auth.py", &"authenticate(user, password)\n".repeat(80_000));
    fx.write("vendor/auth_copy.py", AUTH);
    fx.write(".discoverignore", "vendor/\n");

    let paths = fx.ranked_paths("authentication logic");
    assert!(paths.contains(&"auth.py".to_string()));
    assert!(!paths.iter().any(|p| p == "big_auth.py" || p.starts_with("vendor/")));

    let status = fx.json(&["status"]);
    assert_eq!(status["files"].as_u64(), Some(2));
}

#[test]
fn refresh_drops_deleted_files() {
    let fx = Fixture::new();
    assert!(fx.ranked_paths("date formatting").contains(&"utils.py".to_string()));

    fs::remove_file(fx.repo.path().join("utils.py")).unwrap();
    let paths = fx.ranked_paths("date formatting");
    assert_eq!(paths, vec!["auth.py".to_string()]);
}

#[test]
fn incremental_index_reports_changes() {
    let fx = Fixture::new();
    let first = fx.json(&["index"]);
    assert_eq!(first["added"].as_u64(), Some(2));

    fx.write("utils.py", &format!("{}\ndef titlecase(text):\n    return text.title()\n", UTILS));
    let second = fx.json(&["index"]);
    assert_eq!(second["modified"].as_u64(), Some(1));
    assert_eq!(second["unchanged"].as_u64(), Some(1));
    assert_eq!(second["generation"].as_u64(), Some(2));

    let third = fx.json(&["index"]);
    assert_eq!(third["embedded"].as_u64(), Some(0));
    assert_eq!(third["generation"].as_u64(), Some(2));
}

#[test]
fn forced_rebuilds_are_byte_identical() {
    let fx = Fixture::new();
    fx.cmd().args(["index", "--force"]).assert().success();
    let index = fx.index_path();
    let first = fs::read(&index).unwrap();
    let ranking = fx.ranked_paths("authentication logic");

    fx.cmd().args(["index", "--force"]).assert().success();
    assert_eq!(fs::read(&index).unwrap(), first);
    assert_eq!(fx.ranked_paths("authentication logic"), ranking);
}

#[test]
fn index_from_subdirectory_uses_repo_root() {
    let fx = Fixture::new();
    fx.write("pkg/inner/mod.py", "def nested_helper():\n    return 42\n");
    let inner = fx.repo.path().join("pkg/inner");
    fx.cmd()
        .args(["index", "--path"])
        .arg(&inner)
        .assert()
        .success()
        .stdout(predicate::str::contains("Indexed"));

    let status = fx.json(&["status", "--path", inner.to_str().unwrap()]);
    assert_eq!(status["files"].as_u64(), Some(3));
}

#[test]
fn exclude_flag_filters_paths() {
    let fx = Fixture::new();
    let report = fx.json(&["index", "--exclude", "utils.py"]);
    assert_eq!(report["added"].as_u64(), Some(1));
}

#[test]
fn excluded_paths_stay_excluded_after_refresh() {
    let fx = Fixture::new();
    fx.write("secret/keys.py", AUTH);
    let report = fx.json(&["index", "--exclude", "secret/"]);
    assert_eq!(report["added"].as_u64(), Some(2));

    let paths = fx.ranked_paths("authentication logic");
    assert!(paths.contains(&"auth.py".to_string()));
    assert!(!paths.iter().any(|p| p.starts_with("secret/")));

    let again = fx.json(&["index"]);
    assert_eq!(again["added"].as_u64(), Some(0));
    let status = fx.json(&["status"]);
    assert_eq!(status["files"].as_u64(), Some(2));
    assert_eq!(status["excludes"], serde_json::json!(["secret/"]));
}

#[test]
fn discover_rebuilds_index_from_another_model() {
    let fx = Fixture::new();
    fx.cmd().arg("index").assert().success();
    fx.write(
        ".discoverrc.toml",
        "[embeddings]\nprovider = \"hash\"\ndimension = 128\n\n[chunking]\nmin_chunk_bytes = 5\n",
    );

    let output = fx
        .cmd()
        .args(["--format", "json", "discover", "authentication logic"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["results"][0]["path"].as_str(), Some("auth.py"));

    let status = fx.json(&["status"]);
    assert_eq!(status["model"].as_str(), Some("hash-128"));
    assert_eq!(status["dimension"].as_u64(), Some(128));
}

#[test]
fn empty_query_is_rejected() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["discover", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Query is empty"));
}

#[test]
fn corrupt_index_is_rebuilt_on_discover() {
    let fx = Fixture::new();
    fx.cmd().arg("index").assert().success();
    let index = fx.index_path();
    fs::write(&index, b"not an index").unwrap();

    fx.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("corrupt"));

    let paths = fx.ranked_paths("authentication logic");
    assert_eq!(paths.first().map(String::as_str), Some("auth.py"));
}

#[test]
fn clear_removes_the_index() {
    let fx = Fixture::new();
    fx.cmd().arg("index").assert().success();
    assert!(fx.index_path().exists());

    fx.cmd()
        .arg("clear")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared"));
    fx.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("not indexed"));
}

#[test]
fn repositories_do_not_share_storage() {
    let a = Fixture::new();
    let b = Fixture::new();
    let shared_cache: &Path = a.cache.path();
    b.write("only_in_b.py", "def b_only():\n    return 'b'\n");

    a.cmd().arg("index").assert().success();
    b.cmd()
        .env("CDISCOVER_CACHE_DIR", shared_cache)
        .arg("index")
        .assert()
        .success();

    let status_a = a.json(&["status"]);
    assert_eq!(status_a["files"].as_u64(), Some(2));
    let dirs = fs::read_dir(shared_cache).unwrap().count();
    assert_eq!(dirs, 2);
}

#[test]
fn completions_are_generated() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cdiscover"));
}
