use assert_cmd::Command;
use serde_json::Value;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::ZipWriter;

const ORDERS_SCHEME: &str = r#"
version = 1
name = "orders"

[[items]]
code = "id"
unique = true

[[items]]
code = "amount"
[items.comparator]
name = "numeric"
config = "tolerance=0.01"

[[items]]
code = "status"

[primary]
kind = "memory"
[primary.key_to_code]
ORDER_ID = "id"
[primary.options]
rows = [
    { ORDER_ID = "1", amount = 10.0, status = "open" },
    { ORDER_ID = "2", amount = 20.0, status = "open" },
    { ORDER_ID = "3", amount = 30.0, status = "closed" },
]

[shadow]
kind = "memory"
[shadow.options]
rows = [
    { id = "1", amount = "10.004", status = "open" },
    { id = "2", amount = 21.5, status = "open" },
    { id = "4", amount = 40.0, status = "open" },
]
"#;

const LEDGER_MANIFEST: &str = r#"
[plugin]
name = "ledger"
version = "0.3.1"

[[comparator]]
name = "cents"
base = "numeric"
config = "tolerance=0.01"
"#;

/// Isolated home, config and cache directories for one CLI invocation
struct Sandbox {
    home: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            home: TempDir::new().expect("Failed to create sandbox"),
        }
    }

    fn path(&self) -> &Path {
        self.home.path()
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.home.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn write_zip(&self, name: &str, entries: &[(&str, &str)]) -> PathBuf {
        let path = self.home.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        for (entry, contents) in entries {
            zip.start_file(*entry, FileOptions::default()).unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        path
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("datacmp").unwrap();
        let config = self.home.path().join("config");
        let cache = self.home.path().join("cache");
        cmd.env("XDG_CONFIG_HOME", &config)
            .env("XDG_CACHE_HOME", &cache)
            .env("APPDATA", &config)
            .env("LOCALAPPDATA", &cache)
            .env("HOME", self.home.path())
            .env("RUST_LOG", "warn");
        cmd
    }
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({}):\n{}\nstderr:\n{}",
            e,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

#[test]
fn test_json_report() {
    let sandbox = Sandbox::new();
    let scheme = sandbox.write("orders.toml", ORDERS_SCHEME);

    let output = sandbox
        .cmd()
        .args(["compare", scheme.to_str().unwrap(), "--json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));

    let report = stdout_json(&output);
    assert_eq!(report["scheme"], "orders");
    assert_eq!(report["columns"], serde_json::json!(["id", "amount", "status"]));

    let summary = &report["summary"];
    assert_eq!(summary["total"], 4);
    assert_eq!(summary["matched"], 2);
    assert_eq!(summary["matched_with_differences"], 1);
    assert_eq!(summary["primary_only"], 1);
    assert_eq!(summary["shadow_only"], 1);

    let rows = report["rows"].as_array().unwrap();
    let statuses: Vec<&str> = rows.iter().map(|r| r["status"].as_str().unwrap()).collect();
    assert_eq!(statuses, vec!["MATCHED", "MATCHED", "PRIMARY_ONLY", "SHADOW_ONLY"]);
    assert_eq!(rows[0]["key"], serde_json::json!(["1"]));
    assert_eq!(rows[0]["cells"][1]["is_different"], false);
    assert_eq!(rows[1]["cells"][1]["is_different"], true);
    assert_eq!(rows[3]["key"], serde_json::json!(["4"]));
}

#[test]
fn test_json_diff_only_drops_identical_rows() {
    let sandbox = Sandbox::new();
    let scheme = sandbox.write("orders.toml", ORDERS_SCHEME);

    let output = sandbox
        .cmd()
        .args(["compare", scheme.to_str().unwrap(), "--json", "--diff-only"])
        .output()
        .unwrap();

    let report = stdout_json(&output);
    let keys: Vec<&str> = report["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["key"][0].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["2", "3", "4"]);
    // The summary still covers the whole run
    assert_eq!(report["summary"]["total"], 4);
}

#[test]
fn test_unknown_source_kind_fails() {
    let sandbox = Sandbox::new();
    let scheme = sandbox.write(
        "bad.toml",
        &ORDERS_SCHEME.replacen("kind = \"memory\"", "kind = \"mainframe\"", 1),
    );

    let output = sandbox
        .cmd()
        .args(["compare", scheme.to_str().unwrap(), "--json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("primary source is misconfigured"), "{}", stderr);
    assert!(stderr.contains("unknown data source kind 'mainframe'"), "{}", stderr);
}

#[test]
fn test_unknown_comparator_is_a_warning() {
    let sandbox = Sandbox::new();
    let scheme = sandbox.write(
        "orders.toml",
        &ORDERS_SCHEME.replace("name = \"numeric\"", "name = \"retired\""),
    );

    let output = sandbox
        .cmd()
        .args(["compare", scheme.to_str().unwrap(), "--json"])
        .output()
        .unwrap();
    let report = stdout_json(&output);
    let warnings = report["warnings"].as_array().unwrap();
    assert!(warnings.iter().any(|w| w.as_str().unwrap().contains("retired")));
    // Amount is no longer compared, so only the one-sided rows differ
    assert_eq!(report["summary"]["matched_with_differences"], 0);
}

#[test]
fn test_modules_lists_builtins() {
    let sandbox = Sandbox::new();
    let output = sandbox.cmd().args(["modules", "--json"]).output().unwrap();
    assert!(output.status.success());

    let listing = stdout_json(&output);
    let modules = listing["modules"].as_array().unwrap();
    let names: Vec<(&str, &str)> = modules
        .iter()
        .map(|m| (m["group"].as_str().unwrap(), m["name"].as_str().unwrap()))
        .collect();
    assert!(names.contains(&("datasource", "memory")));
    assert!(names.contains(&("datasource", "command")));
    assert!(names.contains(&("comparator", "default")));
    assert!(names.contains(&("comparator", "numeric")));
    assert!(modules.iter().all(|m| m["origin"] == "builtin"));
    assert!(listing["skipped"].as_array().unwrap().is_empty());
}

#[test]
fn test_plugin_directory_is_discovered() {
    let sandbox = Sandbox::new();
    let plugins = sandbox.path().join("plugins");
    sandbox.write_zip("plugins/ledger.zip", &[("plugin.toml", LEDGER_MANIFEST)]);
    sandbox.write_zip("plugins/empty.zip", &[("README", "no manifest here")]);

    let output = sandbox
        .cmd()
        .args(["modules", "--json", "--plugins", plugins.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());

    let listing = stdout_json(&output);
    let cents = listing["modules"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["name"] == "cents")
        .expect("plugin comparator listed");
    assert_eq!(cents["group"], "comparator");
    assert_eq!(cents["origin"], "plugin:ledger@0.3.1");

    let skipped = listing["skipped"].as_array().unwrap();
    assert_eq!(skipped.len(), 1);
    assert!(skipped[0]["archive"].as_str().unwrap().ends_with("empty.zip"));
}

#[test]
fn test_compare_with_plugin_comparator() {
    let sandbox = Sandbox::new();
    let plugins = sandbox.path().join("plugins");
    sandbox.write_zip("plugins/ledger.zip", &[("plugin.toml", LEDGER_MANIFEST)]);
    let scheme = sandbox.write(
        "cents.toml",
        r#"
[[items]]
code = "id"
unique = true

[[items]]
code = "amount"
[items.comparator]
name = "cents"

[primary]
kind = "memory"
[primary.options]
rows = [{ id = "1", amount = 9.99 }]

[shadow]
kind = "memory"
[shadow.options]
rows = [{ id = "1", amount = "9.995" }]
"#,
    );

    sandbox
        .cmd()
        .args(["compare", scheme.to_str().unwrap(), "-p", plugins.to_str().unwrap()])
        .assert()
        .success();

    // Without the plugin the binding is unavailable but the run still succeeds
    sandbox
        .cmd()
        .args(["compare", scheme.to_str().unwrap()])
        .assert()
        .success();
}

#[test]
fn test_columns_shows_mapped_codes() {
    let sandbox = Sandbox::new();
    let scheme = sandbox.write("orders.toml", ORDERS_SCHEME);

    let output = sandbox
        .cmd()
        .args(["columns", scheme.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert!(lines.contains(&"ORDER_ID -> id"), "{:?}", lines);
    assert!(lines.contains(&"amount"));
}
