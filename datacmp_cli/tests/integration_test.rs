use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Helper struct to manage scheme and data files
struct TestFixture {
    temp_dir: TempDir,
}

impl TestFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        TestFixture { temp_dir }
    }

    /// Create a file with content inside the fixture directory
    fn create_file<P: AsRef<Path>>(&self, path: P, content: &str) -> PathBuf {
        let file_path = self.temp_dir.path().join(path.as_ref());
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        fs::write(&file_path, content).expect("Failed to write file");
        file_path
    }

    /// Write a scheme comparing two CSV files on `id`, comparing `name`
    fn csv_scheme(&self, primary_csv: &str, shadow_csv: &str) -> PathBuf {
        let primary = self.create_file("primary.csv", primary_csv);
        let shadow = self.create_file("shadow.csv", shadow_csv);
        let scheme = format!(
            r#"
version = 1
name = "csv fixture"

[[items]]
code = "id"
unique = true

[[items]]
code = "name"

[primary]
kind = "file"
[primary.options]
path = '{}'

[shadow]
kind = "file"
[shadow.options]
path = '{}'
"#,
            primary.display(),
            shadow.display()
        );
        self.create_file("scheme.toml", &scheme)
    }
}

/// Helper to run the CLI binary with isolated config and cache directories
fn run_cli(args: &[&str]) -> std::process::Output {
    let exe = env!("CARGO_BIN_EXE_datacmp");
    let config_dir = TempDir::new().expect("Failed to create config dir");
    let cache_dir = TempDir::new().expect("Failed to create cache dir");
    Command::new(exe)
        .args(args)
        .env("XDG_CONFIG_HOME", config_dir.path())
        .env("XDG_CACHE_HOME", cache_dir.path())
        .env("APPDATA", config_dir.path())
        .env("LOCALAPPDATA", cache_dir.path())
        .env("HOME", config_dir.path())
        .env("RUST_LOG", "info")
        .output()
        .expect("Failed to execute command")
}

fn run_cli_code(args: &[&str], expected: i32) -> std::process::Output {
    let output = run_cli(args);
    if output.status.code() != Some(expected) {
        eprintln!("STDOUT:\n{}", String::from_utf8_lossy(&output.stdout));
        eprintln!("STDERR:\n{}", String::from_utf8_lossy(&output.stderr));
        panic!("Expected exit code {}, got {}", expected, output.status);
    }
    output
}

#[test]
fn test_identical_sources() {
    let fixture = TestFixture::new();
    let scheme = fixture.csv_scheme("id,name\n1,A\n2,B\n", "id,name\n2,B\n1,A\n");

    let output = run_cli_code(&["compare", scheme.to_str().unwrap(), "--no-color"], 0);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Comparison Results: csv fixture"));
    assert!(stdout.contains("Identical:       2"));
    assert!(stdout.contains("Primary only:    0"));
}

#[test]
fn test_differences_exit_with_two() {
    let fixture = TestFixture::new();
    let scheme = fixture.csv_scheme("id,name\n1,A\n2,B\n", "id,name\n1,A\n3,C\n");

    let output = run_cli_code(&["compare", scheme.to_str().unwrap(), "--no-color"], 2);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Primary only:    1"));
    assert!(stdout.contains("Shadow only:     1"));
    assert!(stdout.contains("<<"));
    assert!(stdout.contains(">>"));
}

#[test]
fn test_changed_cell_shows_both_values() {
    let fixture = TestFixture::new();
    let scheme = fixture.csv_scheme("id,name\n1,Alice\n", "id,name\n1,Alicia\n");

    let output = run_cli_code(&["compare", scheme.to_str().unwrap(), "--no-color"], 2);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Alice ❌ Alicia"));
    assert!(stdout.contains("Different:       1"));
}

#[test]
fn test_diff_only_hides_identical_rows() {
    let fixture = TestFixture::new();
    let scheme = fixture.csv_scheme(
        "id,name\n1,kept-same\n2,before\n",
        "id,name\n1,kept-same\n2,after\n",
    );

    let output = run_cli_code(&["compare", scheme.to_str().unwrap(), "--no-color", "-d"], 2);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("kept-same"));
    assert!(stdout.contains("before ❌ after"));
}

#[test]
fn test_missing_scheme_fails() {
    let fixture = TestFixture::new();
    let missing = fixture.temp_dir.path().join("nope.toml");
    let output = run_cli_code(&["compare", missing.to_str().unwrap()], 1);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Cannot load scheme"));
}

#[test]
fn test_scheme_without_key_fails_before_fetch() {
    let fixture = TestFixture::new();
    let scheme = fixture.csv_scheme("id,name\n1,A\n", "id,name\n1,A\n");
    let text = fs::read_to_string(&scheme).unwrap().replace("unique = true", "unique = false");
    fs::write(&scheme, text).unwrap();

    let output = run_cli_code(&["compare", scheme.to_str().unwrap()], 1);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no data item is flagged unique"), "{}", stderr);
}

#[test]
fn test_failed_side_is_named() {
    let fixture = TestFixture::new();
    let scheme = fixture.csv_scheme("id,name\n1,A\n", "id,name\n1,A\n");
    fs::remove_file(fixture.temp_dir.path().join("primary.csv")).unwrap();

    let output = run_cli_code(&["compare", scheme.to_str().unwrap()], 1);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("primary source failed validation"), "{}", stderr);
}

#[test]
fn test_columns_lists_source_fields() {
    let fixture = TestFixture::new();
    let scheme = fixture.csv_scheme("id,name,extra\n1,A,x\n", "ID,NAME\n1,A\n");

    let output = run_cli_code(&["columns", scheme.to_str().unwrap()], 0);
    assert_eq!(String::from_utf8_lossy(&output.stdout), "id\nname\nextra\n");

    let output = run_cli_code(&["columns", scheme.to_str().unwrap(), "--side", "shadow"], 0);
    assert_eq!(String::from_utf8_lossy(&output.stdout), "ID\nNAME\n");
}
