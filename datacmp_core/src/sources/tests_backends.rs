#[cfg(test)]
mod tests {
    use crate::sources::{CommandSource, MemorySource, SourceDescriptor};
    use datacmp_common::{DataSource, KeyMapping, Row, SourceBase, Value};
    use tempfile::TempDir;

    // ============================================================================
    // CommandSource Tests
    // ============================================================================

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_source_reads_json_rows() {
        let source = CommandSource::new(
            "sh",
            vec![
                "-c".to_string(),
                r#"echo '[{"ID": 1, "NAME": "A"}, {"ID": 2, "NAME": null}]'"#.to_string(),
            ],
        );
        source.validate().await.expect("sh should be on PATH");

        let rows = source.fetch_rows().await.expect("fetch failed");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("ID"), Some(&Value::Int(1)));
        assert_eq!(rows[1].get("NAME"), Some(&Value::Null));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_source_failure_carries_stderr() {
        let source = CommandSource::new(
            "sh",
            vec!["-c".to_string(), "echo 'no such table' >&2; exit 3".to_string()],
        );
        let err = source.fetch_rows().await.expect_err("fetch should fail");
        assert!(err.reason.contains("no such table"), "got: {}", err.reason);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_source_rejects_non_json() {
        let source = CommandSource::new("sh", vec!["-c".to_string(), "echo hello".to_string()]);
        let err = source.fetch_rows().await.expect_err("fetch should fail");
        assert!(err.reason.contains("did not print valid JSON"));
    }

    #[tokio::test]
    async fn test_command_source_validate_unknown_program() {
        let source = CommandSource::new("datacmp-surely-missing-program", vec![]);
        let err = source.validate().await.expect_err("validate should fail");
        assert_eq!(err.reason, "program 'datacmp-surely-missing-program' not found");

        let temp = TempDir::new().expect("Failed to create temp dir");
        let source = CommandSource::new("bin/export", vec![]).with_working_dir(temp.path());
        assert!(source.validate().await.is_err());
    }

    #[test]
    fn test_command_source_from_descriptor() {
        let descriptor = SourceDescriptor::new(
            "command",
            serde_json::json!({"program": "export-rows", "args": ["--day", "today"]}),
        )
        .with_key_to_code(KeyMapping::new().map("ID", "id"));
        let source = CommandSource::from_descriptor(&descriptor).expect("descriptor should decode");
        assert_eq!(source.kind(), "command");
        assert_eq!(source.describe(), "command:export-rows");
        assert_eq!(source.key_to_code().field_for("id"), Some("ID"));
    }

    // ============================================================================
    // Cross-backend Tests
    // ============================================================================

    #[cfg(all(feature = "file-sources", feature = "database"))]
    #[tokio::test]
    async fn test_csv_and_sqlite_normalize_alike() {
        use crate::sources::{DatabaseSource, FileSource};

        let temp = TempDir::new().expect("Failed to create temp dir");
        let csv_path = temp.path().join("orders.csv");
        std::fs::write(&csv_path, "id,amount\n1,10\n2,2.5\n").expect("Failed to write csv");

        let db_path = temp.path().join("orders.db");
        let conn = rusqlite::Connection::open(&db_path).expect("Failed to create db");
        conn.execute_batch(
            "CREATE TABLE orders (id INTEGER, amount REAL);
             INSERT INTO orders VALUES (1, 10.0), (2, 2.5);",
        )
        .expect("Failed to seed db");
        drop(conn);

        let csv_rows = FileSource::open(&csv_path)
            .expect("csv source")
            .fetch_rows()
            .await
            .expect("csv fetch");
        let db_rows = DatabaseSource::new(&db_path, "SELECT id, amount FROM orders ORDER BY id")
            .fetch_rows()
            .await
            .expect("db fetch");

        let normalized = |rows: &[Row]| {
            rows.iter()
                .map(|r| r.iter().map(|(_, v)| v.normalized()).collect::<Vec<_>>())
                .collect::<Vec<_>>()
        };
        assert_eq!(normalized(&csv_rows), normalized(&db_rows));
    }

    #[tokio::test]
    async fn test_memory_source_carries_base() {
        let base = SourceBase::new(KeyMapping::new().map("ORDER_ID", "id")).with_script("cat");
        let source = MemorySource::new(vec![Row::new().with("ORDER_ID", "7")]).with_base(base);
        assert_eq!(source.base().script.as_deref(), Some("cat"));
        let rows = source.fetch_rows().await.expect("fetch");
        assert_eq!(source.key_to_code().value_for(&rows[0], "id"), Value::from("7"));
    }
}
