//! Schema file content invariants.
//!
//! The three dialect DDL files ship with the crate and must stay in sync:
//! same schema_version, dialect-appropriate types, and the MySQL rendition
//! of agent_memory must use key_name instead of the reserved word.

use shared_context_storage::db::{Dialect, split_sql_statements};
use std::path::PathBuf;

fn schema_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("schema")
}

fn read_schema(dialect: Dialect) -> String {
    let path = schema_dir().join(dialect.schema_file_name());
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()))
}

fn declared_version(script: &str) -> u32 {
    let marker = "VALUES (";
    let start = script
        .find("schema_version")
        .and_then(|at| script[at..].find(marker).map(|i| at + i + marker.len()))
        .expect("schema_version insert present");
    script[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .expect("numeric schema version")
}

#[test]
fn postgresql_schema_uses_native_types() {
    let script = read_schema(Dialect::Postgres);
    assert!(script.contains("SERIAL PRIMARY KEY"));
    assert!(script.contains("BIGSERIAL PRIMARY KEY"));
    assert!(script.contains("JSONB"));
    assert!(script.contains("TIMESTAMPTZ"));
    assert!(script.contains("USING GIN"));
    assert!(script.contains("CREATE OR REPLACE FUNCTION"));
    assert!(script.contains("$$ LANGUAGE plpgsql"));
}

#[test]
fn mysql_schema_uses_native_types() {
    let script = read_schema(Dialect::MySql);
    assert!(script.contains("AUTO_INCREMENT PRIMARY KEY"));
    assert!(script.contains("ENGINE=InnoDB"));
    assert!(script.contains("utf8mb4"));
    assert!(script.contains("JSON_VALID"));
    assert!(script.contains("ENUM('public', 'private', 'agent_only')"));
    assert!(script.contains("key_name"));
}

#[test]
fn mysql_agent_memory_never_declares_bare_key_column() {
    let script = read_schema(Dialect::MySql);
    let table_start = script
        .find("CREATE TABLE IF NOT EXISTS agent_memory")
        .expect("agent_memory table present");
    let table_end = script[table_start..]
        .find(';')
        .map(|i| table_start + i)
        .expect("table statement terminated");
    let table = &script[table_start..table_end];

    for line in table.lines().map(str::trim) {
        assert!(
            !line.starts_with("key "),
            "bare key column declared in MySQL agent_memory: {line}"
        );
    }
    assert!(table.contains("key_name VARCHAR(255) NOT NULL"));
}

#[test]
fn all_dialects_declare_the_same_schema_version() {
    let sqlite = declared_version(&read_schema(Dialect::Sqlite));
    let postgres = declared_version(&read_schema(Dialect::Postgres));
    let mysql = declared_version(&read_schema(Dialect::MySql));
    assert_eq!(sqlite, 3);
    assert_eq!(sqlite, postgres);
    assert_eq!(postgres, mysql);
}

#[test]
fn all_dialects_declare_core_tables() {
    for dialect in [Dialect::Sqlite, Dialect::Postgres, Dialect::MySql] {
        let script = read_schema(dialect);
        for table in [
            "sessions",
            "messages",
            "agent_memory",
            "audit_log",
            "schema_version",
        ] {
            assert!(
                script.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
                "{dialect} schema missing table {table}"
            );
        }
    }
}

#[test]
fn postgresql_function_bodies_survive_splitting() {
    let statements = split_sql_statements(&read_schema(Dialect::Postgres));
    for statement in &statements {
        assert_eq!(
            statement.matches("$$").count() % 2,
            0,
            "unbalanced function body in statement: {statement}"
        );
    }
    let functions: Vec<_> = statements
        .iter()
        .filter(|s| s.contains("CREATE OR REPLACE FUNCTION"))
        .collect();
    assert_eq!(functions.len(), 2);
    assert!(functions.iter().all(|s| s.contains("LANGUAGE plpgsql")));
}

#[test]
fn mysql_procedure_body_survives_splitting() {
    let statements = split_sql_statements(&read_schema(Dialect::MySql));
    let procedure = statements
        .iter()
        .find(|s| s.contains("CREATE PROCEDURE"))
        .expect("procedure statement present");
    assert!(procedure.contains("DELETE FROM agent_memory"));
    assert!(procedure.contains("DELETE FROM audit_log"));
    assert!(procedure.trim_end().ends_with("END"));
}

#[test]
fn sqlite_trigger_bodies_survive_splitting() {
    let statements = split_sql_statements(&read_schema(Dialect::Sqlite));
    let triggers: Vec<_> = statements
        .iter()
        .filter(|s| s.contains("CREATE TRIGGER"))
        .collect();
    assert_eq!(triggers.len(), 2);
    for trigger in triggers {
        assert!(trigger.contains("BEGIN"));
        assert!(trigger.trim_end().ends_with("END"));
    }
}
