//! Schema file resolution and loading.
//!
//! One DDL file ships per dialect. Loading is lazy: a missing file is
//! reported at first load, not at manager construction. Statement splitting
//! must keep multi-statement bodies intact - PostgreSQL `$$`-quoted function
//! bodies, and `TRIGGER`/`PROCEDURE` blocks whose `BEGIN ... END` contains
//! `;` - while splitting ordinary DDL on the terminating semicolon.

use crate::db::dialect::Dialect;
use crate::error::{StorageError, StorageResult};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static BLOCK_OPENER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bCREATE\s+(OR\s+REPLACE\s+)?(FUNCTION|PROCEDURE|TRIGGER)\b")
        .expect("static regex")
});
static BEGIN_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bBEGIN\b").expect("static regex"));
static END_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bEND\b").expect("static regex"));

/// Resolve the DDL file path for a dialect inside a schema directory.
pub fn schema_file_path(schema_dir: &Path, dialect: Dialect) -> PathBuf {
    schema_dir.join(dialect.schema_file_name())
}

/// Read a dialect's schema file and split it into executable statements.
///
/// Missing files fail with [`StorageError::SchemaFileNotFound`].
pub fn load_schema_statements(schema_dir: &Path, dialect: Dialect) -> StorageResult<Vec<String>> {
    let path = schema_file_path(schema_dir, dialect);
    let script = std::fs::read_to_string(&path).map_err(|_| StorageError::SchemaFileNotFound {
        path: path.display().to_string(),
    })?;
    Ok(split_sql_statements(&script))
}

/// True while the accumulated text sits inside an unterminated function,
/// procedure, or trigger body.
///
/// Two block forms are tracked: `$$`-quoted bodies (unterminated while the
/// accumulated `$$` count is odd) and `BEGIN ... END` bodies opened by a
/// `CREATE FUNCTION/PROCEDURE/TRIGGER` (unterminated while `BEGIN`s
/// outnumber `END`s).
pub(crate) fn is_inside_function_block(accumulated: &str) -> bool {
    if accumulated.matches("$$").count() % 2 == 1 {
        return true;
    }
    if BLOCK_OPENER.is_match(accumulated) {
        let begins = BEGIN_WORD.find_iter(accumulated).count();
        let ends = END_WORD.find_iter(accumulated).count();
        if begins > ends {
            return true;
        }
    }
    false
}

/// Split a DDL script into statements, keeping block bodies whole.
///
/// Comment-only and blank lines outside a block are dropped. The trailing
/// `;` of each complete statement is stripped; semicolons inside block
/// bodies are preserved.
pub fn split_sql_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in script.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || (trimmed.starts_with("--") && current.is_empty()) {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') && !is_inside_function_block(&current) {
            let statement = current.trim().trim_end_matches(';').trim().to_string();
            if !statement.is_empty() {
                statements.push(statement);
            }
            current.clear();
        }
    }

    let tail = current.trim().trim_end_matches(';').trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}
