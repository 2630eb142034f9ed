//! `id,target` table parsing
//!
//! Rows are comma separated. Fields may be wrapped in double quotes, in which
//! case commas are literal and `""` stands for one quote. Blank lines are
//! skipped and fields are trimmed. Columns past the second are ignored.

use crate::error::CollectError;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// One row of the target table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRow {
    /// Identifier, used as the prefix of every work unit id
    pub id: String,
    /// Target as written in the table (not yet normalized)
    pub target: String,
}

/// Read and parse a target table from disk
pub fn read_table(path: &Path) -> Result<Vec<TargetRow>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read file with targets ({})", path.display()))?;

    let rows = parse_table(&contents)
        .with_context(|| format!("failed to parse file with targets ({})", path.display()))?;

    Ok(rows)
}

/// Parse table contents
pub fn parse_table(contents: &str) -> std::result::Result<Vec<TargetRow>, CollectError> {
    let mut rows = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }

        let fields = split_fields(line, line_no)?;
        if fields.len() < 2 {
            return Err(CollectError::MalformedRow {
                line: line_no,
                fields: fields.len(),
            });
        }

        let mut fields = fields.into_iter();
        let id = fields.next().unwrap_or_default();
        let target = fields.next().unwrap_or_default();
        rows.push(TargetRow { id, target });
    }

    Ok(rows)
}

fn split_fields(line: &str, line_no: usize) -> std::result::Result<Vec<String>, CollectError> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.trim().is_empty() => {
                field.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => {
                fields.push(field.trim().to_string());
                field.clear();
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(CollectError::UnterminatedQuote { line: line_no });
    }
    fields.push(field.trim().to_string());

    Ok(fields)
}
