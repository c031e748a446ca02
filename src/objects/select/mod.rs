//! Select pushdown
//!
//! Evaluates a small SQL dialect against one stored object so callers read
//! only matching rows. Input is JSON Lines (one object per line) or CSV
//! whose first line is a header. Rows are produced lazily as the object
//! streams in; the resulting stream cannot be restarted.

mod eval;
mod parser;

pub use eval::evaluate;
pub use parser::parse_select;

use crate::objects::error::{ObjectStoreError, ObjectStoreResult};
use futures_util::stream::BoxStream;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Input serialization of the object being queried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectFormat {
    /// One JSON document per line
    #[default]
    Json,
    /// Comma separated, first line is the header
    Csv,
}

/// A select to run against one object
#[derive(Debug, Clone)]
pub struct SelectRequest {
    pub format: SelectFormat,
    pub expression: String,
}

impl SelectRequest {
    pub fn json(expression: impl Into<String>) -> Self {
        Self {
            format: SelectFormat::Json,
            expression: expression.into(),
        }
    }

    pub fn csv(expression: impl Into<String>) -> Self {
        Self {
            format: SelectFormat::Csv,
            expression: expression.into(),
        }
    }
}

/// One result row, in the input's format
#[derive(Debug, Clone, PartialEq)]
pub enum SelectRow {
    Json(serde_json::Value),
    Csv(Vec<String>),
}

impl SelectRow {
    /// Serialize the row as one output line (without the newline)
    pub fn to_line(&self) -> ObjectStoreResult<String> {
        match self {
            SelectRow::Json(value) => Ok(serde_json::to_string(value)?),
            SelectRow::Csv(fields) => {
                let mut writer = csv::WriterBuilder::new()
                    .terminator(csv::Terminator::Any(b'\n'))
                    .from_writer(Vec::new());
                writer
                    .write_record(fields)
                    .map_err(|e| ObjectStoreError::Select(e.to_string()))?;
                let bytes = writer
                    .into_inner()
                    .map_err(|e| ObjectStoreError::Select(e.to_string()))?;
                let line = String::from_utf8(bytes)
                    .map_err(|e| ObjectStoreError::Select(e.to_string()))?;
                Ok(line.trim_end_matches('\n').to_string())
            }
        }
    }

    /// The JSON document, for JSON rows
    pub fn into_json(self) -> Option<serde_json::Value> {
        match self {
            SelectRow::Json(value) => Some(value),
            SelectRow::Csv(_) => None,
        }
    }
}

/// Lazily produced result rows
pub type SelectRows = BoxStream<'static, ObjectStoreResult<SelectRow>>;

/// A parsed select expression
#[derive(Debug, Clone)]
pub struct SelectStatement {
    pub projection: Projection,
    /// All must hold for a row to be emitted
    pub conditions: Vec<Condition>,
    pub limit: Option<usize>,
}

/// Which fields each row carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    All,
    Paths(Vec<FieldPath>),
}

/// A dotted field reference, relative to the record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    pub segments: Vec<String>,
}

impl FieldPath {
    /// Drop a leading alias or `S3Object` segment
    pub(crate) fn without_source(mut self, alias: Option<&str>) -> Self {
        if self.segments.len() > 1 {
            let first = &self.segments[0];
            if first.eq_ignore_ascii_case("s3object") || Some(first.as_str()) == alias {
                self.segments.remove(0);
            }
        }
        self
    }

    /// Last segment, used as the output column name
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }
}

/// One `WHERE` term
#[derive(Debug, Clone)]
pub struct Condition {
    pub path: FieldPath,
    pub predicate: Predicate,
}

#[derive(Debug, Clone)]
pub enum Predicate {
    Compare(CompareOp, Literal),
    /// Compiled `LIKE` pattern
    Like(Regex),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Bool(bool),
}
