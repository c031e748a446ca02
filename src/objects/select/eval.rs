//! Row-at-a-time select evaluation over a byte stream

use super::{
    CompareOp, Condition, FieldPath, Literal, Predicate, Projection, SelectFormat, SelectRow,
    SelectRows, SelectStatement,
};
use crate::objects::blob::ByteStream;
use crate::objects::error::{ObjectStoreError, ObjectStoreResult};
use futures_util::stream::{self, StreamExt};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Evaluate a statement over an object body, producing rows lazily
pub fn evaluate(body: ByteStream, format: SelectFormat, statement: SelectStatement) -> SelectRows {
    let state = RowState {
        lines: LineReader::new(body),
        format,
        statement,
        header: None,
        emitted: 0,
    };

    stream::try_unfold(state, next_row).boxed()
}

async fn next_row(mut state: RowState) -> ObjectStoreResult<Option<(SelectRow, RowState)>> {
    loop {
        if state.statement.limit.is_some_and(|limit| state.emitted >= limit) {
            return Ok(None);
        }
        let Some(line) = state.lines.next_line().await? else {
            return Ok(None);
        };

        let row = match state.format {
            SelectFormat::Json => eval_json(&state.statement, &line)?,
            SelectFormat::Csv => match &state.header {
                None => {
                    state.header = Some(parse_csv_line(&line)?);
                    continue;
                }
                Some(header) => eval_csv(&state.statement, header, &line)?,
            },
        };

        if let Some(row) = row {
            state.emitted += 1;
            return Ok(Some((row, state)));
        }
    }
}

struct RowState {
    lines: LineReader,
    format: SelectFormat,
    statement: SelectStatement,
    header: Option<Vec<String>>,
    emitted: usize,
}

/// Splits a byte stream into non-empty text lines
struct LineReader {
    body: ByteStream,
    buffer: Vec<u8>,
    /// Start of the next unread line in `buffer`
    start: usize,
    /// Bytes before this offset are known to hold no newline
    scanned: usize,
    done: bool,
}

impl LineReader {
    fn new(body: ByteStream) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            start: 0,
            scanned: 0,
            done: false,
        }
    }

    async fn next_line(&mut self) -> ObjectStoreResult<Option<String>> {
        loop {
            let from = self.scanned.max(self.start);
            if let Some(offset) = self.buffer[from..].iter().position(|b| *b == b'\n') {
                let end = from + offset;
                let line = decode_line(&self.buffer[self.start..end])?;
                self.start = end + 1;
                self.scanned = self.start;
                if line.trim().is_empty() {
                    continue;
                }
                return Ok(Some(line));
            }
            self.scanned = self.buffer.len();

            if self.done {
                if self.start >= self.buffer.len() {
                    return Ok(None);
                }
                let line = decode_line(&self.buffer[self.start..])?;
                self.start = self.buffer.len();
                if line.trim().is_empty() {
                    return Ok(None);
                }
                return Ok(Some(line));
            }

            // Drop consumed bytes before reading more
            if self.start > 0 {
                self.buffer.drain(..self.start);
                self.scanned -= self.start;
                self.start = 0;
            }
            match self.body.next().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk?),
                None => self.done = true,
            }
        }
    }
}

fn decode_line(bytes: &[u8]) -> ObjectStoreResult<String> {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec())
        .map_err(|e| ObjectStoreError::Select(format!("invalid UTF-8 in input: {}", e)))
}

/// A field value as seen by comparisons
enum Field<'a> {
    Number(f64),
    Text(&'a str),
    Bool(bool),
    Missing,
}

impl<'a> Field<'a> {
    fn from_json(value: Option<&'a Value>) -> Self {
        match value {
            Some(Value::Number(n)) => n.as_f64().map(Field::Number).unwrap_or(Field::Missing),
            Some(Value::String(s)) => Field::Text(s),
            Some(Value::Bool(b)) => Field::Bool(*b),
            _ => Field::Missing,
        }
    }

    fn text(&self) -> Option<String> {
        match self {
            Field::Number(n) => Some(n.to_string()),
            Field::Text(s) => Some(s.to_string()),
            Field::Bool(b) => Some(b.to_string()),
            Field::Missing => None,
        }
    }
}

fn test_condition(condition: &Condition, field: Field<'_>) -> bool {
    match &condition.predicate {
        Predicate::Like(regex) => field.text().map(|s| regex.is_match(&s)).unwrap_or(false),
        Predicate::Compare(op, literal) => {
            let ordering = match (&field, literal) {
                (Field::Number(a), Literal::Number(b)) => a.partial_cmp(b),
                (Field::Text(a), Literal::Number(b)) => {
                    a.trim().parse::<f64>().ok().and_then(|a| a.partial_cmp(b))
                }
                (Field::Number(a), Literal::String(b)) => {
                    b.trim().parse::<f64>().ok().and_then(|b| a.partial_cmp(&b))
                }
                (Field::Text(a), Literal::String(b)) => Some((*a).cmp(b.as_str())),
                (Field::Bool(a), Literal::Bool(b)) => return bool_op(*op, *a == *b),
                (Field::Text(a), Literal::Bool(b)) => {
                    return match a.trim().to_ascii_lowercase().parse::<bool>() {
                        Ok(a) => bool_op(*op, a == *b),
                        Err(_) => false,
                    }
                }
                _ => return false,
            };
            match ordering {
                Some(ordering) => apply(*op, ordering),
                None => *op == CompareOp::Ne,
            }
        }
    }
}

fn bool_op(op: CompareOp, equal: bool) -> bool {
    match op {
        CompareOp::Eq => equal,
        CompareOp::Ne => !equal,
        _ => false,
    }
}

fn apply(op: CompareOp, ordering: Ordering) -> bool {
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Lte => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Gte => ordering != Ordering::Less,
    }
}

fn lookup<'a>(record: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(record, |value, segment| value.as_object()?.get(segment))
}

fn eval_json(statement: &SelectStatement, line: &str) -> ObjectStoreResult<Option<SelectRow>> {
    let record: Value = serde_json::from_str(line)
        .map_err(|e| ObjectStoreError::Select(format!("invalid JSON record: {}", e)))?;

    let matched = statement
        .conditions
        .iter()
        .all(|c| test_condition(c, Field::from_json(lookup(&record, &c.path.segments))));
    if !matched {
        return Ok(None);
    }

    let row = match &statement.projection {
        Projection::All => record,
        Projection::Paths(paths) => {
            let mut projected = Map::new();
            for path in paths {
                if let Some(value) = lookup(&record, &path.segments) {
                    projected.insert(path.name().to_string(), value.clone());
                }
            }
            Value::Object(projected)
        }
    };
    Ok(Some(SelectRow::Json(row)))
}

fn parse_csv_line(line: &str) -> ObjectStoreResult<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    match reader.records().next() {
        Some(record) => Ok(record
            .map_err(|e| ObjectStoreError::Select(format!("invalid CSV record: {}", e)))?
            .iter()
            .map(str::to_string)
            .collect()),
        None => Ok(Vec::new()),
    }
}

/// Resolve a column by header name, or by `_N` position (1-based)
fn column_index(header: &[String], name: &str) -> Option<usize> {
    header.iter().position(|h| h == name).or_else(|| {
        name.strip_prefix('_')
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n >= 1)
            .map(|n| n - 1)
    })
}

fn csv_field<'r>(header: &[String], record: &'r [String], path: &FieldPath) -> Option<&'r str> {
    if path.segments.len() != 1 {
        return None;
    }
    column_index(header, path.name())
        .and_then(|i| record.get(i))
        .map(String::as_str)
}

fn eval_csv(
    statement: &SelectStatement,
    header: &[String],
    line: &str,
) -> ObjectStoreResult<Option<SelectRow>> {
    let record = parse_csv_line(line)?;

    let matched = statement.conditions.iter().all(|c| {
        let field = csv_field(header, &record, &c.path)
            .map(Field::Text)
            .unwrap_or(Field::Missing);
        test_condition(c, field)
    });
    if !matched {
        return Ok(None);
    }

    let row = match &statement.projection {
        Projection::All => record.clone(),
        Projection::Paths(paths) => paths
            .iter()
            .map(|p| csv_field(header, &record, p).unwrap_or("").to_string())
            .collect(),
    };
    Ok(Some(SelectRow::Csv(row)))
}
