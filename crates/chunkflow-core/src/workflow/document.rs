//! Full-document result sets: dedupe, stable ordering and pagination.
//!
//! Rows are JSON objects. Two rows are duplicates when their `order_key`
//! values are equal; the first occurrence wins. Ordering is total over JSON
//! values: `null < bool < number < string < anything else`, so mixed-type
//! keys never make the sort unstable.

use std::cmp::Ordering;
use std::collections::HashSet;

use chunkflow_types::session::DocumentOrdering;
use serde::Serialize;
use serde_json::Value;

use super::batch::{batch_count, slice_batch, validate_batch_index};
use super::error::ValidationError;

/// Rows after dedupe and sort, plus the pre-dedupe row count.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRows {
    pub rows: Vec<Value>,
    pub total_count: usize,
}

/// One view of a prepared document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DocumentPage {
    /// A single page of the sorted rows.
    Paged {
        rows: Vec<Value>,
        batch_index: usize,
        batch_count: usize,
        total_count: usize,
    },
    /// Every sorted row (batch size unset or 0).
    Whole {
        rows: Vec<Value>,
        count: usize,
        total_count: usize,
    },
}

impl DocumentPage {
    pub fn rows(&self) -> &[Value] {
        match self {
            DocumentPage::Paged { rows, .. } | DocumentPage::Whole { rows, .. } => rows,
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) | Value::Object(_) => 4,
    }
}

/// Total order over JSON values used for document sorting.
pub fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => {
                    let x = x.as_f64().unwrap_or(f64::NAN);
                    let y = y.as_f64().unwrap_or(f64::NAN);
                    x.total_cmp(&y)
                }
            }
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(_) | Value::Object(_), Value::Array(_) | Value::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn key_of<'a>(row: &'a Value, key: &str) -> &'a Value {
    row.get(key).unwrap_or(&Value::Null)
}

/// Dedupe by `order_key` (first occurrence wins) then stable-sort by
/// `(order_key, secondary_key)`.
///
/// Rows that lack the order key are never treated as duplicates of each
/// other; they sort first, as nulls.
pub fn prepare_document_rows(rows: Vec<Value>, ordering: &DocumentOrdering) -> PreparedRows {
    let total_count = rows.len();
    let mut seen = HashSet::new();

    let mut rows: Vec<Value> = rows
        .into_iter()
        .filter(|row| match row.get(&ordering.order_key) {
            Some(key) => seen.insert(key.to_string()),
            None => true,
        })
        .collect();

    rows.sort_by(|a, b| {
        let primary = compare_json(key_of(a, &ordering.order_key), key_of(b, &ordering.order_key));
        match (&ordering.secondary_key, primary) {
            (Some(secondary), Ordering::Equal) => {
                compare_json(key_of(a, secondary), key_of(b, secondary))
            }
            _ => primary,
        }
    });

    PreparedRows { rows, total_count }
}

/// Prepare `rows` and return either one page or the whole sorted set.
///
/// `batch_size` of `None` or `Some(0)` returns everything.
pub fn page_document(
    rows: Vec<Value>,
    ordering: &DocumentOrdering,
    batch_size: Option<usize>,
    batch_index: i64,
) -> Result<DocumentPage, ValidationError> {
    let prepared = prepare_document_rows(rows, ordering);

    match batch_size {
        None | Some(0) => Ok(DocumentPage::Whole {
            count: prepared.rows.len(),
            total_count: prepared.total_count,
            rows: prepared.rows,
        }),
        Some(size) => {
            let count = batch_count(prepared.rows.len(), size);
            let index = validate_batch_index(batch_index, count)?;
            Ok(DocumentPage::Paged {
                rows: slice_batch(&prepared.rows, size, index).to_vec(),
                batch_index: index,
                batch_count: count,
                total_count: prepared.total_count,
            })
        }
    }
}
