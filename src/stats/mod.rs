//! Table and column statistics for the out-of-scope optimizer. Collected
//! by sampling, not exact computation, except for row/page counts.

use crate::common::Value;
use std::collections::HashMap;

const SAMPLE_LIMIT: usize = 1000;
const TOP_K: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct ColumnStats {
    pub distinct_estimate: usize,
    pub null_count: usize,
    pub min: Option<Value>,
    pub max: Option<Value>,
    /// Most common values, most frequent first, capped at `TOP_K`.
    pub top_k: Vec<(Value, usize)>,
}

#[derive(Debug, Clone, Default)]
pub struct TableStats {
    pub row_count: usize,
    pub page_count: usize,
    pub avg_row_size: f64,
    pub columns: Vec<ColumnStats>,
}

impl TableStats {
    /// Fraction of rows expected to equal `value` in `column`, for a
    /// simple equality predicate; `1 / distinct_estimate`, or a small
    /// constant fallback when there is no sample yet.
    pub fn equality_selectivity(&self, column: usize, value: &Value) -> f64 {
        let Some(stats) = self.columns.get(column) else { return 0.1 };
        if let Some((_, freq)) = stats.top_k.iter().find(|(v, _)| v == value) {
            if self.row_count > 0 {
                return *freq as f64 / self.row_count as f64;
            }
        }
        if stats.distinct_estimate > 0 {
            1.0 / stats.distinct_estimate as f64
        } else {
            0.1
        }
    }
}

/// Orders numeric/string values for min/max tracking; other types are
/// skipped (per spec, min/max is numeric/string only).
fn comparable_key(v: &Value) -> Option<f64> {
    match v {
        Value::TinyInt(x) => Some(*x as f64),
        Value::SmallInt(x) => Some(*x as f64),
        Value::Int(x) => Some(*x as f64),
        Value::BigInt(x) => Some(*x as f64),
        Value::Float(x) => Some(*x as f64),
        Value::Double(x) => Some(*x),
        _ => None,
    }
}

fn is_string(v: &Value) -> bool {
    matches!(v, Value::Char(_) | Value::Varchar(_) | Value::Text(_))
}

fn string_of(v: &Value) -> Option<&str> {
    match v {
        Value::Char(s) | Value::Varchar(s) | Value::Text(s) => Some(s),
        _ => None,
    }
}

pub struct StatisticsCollector;

impl StatisticsCollector {
    /// Builds [`TableStats`] from up to `SAMPLE_LIMIT` rows. `rows` is the
    /// already-filtered, visible set the engine passes in; sampling
    /// beyond that cap is the caller's responsibility (e.g. stride over a
    /// full scan) — this just bounds the in-memory cardinality work.
    pub fn collect(rows: &[Vec<Value>], page_count: usize) -> TableStats {
        let row_count = rows.len();
        let sample: &[Vec<Value>] = if rows.len() > SAMPLE_LIMIT { &rows[..SAMPLE_LIMIT] } else { rows };
        let num_columns = sample.first().map(|r| r.len()).unwrap_or(0);

        let mut columns = Vec::with_capacity(num_columns);
        let mut total_bytes = 0usize;

        for col in 0..num_columns {
            let mut counts: HashMap<String, (Value, usize)> = HashMap::new();
            let mut null_count = 0;
            let mut min_num = f64::INFINITY;
            let mut max_num = f64::NEG_INFINITY;
            let mut min_str: Option<String> = None;
            let mut max_str: Option<String> = None;
            let mut has_numeric = false;

            for row in sample {
                let v = &row[col];
                total_bytes += Self::value_size(v);
                if v.is_null() {
                    null_count += 1;
                    continue;
                }
                counts.entry(format!("{v}")).or_insert_with(|| (v.clone(), 0)).1 += 1;
                if let Some(n) = comparable_key(v) {
                    has_numeric = true;
                    min_num = min_num.min(n);
                    max_num = max_num.max(n);
                } else if is_string(v) {
                    if let Some(s) = string_of(v) {
                        let smaller = match &min_str {
                            Some(m) => s < m.as_str(),
                            None => true,
                        };
                        if smaller {
                            min_str = Some(s.to_string());
                        }
                        let larger = match &max_str {
                            Some(m) => s > m.as_str(),
                            None => true,
                        };
                        if larger {
                            max_str = Some(s.to_string());
                        }
                    }
                }
            }

            let mut top_k: Vec<(Value, usize)> = counts.into_values().collect();
            top_k.sort_by(|a, b| b.1.cmp(&a.1));
            top_k.truncate(TOP_K);

            let (min, max) = if has_numeric {
                (sample.iter().map(|r| &r[col]).find(|v| comparable_key(v) == Some(min_num)).cloned(),
                 sample.iter().map(|r| &r[col]).find(|v| comparable_key(v) == Some(max_num)).cloned())
            } else {
                (min_str.map(Value::Varchar), max_str.map(Value::Varchar))
            };

            columns.push(ColumnStats {
                distinct_estimate: top_k.len().max(Self::distinct_count(&top_k, sample.len())),
                null_count,
                min,
                max,
                top_k,
            });
        }

        let avg_row_size = if sample.is_empty() { 0.0 } else { total_bytes as f64 / sample.len() as f64 };
        TableStats { row_count, page_count, avg_row_size, columns }
    }

    fn distinct_count(top_k: &[(Value, usize)], _sample_len: usize) -> usize {
        top_k.len()
    }

    fn value_size(v: &Value) -> usize {
        match v {
            Value::Null => 1,
            Value::TinyInt(_) | Value::Boolean(_) => 1,
            Value::SmallInt(_) => 2,
            Value::Int(_) | Value::Float(_) | Value::Date(_) | Value::Time(_) => 4,
            Value::BigInt(_) | Value::Double(_) | Value::DateTime(_) | Value::Timestamp(_) => 8,
            Value::Uuid(_) => 16,
            Value::Char(s) | Value::Varchar(s) | Value::Text(s) | Value::Decimal(s) | Value::Json(s) | Value::Xml(s) => s.len(),
            Value::Binary(b) | Value::Blob(b) | Value::Geometry(b) => b.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_row_count_nulls_and_min_max() {
        let rows = vec![
            vec![Value::Int(3)],
            vec![Value::Int(1)],
            vec![Value::Null],
            vec![Value::Int(3)],
        ];
        let stats = StatisticsCollector::collect(&rows, 2);
        assert_eq!(stats.row_count, 4);
        let col = &stats.columns[0];
        assert_eq!(col.null_count, 1);
        assert_eq!(col.min, Some(Value::Int(1)));
        assert_eq!(col.max, Some(Value::Int(3)));
        assert_eq!(col.top_k[0].0, Value::Int(3));
        assert_eq!(col.top_k[0].1, 2);
    }

    #[test]
    fn equality_selectivity_uses_top_k_frequency() {
        let rows = vec![vec![Value::Int(1)], vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(1)]];
        let stats = StatisticsCollector::collect(&rows, 1);
        let sel = stats.equality_selectivity(0, &Value::Int(1));
        assert!((sel - 0.75).abs() < 1e-9);
    }
}
