//! Column sorting for record and student lists.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;

const NUMERIC_KEYS: &[&str] = &["caseNo", "caseId", "sessionNumber", "recordId"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SortSpec {
    pub key: String,
    #[serde(default)]
    pub direction: Direction,
}

impl SortSpec {
    pub fn new(key: &str, direction: Direction) -> Self {
        Self {
            key: key.to_string(),
            direction,
        }
    }

    /// Reads `params.sort`; a missing or keyless sort means "leave as is".
    pub fn from_params(params: &Value) -> Option<SortSpec> {
        let raw = params.get("sort")?;
        let spec: SortSpec = serde_json::from_value(raw.clone()).ok()?;
        if spec.key.trim().is_empty() {
            None
        } else {
            Some(spec)
        }
    }
}

/// Stable sort of JSON objects by one key.
///
/// Missing and null values sort first ascending. Dates compare as calendar
/// dates, the id/number columns compare as integers, and strings compare
/// case-insensitively. Descending is the exact reverse of ascending.
pub fn sort_records(records: &mut [Value], spec: &SortSpec) {
    let key = spec.key.as_str();
    records.sort_by(|a, b| {
        let ord = compare_asc(key, a.get(key), b.get(key));
        match spec.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        }
    });
}

fn is_null(v: Option<&Value>) -> bool {
    matches!(v, None | Some(Value::Null))
}

fn compare_asc(key: &str, a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (is_null(a), is_null(b)) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a, b),
        _ => return Ordering::Equal,
    };

    if key == "date" {
        return parse_date(a).cmp(&parse_date(b));
    }

    if NUMERIC_KEYS.contains(&key) {
        return match (leading_int(a), leading_int(b)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => x.cmp(&y),
        };
    }

    match (a, b) {
        (Value::String(x), Value::String(y)) => x
            .to_lowercase()
            .cmp(&y.to_lowercase())
            .then_with(|| x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or_default()
            .total_cmp(&y.as_f64().unwrap_or_default()),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Mixed types order by kind: booleans, numbers, strings, arrays, objects.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Accepts `YYYY-MM-DD` or anything starting with it (timestamps).
pub fn parse_date(v: &Value) -> NaiveDate {
    v.as_str()
        .and_then(|s| s.get(..10))
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .unwrap_or_else(epoch)
}

fn leading_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim_start();
            let mut end = 0;
            for (i, ch) in s.char_indices() {
                if ch.is_ascii_digit() || (i == 0 && (ch == '-' || ch == '+')) {
                    end = i + ch.len_utf8();
                } else {
                    break;
                }
            }
            s[..end].parse::<i64>().ok()
        }
        _ => None,
    }
}
