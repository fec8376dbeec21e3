//! Core value type
//!
//! The planner manipulates concrete values in a few places: literal and
//! bound-parameter operands of WHERE terms, LIKE patterns, and the sample
//! keys of stat4 histograms. `Value` follows the engine's storage classes
//! and comparison rules.

use std::cmp::Ordering;

use crate::schema::Affinity;

// ============================================================================
// Storage classes
// ============================================================================

/// Column data types (SQLITE_INTEGER, SQLITE_FLOAT, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum ColumnType {
    /// SQLITE_INTEGER = 1
    Integer = 1,
    /// SQLITE_FLOAT = 2
    Float = 2,
    /// SQLITE_TEXT = 3
    Text = 3,
    /// SQLITE_BLOB = 4
    Blob = 4,
    /// SQLITE_NULL = 5
    Null = 5,
}

// ============================================================================
// Value
// ============================================================================

/// Dynamic value (sqlite3_value)
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// NULL value
    #[default]
    Null,
    /// Integer value (64-bit signed)
    Integer(i64),
    /// Real/float value (64-bit IEEE 754)
    Real(f64),
    /// Text value (UTF-8 string)
    Text(String),
    /// Binary large object
    Blob(Vec<u8>),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Null => ColumnType::Null,
            Value::Integer(_) => ColumnType::Integer,
            Value::Real(_) => ColumnType::Float,
            Value::Text(_) => ColumnType::Text,
            Value::Blob(_) => ColumnType::Blob,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Real(_))
    }

    /// Text content, if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, if this value is an integer or an integral real
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Real(r) if r.fract() == 0.0 && r.abs() < 9.2e18 => Some(*r as i64),
            _ => None,
        }
    }

    /// Numeric content as a double
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Apply a column affinity the way the engine does before storing or
    /// comparing a value.
    pub fn apply_affinity(self, affinity: Affinity) -> Value {
        match affinity {
            Affinity::Text => match self {
                Value::Integer(i) => Value::Text(i.to_string()),
                Value::Real(r) => Value::Text(format_real(r)),
                other => other,
            },
            Affinity::Numeric | Affinity::Integer | Affinity::Real => {
                let converted = match &self {
                    Value::Text(s) => parse_numeric(s.trim()),
                    _ => None,
                };
                let value = converted.unwrap_or(self);
                match (affinity, value) {
                    (Affinity::Real, Value::Integer(i)) => Value::Real(i as f64),
                    (_, Value::Real(r)) if affinity != Affinity::Real => {
                        if r.fract() == 0.0 && r.abs() < 9.2e18 {
                            Value::Integer(r as i64)
                        } else {
                            Value::Real(r)
                        }
                    }
                    (_, v) => v,
                }
            }
            Affinity::Blob => self,
        }
    }

    /// Compare two values using the engine's cross-type ordering:
    /// NULL < numbers < text < blob. Text is compared with the named
    /// collation (BINARY, NOCASE or RTRIM).
    pub fn compare(&self, other: &Value, collation: Option<&str>) -> Ordering {
        let (ta, tb) = (self.class_rank(), other.class_rank());
        if ta != tb {
            return ta.cmp(&tb);
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => collate(a, b, collation),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (a, b) => {
                let x = a.as_f64().unwrap_or(0.0);
                let y = b.as_f64().unwrap_or(0.0);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        }
    }

    fn class_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Integer(_) | Value::Real(_) => 1,
            Value::Text(_) => 2,
            Value::Blob(_) => 3,
        }
    }
}

/// Compare two strings under a collating sequence
pub fn collate(a: &str, b: &str, collation: Option<&str>) -> Ordering {
    match collation {
        Some(c) if c.eq_ignore_ascii_case("NOCASE") => {
            let x = a.bytes().map(|c| c.to_ascii_lowercase());
            let y = b.bytes().map(|c| c.to_ascii_lowercase());
            x.cmp(y)
        }
        Some(c) if c.eq_ignore_ascii_case("RTRIM") => {
            a.trim_end_matches(' ').cmp(b.trim_end_matches(' '))
        }
        _ => a.as_bytes().cmp(b.as_bytes()),
    }
}

fn parse_numeric(s: &str) -> Option<Value> {
    if s.is_empty() {
        return None;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    match s.parse::<f64>() {
        Ok(r) if r.is_finite() => Some(Value::Real(r)),
        _ => None,
    }
}

fn format_real(r: f64) -> String {
    if r.fract() == 0.0 && r.abs() < 1e15 {
        format!("{:.1}", r)
    } else {
        format!("{}", r)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_type_ordering() {
        let null = Value::Null;
        let int = Value::Integer(5);
        let text = Value::from("a");
        let blob = Value::Blob(vec![0]);
        assert_eq!(null.compare(&int, None), Ordering::Less);
        assert_eq!(int.compare(&text, None), Ordering::Less);
        assert_eq!(text.compare(&blob, None), Ordering::Less);
        assert_eq!(Value::Integer(2).compare(&Value::Real(2.5), None), Ordering::Less);
    }

    #[test]
    fn test_nocase_collation() {
        let a = Value::from("ABC");
        let b = Value::from("abc");
        assert_eq!(a.compare(&b, Some("NOCASE")), Ordering::Equal);
        assert_eq!(a.compare(&b, None), Ordering::Less);
        assert_eq!(collate("x  ", "x", Some("RTRIM")), Ordering::Equal);
    }

    #[test]
    fn test_apply_affinity() {
        assert_eq!(
            Value::from("42").apply_affinity(Affinity::Integer),
            Value::Integer(42)
        );
        assert_eq!(
            Value::Integer(7).apply_affinity(Affinity::Text),
            Value::from("7")
        );
        assert_eq!(
            Value::Integer(3).apply_affinity(Affinity::Real),
            Value::Real(3.0)
        );
        assert_eq!(
            Value::from("abc").apply_affinity(Affinity::Numeric),
            Value::from("abc")
        );
    }
}
