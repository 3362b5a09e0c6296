//! Cell values.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single cell of the data matrix.
///
/// Stored untagged, so a row's data reads as plain JSON: `["A", 1, null]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Number(f64),
    Text(String),
}

impl CellValue {
    /// The value an untouched cell holds.
    pub fn empty() -> Self {
        CellValue::Text(String::new())
    }

    /// A row of `columns` empty cells.
    pub fn empty_row(columns: usize) -> Vec<CellValue> {
        vec![Self::empty(); columns]
    }

    /// Whether this is the empty sentinel.
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.is_empty())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Numeric reading of the cell: a number, or a non-empty string that
    /// parses as a finite number once trimmed.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => parse_numeric(s),
            CellValue::Null => None,
        }
    }

    /// Textual reading of the cell, as shown in the grid. Null reads as "".
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            CellValue::Null => Cow::Borrowed(""),
            CellValue::Text(s) => Cow::Borrowed(s),
            CellValue::Number(n) => Cow::Owned(n.to_string()),
        }
    }

    /// Interpret raw user input: numeric-looking text becomes a number.
    pub fn from_input(input: &str) -> Self {
        match parse_numeric(input) {
            Some(n) => CellValue::Number(n),
            None => CellValue::Text(input.to_string()),
        }
    }
}

fn parse_numeric(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

impl Default for CellValue {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_untagged_serialization() {
        let row = vec![CellValue::from("A"), CellValue::from(1i64), CellValue::Null];
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value, json!(["A", 1.0, null]));

        let back: Vec<CellValue> = serde_json::from_value(json!(["A", 1, null, ""])).unwrap();
        assert_eq!(
            back,
            vec![
                CellValue::from("A"),
                CellValue::Number(1.0),
                CellValue::Null,
                CellValue::empty()
            ]
        );
    }

    #[test]
    fn test_numeric_looking() {
        assert_eq!(CellValue::from(" 2.5 ").as_number(), Some(2.5));
        assert_eq!(CellValue::Number(-3.0).as_number(), Some(-3.0));
        assert_eq!(CellValue::empty().as_number(), None);
        assert_eq!(CellValue::from("   ").as_number(), None);
        assert_eq!(CellValue::from("abc").as_number(), None);
        assert_eq!(CellValue::from("inf").as_number(), None);
        assert_eq!(CellValue::Null.as_number(), None);
    }

    #[test]
    fn test_display_and_input() {
        assert_eq!(CellValue::Number(1.0).to_string(), "1");
        assert_eq!(CellValue::Number(0.25).to_string(), "0.25");
        assert_eq!(CellValue::Null.to_string(), "");
        assert_eq!(CellValue::from_input("42"), CellValue::Number(42.0));
        assert_eq!(CellValue::from_input("x1"), CellValue::from("x1"));
    }

    #[test]
    fn test_empty_sentinel() {
        assert!(CellValue::empty().is_empty());
        assert!(!CellValue::Null.is_empty());
        assert_eq!(CellValue::empty_row(3), vec![CellValue::empty(); 3]);
    }
}
