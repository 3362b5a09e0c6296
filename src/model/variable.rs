//! Variable (column) metadata and value labels.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::cell::CellValue;
use crate::storage::RecordKey;
use crate::store::Record;

/// Secondary index holding a variable's column position.
pub const COLUMN_INDEX: &str = "columnIndex";

/// Secondary index holding a value label's owning variable.
pub const VARIABLE_ID: &str = "variableId";

/// Storage format of a variable's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableType {
    #[default]
    Numeric,
    Comma,
    Dot,
    Scientific,
    Date,
    Dollar,
    CustomCurrency,
    String,
    RestrictedNumeric,
}

impl VariableType {
    pub fn is_numeric(&self) -> bool {
        !matches!(self, VariableType::String)
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VariableType::Numeric => "Numeric",
            VariableType::Comma => "Comma",
            VariableType::Dot => "Dot",
            VariableType::Scientific => "Scientific notation",
            VariableType::Date => "Date",
            VariableType::Dollar => "Dollar",
            VariableType::CustomCurrency => "Custom currency",
            VariableType::String => "String",
            VariableType::RestrictedNumeric => "Restricted numeric",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Left,
    #[default]
    Right,
    Center,
}

/// Level of measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Measure {
    Nominal,
    Ordinal,
    Scale,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Input,
    Target,
    Both,
    None,
    Partition,
    Split,
}

/// User-declared missing values of a variable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MissingValues {
    #[default]
    None,
    /// Up to three discrete values.
    Discrete { values: Vec<CellValue> },
    /// An inclusive range plus at most one extra discrete value.
    Range {
        low: f64,
        high: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        discrete: Option<CellValue>,
    },
}

impl MissingValues {
    pub const MAX_DISCRETE: usize = 3;

    /// Discrete missing values; `None` if more than three are given.
    pub fn discrete(values: Vec<CellValue>) -> Option<Self> {
        (values.len() <= Self::MAX_DISCRETE).then_some(MissingValues::Discrete { values })
    }

    /// Whether `value` counts as missing.
    pub fn contains(&self, value: &CellValue) -> bool {
        match self {
            MissingValues::None => false,
            MissingValues::Discrete { values } => values.contains(value),
            MissingValues::Range { low, high, discrete } => {
                let in_range = value.as_number().is_some_and(|n| n >= *low && n <= *high);
                in_range || discrete.as_ref() == Some(value)
            }
        }
    }
}

/// A variable as produced by importers, before it has a surrogate id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDraft {
    pub column_index: usize,
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    pub width: u32,
    pub decimals: u32,
    pub label: String,
    pub missing: MissingValues,
    pub columns: u32,
    pub align: Alignment,
    pub measure: Measure,
    pub role: Role,
}

impl VariableDraft {
    /// A numeric variable with default formatting.
    pub fn new(name: impl Into<String>, column_index: usize) -> Self {
        Self {
            column_index,
            name: name.into(),
            var_type: VariableType::Numeric,
            width: 8,
            decimals: 2,
            label: String::new(),
            missing: MissingValues::None,
            columns: 8,
            align: Alignment::Right,
            measure: Measure::Unknown,
            role: Role::Input,
        }
    }

    /// A string variable of the given width.
    pub fn string(name: impl Into<String>, column_index: usize, width: u32) -> Self {
        Self {
            var_type: VariableType::String,
            width,
            decimals: 0,
            align: Alignment::Left,
            measure: Measure::Nominal,
            ..Self::new(name, column_index)
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_measure(mut self, measure: Measure) -> Self {
        self.measure = measure;
        self
    }

    pub fn with_missing(mut self, missing: MissingValues) -> Self {
        self.missing = missing;
        self
    }
}

/// A stored variable. `id` is stable; `column_index` is its current position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub id: u64,
    pub column_index: usize,
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    pub width: u32,
    pub decimals: u32,
    pub label: String,
    pub missing: MissingValues,
    pub columns: u32,
    pub align: Alignment,
    pub measure: Measure,
    pub role: Role,
}

impl Variable {
    pub fn from_draft(id: u64, draft: VariableDraft) -> Self {
        Self {
            id,
            column_index: draft.column_index,
            name: draft.name,
            var_type: draft.var_type,
            width: draft.width,
            decimals: draft.decimals,
            label: draft.label,
            missing: draft.missing,
            columns: draft.columns,
            align: draft.align,
            measure: draft.measure,
            role: draft.role,
        }
    }
}

impl Record for Variable {
    const TABLE: &'static str = "variables";

    fn key(&self) -> RecordKey {
        RecordKey::new(self.id)
    }

    fn index_value(&self, index: &str) -> Option<i64> {
        match index {
            COLUMN_INDEX => i64::try_from(self.column_index).ok(),
            _ => None,
        }
    }
}

/// A label for one value of a variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueLabel {
    pub id: u64,
    pub variable_id: u64,
    pub value: CellValue,
    pub label: String,
}

impl ValueLabel {
    pub fn new(id: u64, variable_id: u64, value: impl Into<CellValue>, label: impl Into<String>) -> Self {
        Self {
            id,
            variable_id,
            value: value.into(),
            label: label.into(),
        }
    }
}

impl Record for ValueLabel {
    const TABLE: &'static str = "value_labels";

    fn key(&self) -> RecordKey {
        RecordKey::new(self.id)
    }

    fn index_value(&self, index: &str) -> Option<i64> {
        match index {
            VARIABLE_ID => i64::try_from(self.variable_id).ok(),
            _ => None,
        }
    }
}
