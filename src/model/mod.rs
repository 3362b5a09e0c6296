//! Dataset records: rows of cells, variables and their value labels.

mod cell;
mod row;
mod variable;

pub use cell::CellValue;
pub use row::RowRecord;
pub use variable::{
    Alignment, Measure, MissingValues, Role, ValueLabel, Variable, VariableDraft, VariableType, COLUMN_INDEX,
    VARIABLE_ID,
};
