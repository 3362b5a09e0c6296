//! Variable repository: column metadata plus dependent value labels.

use tracing::{debug, warn};

use crate::model::{CellValue, ValueLabel, Variable, VariableDraft, COLUMN_INDEX, VARIABLE_ID};
use crate::repository::error::{Failure, RepositoryResult};
use crate::repository::{bound, transact};
use crate::storage::{RecordKey, TableName};
use crate::store::{Record, Table};
use crate::transaction::{Transaction, TransactionManager, TransactionMode, TxActive};

/// Persistence for variables and their value labels.
///
/// After every committed operation except the [`add_variable`] and
/// [`shift_column_indexes`] primitives, the `columnIndex` values of all
/// variables are exactly `0..count`.
///
/// [`add_variable`]: VariableRepository::add_variable
/// [`shift_column_indexes`]: VariableRepository::shift_column_indexes
#[derive(Debug, Clone)]
pub struct VariableRepository {
    manager: TransactionManager,
    tables: [TableName; 2],
}

impl VariableRepository {
    pub fn new(manager: TransactionManager) -> Self {
        Self {
            manager,
            tables: [Variable::table_name(), ValueLabel::table_name()],
        }
    }

    fn read<T, F>(&self, op: &'static str, context: String, f: F) -> RepositoryResult<T>
    where
        F: FnOnce(&mut Transaction<TxActive>) -> Result<T, Failure>,
    {
        transact(&self.manager, TransactionMode::ReadOnly, &self.tables, op, context, f)
    }

    fn write<T, F>(&self, op: &'static str, context: String, f: F) -> RepositoryResult<T>
    where
        F: FnOnce(&mut Transaction<TxActive>) -> Result<T, Failure>,
    {
        transact(&self.manager, TransactionMode::ReadWrite, &self.tables, op, context, f)
    }

    // ==================== Reads ====================

    /// Every variable, ordered by column index.
    pub fn get_all_variables(&self) -> RepositoryResult<Vec<Variable>> {
        self.read("get_all_variables", "all variables".to_string(), |tx| {
            by_column(&tx.table::<Variable>())
        })
    }

    pub fn get_variable(&self, id: u64) -> RepositoryResult<Option<Variable>> {
        self.read("get_variable", format!("variable {}", id), |tx| {
            Ok(tx.table::<Variable>().get(RecordKey::new(id))?)
        })
    }

    pub fn get_variable_by_column_index(&self, column_index: usize) -> RepositoryResult<Option<Variable>> {
        self.read("get_variable_by_column_index", format!("column {}", column_index), |tx| {
            let found = tx
                .table::<Variable>()
                .where_index(COLUMN_INDEX)
                .equals(bound(column_index as u64))?;
            Ok(found.into_iter().next())
        })
    }

    pub fn variable_count(&self) -> RepositoryResult<usize> {
        self.read("variable_count", "all variables".to_string(), |tx| {
            Ok(tx.table::<Variable>().count()?)
        })
    }

    /// Labels of one variable, ordered by key.
    pub fn get_value_labels(&self, variable_id: u64) -> RepositoryResult<Vec<ValueLabel>> {
        self.read("get_value_labels", format!("variable {}", variable_id), |tx| {
            labels_of(&tx.table::<ValueLabel>(), variable_id)
        })
    }

    // ==================== Writes ====================

    /// Store `draft` under the next free id, at the column index it names.
    ///
    /// Other variables are left alone; see [`insert_variable`](Self::insert_variable).
    pub fn add_variable(&self, draft: VariableDraft) -> RepositoryResult<Variable> {
        self.write("add_variable", format!("column {}", draft.column_index), |tx| {
            let mut variables = tx.table::<Variable>();
            let id = variables.next_key()?.get();
            let variable = Variable::from_draft(id, draft);
            variables.add(&variable)?;
            Ok(variable)
        })
    }

    /// Insert `draft` at its column index, moving every variable at or after
    /// it one column right.
    pub fn insert_variable(&self, draft: VariableDraft) -> RepositoryResult<Variable> {
        const OP: &str = "insert_variable";
        let position = draft.column_index;
        debug!(position, name = %draft.name, "inserting variable");

        self.write(OP, format!("column {}", position), |tx| {
            let mut variables = tx.table::<Variable>();
            let count = variables.count()?;
            if position > count {
                return Err(Failure::invalid(
                    OP,
                    format!("column {} is past the end ({} variables)", position, count),
                ));
            }

            shift(&mut variables, position, 1)?;
            let id = variables.next_key()?.get();
            let variable = Variable::from_draft(id, draft);
            variables.add(&variable)?;
            Ok(variable)
        })
    }

    /// Overwrite a variable's metadata. Its column index must not change.
    pub fn update_variable(&self, variable: &Variable) -> RepositoryResult<()> {
        const OP: &str = "update_variable";
        self.write(OP, format!("variable {}", variable.id), |tx| {
            let mut variables = tx.table::<Variable>();
            let current = variables
                .get(variable.key())?
                .ok_or(Failure::not_found(OP, variable.id))?;
            if current.column_index != variable.column_index {
                return Err(Failure::invalid(OP, "column index changes go through reorder_variable"));
            }
            variables.put(variable)?;
            Ok(())
        })
    }

    /// Delete a variable together with every value label referencing it.
    ///
    /// Column indexes of the remaining variables are not touched; see
    /// [`remove_variable`](Self::remove_variable).
    pub fn delete_variable(&self, id: u64) -> RepositoryResult<()> {
        debug!(id, "deleting variable");
        self.write("delete_variable", format!("variable {}", id), |tx| {
            if cascade_delete(tx, id)?.is_none() {
                warn!(id, "delete_variable: no such variable");
            }
            Ok(())
        })
    }

    /// Delete a variable and its labels, then close the gap it leaves.
    pub fn remove_variable(&self, id: u64) -> RepositoryResult<()> {
        const OP: &str = "remove_variable";
        debug!(id, "removing variable");
        self.write(OP, format!("variable {}", id), |tx| {
            let removed = cascade_delete(tx, id)?.ok_or(Failure::not_found(OP, id))?;
            shift(&mut tx.table::<Variable>(), removed.column_index + 1, -1)?;
            Ok(())
        })
    }

    /// Move a variable to `new_index`, shifting the ones in between by one.
    pub fn reorder_variable(&self, id: u64, new_index: usize) -> RepositoryResult<()> {
        const OP: &str = "reorder_variable";
        self.write(OP, format!("variable {} to column {}", id, new_index), |tx| {
            let mut variables = tx.table::<Variable>();
            let moved = variables
                .get(RecordKey::new(id))?
                .ok_or(Failure::not_found(OP, id))?;

            let count = variables.count()?;
            if new_index >= count {
                return Err(Failure::invalid(
                    OP,
                    format!("column {} is past the end ({} variables)", new_index, count),
                ));
            }

            let old_index = moved.column_index;
            if old_index == new_index {
                warn!(id, new_index, "reorder_variable: already at target column");
                return Ok(());
            }
            debug!(id, old_index, new_index, "reordering variable");

            let (low, high) = (old_index.min(new_index), old_index.max(new_index));
            let affected = variables
                .where_index(COLUMN_INDEX)
                .between(bound(low as u64), bound(high as u64))?;

            let updated: Vec<Variable> = affected
                .into_iter()
                .map(|mut variable| {
                    if variable.id == id {
                        variable.column_index = new_index;
                    } else if old_index < new_index {
                        variable.column_index -= 1;
                    } else {
                        variable.column_index += 1;
                    }
                    variable
                })
                .collect();
            variables.bulk_put(&updated)?;
            Ok(())
        })
    }

    /// Add `amount` to the column index of every variable at or after
    /// `start`.
    ///
    /// A primitive: the caller pairs it with an insert or delete at the
    /// boundary to keep indexes contiguous.
    pub fn shift_column_indexes(&self, start: usize, amount: i64) -> RepositoryResult<()> {
        debug!(start, amount, "shifting column indexes");
        self.write("shift_column_indexes", format!("from column {} by {}", start, amount), |tx| {
            shift(&mut tx.table::<Variable>(), start, amount)
        })
    }

    /// Replace every variable and label. Draft `i` becomes variable `i` at
    /// column `i`.
    pub fn replace_all_variables(&self, drafts: Vec<VariableDraft>) -> RepositoryResult<Vec<Variable>> {
        debug!(count = drafts.len(), "replacing all variables");
        self.write("replace_all_variables", format!("{} variables", drafts.len()), |tx| {
            tx.table::<ValueLabel>().clear()?;
            let mut variables = tx.table::<Variable>();
            variables.clear()?;

            let stored: Vec<Variable> = drafts
                .into_iter()
                .enumerate()
                .map(|(i, mut draft)| {
                    draft.column_index = i;
                    Variable::from_draft(i as u64, draft)
                })
                .collect();
            variables.bulk_add(&stored)?;
            Ok(stored)
        })
    }

    /// Replace the whole label set of a variable.
    pub fn set_value_labels(&self, variable_id: u64, labels: Vec<(CellValue, String)>) -> RepositoryResult<Vec<ValueLabel>> {
        const OP: &str = "set_value_labels";
        self.write(OP, format!("variable {}", variable_id), |tx| {
            if tx.table::<Variable>().get(RecordKey::new(variable_id))?.is_none() {
                return Err(Failure::not_found(OP, variable_id));
            }

            let mut value_labels = tx.table::<ValueLabel>();
            let old: Vec<RecordKey> = labels_of(&value_labels, variable_id)?
                .iter()
                .map(|l| l.key())
                .collect();
            value_labels.bulk_delete(&old)?;

            let first = value_labels.next_key()?.get();
            let stored: Vec<ValueLabel> = labels
                .into_iter()
                .enumerate()
                .map(|(i, (value, label))| ValueLabel::new(first + i as u64, variable_id, value, label))
                .collect();
            value_labels.bulk_add(&stored)?;
            Ok(stored)
        })
    }
}

fn by_column(variables: &Table<'_, Variable>) -> Result<Vec<Variable>, Failure> {
    Ok(variables.where_index(COLUMN_INDEX).above_or_equal(0)?)
}

fn labels_of(labels: &Table<'_, ValueLabel>, variable_id: u64) -> Result<Vec<ValueLabel>, Failure> {
    let mut found = labels.where_index(VARIABLE_ID).equals(bound(variable_id))?;
    found.sort_by_key(|l| l.id);
    Ok(found)
}

/// Delete a variable's labels, then the variable. Returns the deleted
/// variable, if it existed.
fn cascade_delete(tx: &mut Transaction<TxActive>, id: u64) -> Result<Option<Variable>, Failure> {
    let mut value_labels = tx.table::<ValueLabel>();
    let keys: Vec<RecordKey> = labels_of(&value_labels, id)?.iter().map(|l| l.key()).collect();
    let dropped = value_labels.bulk_delete(&keys)?;

    let mut variables = tx.table::<Variable>();
    let variable = variables.get(RecordKey::new(id))?;
    if variable.is_some() {
        variables.delete(RecordKey::new(id))?;
    }
    debug!(id, labels = dropped, "cascade delete");
    Ok(variable)
}

/// Add `amount` to the column index of every variable at or after `start`.
///
/// Upward shifts are written from the highest index down, downward shifts
/// from the lowest up, so no two variables share an index in between.
fn shift(variables: &mut Table<'_, Variable>, start: usize, amount: i64) -> Result<(), Failure> {
    const OP: &str = "shift_column_indexes";
    if amount == 0 {
        return Ok(());
    }

    let mut affected = variables
        .where_index(COLUMN_INDEX)
        .above_or_equal(bound(start as u64))?;
    if amount > 0 {
        affected.reverse();
    }

    for mut variable in affected {
        let shifted = i64::try_from(variable.column_index)
            .ok()
            .and_then(|index| index.checked_add(amount))
            .and_then(|index| usize::try_from(index).ok())
            .ok_or_else(|| {
                Failure::invalid(
                    OP,
                    format!("column {} cannot shift by {}", variable.column_index, amount),
                )
            })?;
        variable.column_index = shifted;
        variables.put(&variable)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VariableType;
    use crate::storage::GitRepository;
    use tempfile::TempDir;

    fn setup() -> (TempDir, VariableRepository) {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        (dir, VariableRepository::new(TransactionManager::new(repo)))
    }

    fn seeded(names: &[&str]) -> (TempDir, VariableRepository) {
        let (dir, variables) = setup();
        let drafts = names
            .iter()
            .map(|name| VariableDraft::new(*name, 0))
            .collect();
        variables.replace_all_variables(drafts).unwrap();
        (dir, variables)
    }

    fn names(variables: &VariableRepository) -> Vec<String> {
        variables
            .get_all_variables()
            .unwrap()
            .into_iter()
            .map(|v| v.name)
            .collect()
    }

    fn assert_contiguous(variables: &VariableRepository) {
        let indexes: Vec<usize> = variables
            .get_all_variables()
            .unwrap()
            .iter()
            .map(|v| v.column_index)
            .collect();
        let count = variables.variable_count().unwrap();
        assert_eq!(indexes, (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn test_reorder_backward_scenario() {
        let (_dir, variables) = seeded(&["a", "b", "c", "d"]);
        let third = variables.get_variable_by_column_index(2).unwrap().unwrap();

        variables.reorder_variable(third.id, 0).unwrap();

        let by_id: Vec<usize> = (0..4)
            .map(|id| variables.get_variable(id).unwrap().unwrap().column_index)
            .collect();
        assert_eq!(by_id, vec![1, 2, 0, 3]);
        assert_eq!(names(&variables), vec!["c", "a", "b", "d"]);
        assert_contiguous(&variables);
    }

    #[test]
    fn test_reorder_forward() {
        let (_dir, variables) = seeded(&["a", "b", "c", "d"]);

        variables.reorder_variable(0, 3).unwrap();
        assert_eq!(names(&variables), vec!["b", "c", "d", "a"]);
        assert_contiguous(&variables);
    }

    #[test]
    fn test_reorder_same_index_is_noop() {
        let (_dir, variables) = seeded(&["a", "b"]);
        let head = variables.manager.head().unwrap();

        variables.reorder_variable(1, 1).unwrap();
        assert_eq!(variables.manager.head().unwrap(), head);
    }

    #[test]
    fn test_reorder_rejects_bad_input() {
        let (_dir, variables) = seeded(&["a", "b"]);

        assert!(variables.reorder_variable(0, 2).unwrap_err().is_invalid_argument());
        assert!(variables.reorder_variable(9, 0).unwrap_err().is_not_found());
        assert_eq!(names(&variables), vec!["a", "b"]);
    }

    #[test]
    fn test_cascade_delete() {
        let (_dir, variables) = seeded(&["sex", "age"]);
        variables
            .set_value_labels(0, vec![(1i64.into(), "Male".into()), (2i64.into(), "Female".into())])
            .unwrap();
        variables
            .set_value_labels(1, vec![(99i64.into(), "Refused".into())])
            .unwrap();

        variables.delete_variable(0).unwrap();

        assert!(variables.get_variable(0).unwrap().is_none());
        assert!(variables.get_value_labels(0).unwrap().is_empty());
        assert_eq!(variables.get_value_labels(1).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_variable_closes_gap() {
        let (_dir, variables) = seeded(&["a", "b", "c", "d"]);
        variables.set_value_labels(1, vec![("x".into(), "X".into())]).unwrap();

        variables.remove_variable(1).unwrap();
        assert_eq!(names(&variables), vec!["a", "c", "d"]);
        assert!(variables.get_value_labels(1).unwrap().is_empty());
        assert_contiguous(&variables);

        assert!(variables.remove_variable(1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_insert_variable_shifts_later_columns() {
        let (_dir, variables) = seeded(&["a", "b", "c"]);

        let inserted = variables.insert_variable(VariableDraft::new("new", 1)).unwrap();
        assert_eq!(inserted.id, 3);
        assert_eq!(inserted.column_index, 1);
        assert_eq!(names(&variables), vec!["a", "new", "b", "c"]);
        assert_contiguous(&variables);

        variables.insert_variable(VariableDraft::new("last", 4)).unwrap();
        assert_eq!(names(&variables).last().map(String::as_str), Some("last"));

        let past_end = variables.insert_variable(VariableDraft::new("gap", 9));
        assert!(past_end.unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_shift_column_indexes() {
        let (_dir, variables) = seeded(&["a", "b", "c"]);

        variables.shift_column_indexes(1, 2).unwrap();
        let indexes: Vec<usize> = variables
            .get_all_variables()
            .unwrap()
            .iter()
            .map(|v| v.column_index)
            .collect();
        assert_eq!(indexes, vec![0, 3, 4]);

        variables.shift_column_indexes(3, -2).unwrap();
        assert_contiguous(&variables);

        let below_zero = variables.shift_column_indexes(0, -1);
        assert!(below_zero.unwrap_err().is_invalid_argument());
        assert_contiguous(&variables);
    }

    #[test]
    fn test_add_variable_assigns_next_id() {
        let (_dir, variables) = setup();
        let first = variables.add_variable(VariableDraft::new("a", 0)).unwrap();
        let second = variables
            .add_variable(VariableDraft::string("b", 1, 16))
            .unwrap();

        assert_eq!((first.id, second.id), (0, 1));
        let stored = variables.get_variable(1).unwrap().unwrap();
        assert_eq!(stored.var_type, VariableType::String);
        assert_eq!(stored.width, 16);
    }

    #[test]
    fn test_update_variable() {
        let (_dir, variables) = seeded(&["a", "b"]);
        let mut b = variables.get_variable(1).unwrap().unwrap();

        b.label = "Second".to_string();
        variables.update_variable(&b).unwrap();
        assert_eq!(variables.get_variable(1).unwrap().unwrap().label, "Second");

        b.column_index = 0;
        assert!(variables.update_variable(&b).unwrap_err().is_invalid_argument());

        b.id = 42;
        assert!(variables.update_variable(&b).unwrap_err().is_not_found());
    }

    #[test]
    fn test_set_value_labels_replaces_set() {
        let (_dir, variables) = seeded(&["q1"]);
        variables
            .set_value_labels(0, vec![(1i64.into(), "Yes".into()), (0i64.into(), "No".into())])
            .unwrap();
        variables
            .set_value_labels(0, vec![(9i64.into(), "Unknown".into())])
            .unwrap();

        let labels = variables.get_value_labels(0).unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].label, "Unknown");
        assert_eq!(labels[0].value, CellValue::Number(9.0));

        assert!(variables.set_value_labels(5, Vec::new()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_replace_all_variables_drops_labels() {
        let (_dir, variables) = seeded(&["a", "b"]);
        variables.set_value_labels(0, vec![(1i64.into(), "one".into())]).unwrap();

        let stored = variables
            .replace_all_variables(vec![VariableDraft::new("x", 7), VariableDraft::new("y", 7)])
            .unwrap();
        assert_eq!(stored.iter().map(|v| v.column_index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(names(&variables), vec!["x", "y"]);
        assert!(variables.get_value_labels(0).unwrap().is_empty());
    }

    #[test]
    fn test_permutation_after_mixed_edits() {
        let (_dir, variables) = seeded(&["a", "b", "c", "d", "e"]);

        variables.reorder_variable(4, 1).unwrap();
        variables.remove_variable(2).unwrap();
        variables.insert_variable(VariableDraft::new("f", 0)).unwrap();
        variables.reorder_variable(0, 4).unwrap();

        assert_contiguous(&variables);
        assert_eq!(names(&variables), vec!["f", "e", "b", "d", "a"]);
    }
}
