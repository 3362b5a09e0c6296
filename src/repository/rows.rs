//! Row repository: the dataset's cell values, one record per row position.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::model::{CellValue, RowRecord};
use crate::repository::dense::{dense_rows, densify};
use crate::repository::error::{Failure, RepositoryResult};
use crate::repository::{bound, transact};
use crate::storage::{RecordKey, TableName};
use crate::store::{Record, Table};
use crate::transaction::{TransactionManager, TransactionMode};

/// The cells of one row.
pub type Row = Vec<CellValue>;

/// A single cell write for [`RowRepository::update_bulk_cells`].
#[derive(Debug, Clone, PartialEq)]
pub struct CellUpdate {
    pub row: u64,
    pub col: usize,
    pub value: CellValue,
}

impl CellUpdate {
    pub fn new(row: u64, col: usize, value: impl Into<CellValue>) -> Self {
        Self {
            row,
            col,
            value: value.into(),
        }
    }
}

/// A cell position, cleared by [`RowRepository::update_bulk_cells`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    pub row: u64,
    pub col: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

impl std::str::FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Ascending),
            "desc" | "descending" => Ok(SortDirection::Descending),
            _ => Err(format!("unknown sort direction: {}", s)),
        }
    }
}

/// Options for [`RowRepository::find_and_replace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FindOptions {
    pub match_case: bool,
    /// Match whole cells instead of substrings.
    pub match_entire_cell: bool,
}

/// Persistence for the data matrix.
///
/// A row's key is its position. Structural edits renumber rows by deleting
/// every affected record and re-adding it under its new key, all inside one
/// transaction.
#[derive(Debug, Clone)]
pub struct RowRepository {
    manager: TransactionManager,
    tables: [TableName; 1],
}

impl RowRepository {
    pub fn new(manager: TransactionManager) -> Self {
        Self {
            manager,
            tables: [RowRecord::table_name()],
        }
    }

    fn read<T, F>(&self, op: &'static str, context: String, f: F) -> RepositoryResult<T>
    where
        F: FnOnce(&mut Table<'_, RowRecord>) -> Result<T, Failure>,
    {
        transact(&self.manager, TransactionMode::ReadOnly, &self.tables, op, context, |tx| {
            f(&mut tx.table::<RowRecord>())
        })
    }

    fn write<T, F>(&self, op: &'static str, context: String, f: F) -> RepositoryResult<T>
    where
        F: FnOnce(&mut Table<'_, RowRecord>) -> Result<T, Failure>,
    {
        transact(&self.manager, TransactionMode::ReadWrite, &self.tables, op, context, |tx| {
            f(&mut tx.table::<RowRecord>())
        })
    }

    // ==================== Reads ====================

    /// The whole matrix, rows `0..=max id`, gaps filled with empty rows.
    pub fn get_all_rows(&self) -> RepositoryResult<Vec<Row>> {
        self.read("get_all_rows", "all rows".to_string(), |rows| {
            dense_rows(rows.to_vec()?).ok_or_else(|| too_long("get_all_rows"))
        })
    }

    /// The row stored at `index`, if any.
    pub fn get_row(&self, index: u64) -> RepositoryResult<Option<Row>> {
        self.read("get_row", format!("row {}", index), |rows| {
            Ok(rows.get(RecordKey::new(index))?.map(|r| r.data))
        })
    }

    /// Length of the dense matrix.
    pub fn row_count(&self) -> RepositoryResult<u64> {
        self.read("row_count", "all rows".to_string(), |rows| Ok(rows.next_key()?.get()))
    }

    /// One column of the matrix, `Null` where a row is missing or too short.
    pub fn get_column_data(&self, col: usize) -> RepositoryResult<Vec<CellValue>> {
        self.read("get_column_data", format!("column {}", col), |rows| {
            let sparse: BTreeMap<u64, CellValue> = rows
                .to_vec()?
                .into_iter()
                .map(|r| (r.id, r.data.get(col).cloned().unwrap_or(CellValue::Null)))
                .collect();
            densify(sparse, || CellValue::Null).ok_or_else(|| too_long("get_column_data"))
        })
    }

    // ==================== Upserts ====================

    /// Insert or replace the row at `index`.
    pub fn update_row(&self, index: u64, data: Row) -> RepositoryResult<()> {
        self.write("update_row", format!("row {}", index), |rows| {
            rows.put(&RowRecord::new(index, data))?;
            Ok(())
        })
    }

    /// Insert or replace several rows at once; all or nothing.
    pub fn update_rows(&self, records: Vec<RowRecord>) -> RepositoryResult<()> {
        let context = format!("{} rows", records.len());
        self.write("update_rows", context, |rows| {
            rows.bulk_put(&records)?;
            Ok(())
        })
    }

    /// Replace the whole matrix; row `i` of `data` is stored under key `i`.
    pub fn replace_all_data(&self, data: Vec<Row>) -> RepositoryResult<()> {
        let context = format!("{} rows", data.len());
        debug!(rows = data.len(), "replacing all data");
        self.write("replace_all_data", context, |rows| {
            replace_all(rows, data)?;
            Ok(())
        })
    }

    /// Insert a row at `index` if none is stored there.
    pub fn ensure_row_exists(&self, index: u64, columns: usize) -> RepositoryResult<()> {
        self.write("ensure_row_exists", format!("row {}", index), |rows| {
            if rows.get(RecordKey::new(index))?.is_none() {
                rows.add(&RowRecord::new(index, CellValue::empty_row(columns)))?;
            }
            Ok(())
        })
    }

    // ==================== Columns ====================

    /// Splice `default` into every row at `col`, shifting later cells right.
    ///
    /// Rows shorter than `col` are padded with empty cells first.
    pub fn insert_column(&self, col: usize, default: CellValue) -> RepositoryResult<()> {
        debug!(col, "inserting column");
        self.write("insert_column", format!("column {}", col), |rows| {
            let visited = rows.modify(|row| {
                if row.data.len() < col {
                    row.data.resize(col, CellValue::empty());
                }
                row.data.insert(col, default.clone());
            })?;
            if visited == 0 {
                warn!(col, "insert_column on an empty table");
            }
            Ok(())
        })
    }

    /// Remove the cell at `col` from every row that has one.
    pub fn delete_column(&self, col: usize) -> RepositoryResult<()> {
        debug!(col, "deleting column");
        self.write("delete_column", format!("column {}", col), |rows| {
            let visited = rows.modify(|row| {
                if col < row.data.len() {
                    row.data.remove(col);
                }
            })?;
            if visited == 0 {
                warn!(col, "delete_column on an empty table");
            }
            Ok(())
        })
    }

    // ==================== Structural edits ====================

    /// Delete the row at `index`; every later row moves up by one.
    pub fn delete_row(&self, index: u64) -> RepositoryResult<()> {
        debug!(index, "deleting row");
        self.write("delete_row", format!("row {}", index), |rows| {
            if !rows.delete(RecordKey::new(index))? {
                warn!(index, "delete_row: no row stored at index");
            }
            let after = rows.where_key().above(bound(index))?;
            renumber(rows, after, |id| id - 1)?;
            Ok(())
        })
    }

    /// Insert `data` at `index`; the row there and every later row move down
    /// by one.
    pub fn insert_row(&self, index: u64, data: Row) -> RepositoryResult<()> {
        debug!(index, "inserting row");
        self.write("insert_row", format!("row {}", index), |rows| {
            let from = rows.where_key().above_or_equal(bound(index))?;
            renumber(rows, from, |id| id + 1)?;
            rows.add(&RowRecord::new(index, data))?;
            Ok(())
        })
    }

    /// Delete every row in `indices` at once.
    ///
    /// Same result as deleting them one at a time from the highest down.
    /// Duplicates or indices past the end are rejected.
    pub fn delete_bulk_rows(&self, indices: &[u64]) -> RepositoryResult<()> {
        const OP: &str = "delete_bulk_rows";
        debug!(count = indices.len(), "deleting rows");
        self.write(OP, format!("{} rows", indices.len()), |rows| {
            let len = rows.next_key()?.get();
            let mut deleted = BTreeSet::new();
            for &index in indices {
                if index >= len {
                    return Err(Failure::invalid(OP, format!("row {} is past the end ({} rows)", index, len)));
                }
                if !deleted.insert(index) {
                    return Err(Failure::invalid(OP, format!("row {} listed twice", index)));
                }
            }
            let Some(&lowest) = deleted.first() else {
                return Ok(());
            };

            let keys: Vec<RecordKey> = deleted.iter().copied().map(RecordKey::new).collect();
            rows.bulk_delete(&keys)?;

            let deleted: Vec<u64> = deleted.into_iter().collect();
            let remaining = rows.where_key().above(bound(lowest))?;
            renumber(rows, remaining, |id| id - deleted.partition_point(|&d| d < id) as u64)?;
            Ok(())
        })
    }

    /// Insert several rows at once, each given as `(target, data)`.
    ///
    /// Targets refer to positions in the current matrix: new row `k` (in
    /// ascending target order) lands at `target + k`. Same result as calling
    /// [`insert_row`](Self::insert_row) with those positions in ascending
    /// order. Duplicate targets or targets past the end are rejected.
    pub fn add_bulk_rows(&self, mut insertions: Vec<(u64, Row)>) -> RepositoryResult<()> {
        const OP: &str = "add_bulk_rows";
        debug!(count = insertions.len(), "adding rows");
        self.write(OP, format!("{} rows", insertions.len()), |rows| {
            let len = rows.next_key()?.get();
            insertions.sort_by_key(|(target, _)| *target);

            let targets: Vec<u64> = insertions.iter().map(|(target, _)| *target).collect();
            if let Some(&target) = targets.iter().find(|&&t| t > len) {
                return Err(Failure::invalid(OP, format!("target {} is past the end ({} rows)", target, len)));
            }
            if let Some(pair) = targets.windows(2).find(|pair| pair[0] == pair[1]) {
                return Err(Failure::invalid(OP, format!("target {} listed twice", pair[0])));
            }
            let Some(&lowest) = targets.first() else {
                return Ok(());
            };

            let existing = rows.where_key().above_or_equal(bound(lowest))?;
            renumber(rows, existing, |id| id + targets.partition_point(|&t| t <= id) as u64)?;

            let added: Vec<RowRecord> = insertions
                .into_iter()
                .enumerate()
                .map(|(k, (target, data))| RowRecord::new(target + k as u64, data))
                .collect();
            rows.bulk_add(&added)?;
            Ok(())
        })
    }

    /// Exchange the data of two rows. Keys stay put.
    pub fn swap_rows(&self, a: u64, b: u64) -> RepositoryResult<()> {
        const OP: &str = "swap_rows";
        self.write(OP, format!("rows {} and {}", a, b), |rows| {
            let first = rows.get(RecordKey::new(a))?.ok_or(Failure::not_found(OP, a))?;
            let second = rows.get(RecordKey::new(b))?.ok_or(Failure::not_found(OP, b))?;
            rows.put(&RowRecord::new(a, second.data))?;
            rows.put(&RowRecord::new(b, first.data))?;
            Ok(())
        })
    }

    // ==================== Cells ====================

    /// Apply cell writes and clears, grouped per row.
    ///
    /// Each touched row is padded with empty cells up to the highest column
    /// touched in it. Clears are applied after writes.
    pub fn update_bulk_cells(&self, updates: &[CellUpdate], deletions: &[CellRef]) -> RepositoryResult<()> {
        const OP: &str = "update_bulk_cells";
        let context = format!("{} updates, {} deletions", updates.len(), deletions.len());
        self.write(OP, context, |rows| {
            let mut touched: BTreeMap<u64, (Vec<&CellUpdate>, Vec<usize>)> = BTreeMap::new();
            for update in updates {
                touched.entry(update.row).or_default().0.push(update);
            }
            for deletion in deletions {
                touched.entry(deletion.row).or_default().1.push(deletion.col);
            }

            for (index, (writes, clears)) in touched {
                let mut data = rows.get(RecordKey::new(index))?.map(|r| r.data).unwrap_or_default();

                let highest = writes.iter().map(|u| u.col).chain(clears.iter().copied()).max();
                if let Some(highest) = highest {
                    if data.len() <= highest {
                        let width = highest
                            .checked_add(1)
                            .ok_or_else(|| Failure::invalid(OP, format!("column {} out of range", highest)))?;
                        data.resize(width, CellValue::empty());
                    }
                }

                for update in writes {
                    data[update.col] = update.value.clone();
                }
                for col in clears {
                    data[col] = CellValue::empty();
                }
                rows.put(&RowRecord::new(index, data))?;
            }
            Ok(())
        })
    }

    /// Stable sort of the whole matrix by column `col`.
    ///
    /// Numeric-looking cells sort before text in either direction; text
    /// compares case-insensitively. The result is written back as a whole.
    pub fn sort_data(&self, col: usize, direction: SortDirection) -> RepositoryResult<()> {
        debug!(col, ?direction, "sorting data");
        self.write("sort_data", format!("column {}", col), |rows| {
            let mut data = dense_rows(rows.to_vec()?).ok_or_else(|| too_long("sort_data"))?;
            data.sort_by(|a, b| compare_cells(a.get(col), b.get(col), direction));
            replace_all(rows, data)?;
            Ok(())
        })
    }

    /// Replace `find` with `replace` in every cell; returns how many cells
    /// changed. Only rows with a replaced cell are written.
    pub fn find_and_replace(&self, find: &str, replace: &str, options: FindOptions) -> RepositoryResult<usize> {
        if find.is_empty() {
            warn!("find_and_replace with an empty search string");
            return Ok(0);
        }
        debug!(find, replace, ?options, "find and replace");

        self.write("find_and_replace", format!("{:?} -> {:?}", find, replace), |rows| {
            let matcher = Matcher::new(find, options);
            let mut replaced = 0;
            let mut dirty = Vec::new();

            for mut row in rows.to_vec()? {
                let mut changed = false;
                for cell in row.data.iter_mut() {
                    if let Some(next) = matcher.replace_in(cell, replace) {
                        *cell = next;
                        replaced += 1;
                        changed = true;
                    }
                }
                if changed {
                    dirty.push(row);
                }
            }

            rows.bulk_put(&dirty)?;
            debug!(replaced, rows = dirty.len(), "find and replace done");
            Ok(replaced)
        })
    }
}

/// Move every record in `records` to the key given by `target`.
///
/// All old keys are removed before any new one is added, so records may
/// trade keys with each other.
fn renumber<F>(rows: &mut Table<'_, RowRecord>, records: Vec<RowRecord>, target: F) -> Result<(), Failure>
where
    F: Fn(u64) -> u64,
{
    if records.is_empty() {
        return Ok(());
    }
    let keys: Vec<RecordKey> = records.iter().map(|r| r.key()).collect();
    rows.bulk_delete(&keys)?;

    let moved: Vec<RowRecord> = records
        .into_iter()
        .map(|record| RowRecord::new(target(record.id), record.data))
        .collect();
    rows.bulk_add(&moved)?;
    Ok(())
}

fn too_long(op: &'static str) -> Failure {
    Failure::invalid(op, "highest row index leaves no room for a dense view")
}

fn replace_all(rows: &mut Table<'_, RowRecord>, data: Vec<Row>) -> Result<(), Failure> {
    rows.clear()?;
    let records: Vec<RowRecord> = data
        .into_iter()
        .enumerate()
        .map(|(i, data)| RowRecord::new(i as u64, data))
        .collect();
    rows.bulk_add(&records)?;
    Ok(())
}

enum SortKey {
    Number(f64),
    Text(String),
}

fn sort_key(cell: Option<&CellValue>) -> SortKey {
    match cell {
        Some(value) => match value.as_number() {
            Some(n) => SortKey::Number(n),
            None => SortKey::Text(value.as_text().to_lowercase()),
        },
        None => SortKey::Text(String::new()),
    }
}

fn compare_cells(a: Option<&CellValue>, b: Option<&CellValue>, direction: SortDirection) -> Ordering {
    match (sort_key(a), sort_key(b)) {
        (SortKey::Number(x), SortKey::Number(y)) => direction.apply(x.total_cmp(&y)),
        (SortKey::Number(_), SortKey::Text(_)) => Ordering::Less,
        (SortKey::Text(_), SortKey::Number(_)) => Ordering::Greater,
        (SortKey::Text(x), SortKey::Text(y)) => direction.apply(x.cmp(&y)),
    }
}

struct Matcher<'a> {
    find: &'a str,
    needle: Vec<char>,
    options: FindOptions,
}

impl<'a> Matcher<'a> {
    fn new(find: &'a str, options: FindOptions) -> Self {
        Self {
            find,
            needle: find.chars().collect(),
            options,
        }
    }

    /// The replacement for `cell`, or `None` if it does not match.
    fn replace_in(&self, cell: &CellValue, replace: &str) -> Option<CellValue> {
        let text = cell.as_text();
        if self.options.match_entire_cell {
            return self.equals(&text).then(|| CellValue::from_input(replace));
        }
        let next = if self.options.match_case {
            text.contains(self.find).then(|| text.replace(self.find, replace))?
        } else {
            self.replace_ignore_case(&text, replace)?
        };

        let value = match (cell, CellValue::from_input(&next)) {
            (CellValue::Number(_), number @ CellValue::Number(_)) => number,
            _ => CellValue::Text(next),
        };
        Some(value)
    }

    fn equals(&self, text: &str) -> bool {
        if self.options.match_case {
            text == self.find
        } else {
            text.chars().count() == self.needle.len() && prefix_len_ignore_case(text, &self.needle).is_some()
        }
    }

    fn replace_ignore_case(&self, text: &str, replace: &str) -> Option<String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        let mut matched = false;

        while let Some(c) = rest.chars().next() {
            if let Some(len) = prefix_len_ignore_case(rest, &self.needle) {
                out.push_str(replace);
                rest = &rest[len..];
                matched = true;
            } else {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
        matched.then_some(out)
    }
}

/// Byte length of the prefix of `text` that matches `needle` ignoring case.
fn prefix_len_ignore_case(text: &str, needle: &[char]) -> Option<usize> {
    let mut chars = text.char_indices();
    let mut end = 0;
    for expected in needle {
        let (i, c) = chars.next()?;
        if !c.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
        end = i + c.len_utf8();
    }
    Some(end)
}
