//! Dense views of sparse integer-keyed collections.

use std::collections::BTreeMap;

use crate::model::{CellValue, RowRecord};

/// Project a sparse map onto a contiguous vector of length `max key + 1`,
/// calling `fill` for every absent position.
///
/// `None` if `max key + 1` does not fit in a `usize`.
pub fn densify<T, F>(sparse: BTreeMap<u64, T>, mut fill: F) -> Option<Vec<T>>
where
    F: FnMut() -> T,
{
    let len = match sparse.keys().next_back() {
        Some(max) => usize::try_from(*max).ok()?.checked_add(1)?,
        None => 0,
    };
    let mut dense = Vec::with_capacity(len);
    let mut entries = sparse.into_iter().peekable();

    for position in 0..len as u64 {
        match entries.next_if(|(key, _)| *key == position) {
            Some((_, value)) => dense.push(value),
            None => dense.push(fill()),
        }
    }
    Some(dense)
}

/// Rebuild the full data matrix from stored rows.
///
/// Missing rows are filled with empty cells, as many as the lowest stored row
/// has.
pub fn dense_rows(records: Vec<RowRecord>) -> Option<Vec<Vec<CellValue>>> {
    let sparse: BTreeMap<u64, Vec<CellValue>> = records.into_iter().map(|r| (r.id, r.data)).collect();
    let width = sparse.values().next().map_or(0, Vec::len);
    densify(sparse, || CellValue::empty_row(width))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_densify_fills_gaps() {
        let sparse: BTreeMap<u64, i32> = [(1, 10), (4, 40)].into_iter().collect();
        assert_eq!(densify(sparse, || 0), Some(vec![0, 10, 0, 0, 40]));
    }

    #[test]
    fn test_densify_empty() {
        let sparse: BTreeMap<u64, i32> = BTreeMap::new();
        assert_eq!(densify(sparse, || 0), Some(Vec::new()));
    }

    #[test]
    fn test_dense_rows_width_from_first_row() {
        let records = vec![
            RowRecord::new(3, vec!["c".into(), "d".into()]),
            RowRecord::new(1, vec!["a".into(), "b".into()]),
        ];
        let rows = dense_rows(records).unwrap();

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], CellValue::empty_row(2));
        assert_eq!(rows[1], vec![CellValue::from("a"), CellValue::from("b")]);
        assert_eq!(rows[2], CellValue::empty_row(2));
        assert_eq!(rows[3], vec![CellValue::from("c"), CellValue::from("d")]);
    }

    #[test]
    fn test_dense_rows_empty_store() {
        assert_eq!(dense_rows(Vec::new()), Some(Vec::new()));
    }

    #[test]
    fn test_densify_rejects_unaddressable_length() {
        let sparse: BTreeMap<u64, i32> = [(0, 1), (u64::MAX, 2)].into_iter().collect();
        assert_eq!(densify(sparse, || 0), None);
    }
}
