//! Range queries over a table's primary key or a secondary index.

use std::ops::{Bound, RangeBounds};

use crate::store::record::{decode, Record};
use crate::store::table::Table;
use crate::transaction::TransactionResult;

/// The field a clause filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field<'a> {
    Key,
    Index(&'a str),
}

/// A pending range query. Results are ordered by the queried field, then key.
pub struct WhereClause<'a, 'tx, R> {
    table: &'a Table<'tx, R>,
    field: Field<'a>,
}

impl<'a, 'tx, R: Record> WhereClause<'a, 'tx, R> {
    pub(crate) fn new(table: &'a Table<'tx, R>, field: Field<'a>) -> Self {
        Self { table, field }
    }

    pub fn equals(self, value: i64) -> TransactionResult<Vec<R>> {
        self.range(value..=value)
    }

    pub fn above(self, value: i64) -> TransactionResult<Vec<R>> {
        self.range((Bound::Excluded(value), Bound::Unbounded))
    }

    pub fn above_or_equal(self, value: i64) -> TransactionResult<Vec<R>> {
        self.range(value..)
    }

    pub fn below(self, value: i64) -> TransactionResult<Vec<R>> {
        self.range(..value)
    }

    /// Both ends inclusive.
    pub fn between(self, lower: i64, upper: i64) -> TransactionResult<Vec<R>> {
        self.range(lower..=upper)
    }

    fn range<B>(self, bounds: B) -> TransactionResult<Vec<R>>
    where
        B: RangeBounds<i64>,
    {
        match self.field {
            Field::Key => {
                // keys are filtered before any blob is read
                let docs = self.table.tx.scan_where(&self.table.name, |key| {
                    i64::try_from(key.get()).is_ok_and(|k| bounds.contains(&k))
                })?;
                docs.into_iter().map(decode).collect()
            }
            Field::Index(index) => {
                let mut matched: Vec<(i64, R)> = self
                    .table
                    .to_vec()?
                    .into_iter()
                    .filter_map(|record| {
                        let value = record.index_value(index)?;
                        bounds.contains(&value).then_some((value, record))
                    })
                    .collect();
                matched.sort_by(|(a, ra), (b, rb)| a.cmp(b).then_with(|| ra.key().cmp(&rb.key())));
                Ok(matched.into_iter().map(|(_, record)| record).collect())
            }
        }
    }
}
