use plugsql_core::{PlugsqlError, Result, Row, Value};

/// Once exhausted or closed, `next` keeps returning `None`.
#[derive(Debug)]
pub struct Rows {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Row>,
}

impl Rows {
    pub(crate) fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into_iter(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    /// Copies the next row's values into `dest`, which must have one slot per
    /// column. Returns `false` at end of rows.
    pub fn next_into(&mut self, dest: &mut [Value]) -> Result<bool> {
        if dest.len() != self.columns.len() {
            return Err(PlugsqlError::ColumnCount {
                expected: self.columns.len(),
                got: dest.len(),
            });
        }
        match self.rows.next() {
            Some(row) => {
                for (slot, column) in dest.iter_mut().zip(row.columns) {
                    *slot = column.value;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drops any rows not yet read.
    pub fn close(&mut self) {
        self.rows = Vec::new().into_iter();
    }
}

impl Iterator for Rows {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.rows.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for Rows {}

impl std::iter::FusedIterator for Rows {}
