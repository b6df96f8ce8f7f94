use crate::error::{PlugsqlError, Result};
use crate::value::{FromValue, Value};
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Transaction identity and state, carried by value on every request issued
/// inside a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxnContext {
    pub start_ts: i64,
    pub commit_ts: i64,
    pub committed: bool,
    pub aborted: bool,
    pub isolation: i64,
    pub read_only: bool,
}

impl TxnContext {
    pub fn with_options(options: TxnOptions) -> Self {
        Self {
            isolation: options.isolation,
            read_only: options.read_only,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnOptions {
    pub isolation: i64,
    pub read_only: bool,
}

/// One bound query parameter. `ordinal` is 1-based and always set.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedValue {
    pub name: String,
    pub ordinal: i64,
    pub value: Value,
}

/// Ordered statement arguments, positional or named.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<NamedValue>);

impl Args {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(mut self, value: impl Into<Value>) -> Self {
        self.bind(String::new(), value.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bind(name.into(), value.into());
        self
    }

    /// Binds a native value of any type, failing on kinds outside the
    /// supported set.
    pub fn push_native<T: Any>(mut self, value: &T) -> Result<Self> {
        let value = Value::from_native(value)?;
        self.bind(String::new(), value);
        Ok(self)
    }

    fn bind(&mut self, name: String, value: Value) {
        let ordinal = self.0.len() as i64 + 1;
        self.0.push(NamedValue {
            name,
            ordinal,
            value,
        });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedValue> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<NamedValue> {
        self.0
    }
}

impl<V: Into<Value>> FromIterator<V> for Args {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        iter.into_iter().fold(Args::new(), |args, v| args.push(v))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub columns: Vec<Column>,
}

impl Row {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn value(&self, idx: usize) -> Option<&Value> {
        self.columns.get(idx).map(|c| &c.value)
    }

    pub fn get<T: FromValue>(&self, idx: usize) -> Result<T> {
        let value = self.value(idx).ok_or(PlugsqlError::ColumnCount {
            expected: idx + 1,
            got: self.columns.len(),
        })?;
        T::from_value(value)
    }

    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        let column = self
            .columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| PlugsqlError::Protocol(format!("no column named {name}")))?;
        T::from_value(&column.value)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(|c| &c.value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub last_insert_id: i64,
    pub rows_affected: i64,
}

impl ExecResult {
    pub fn last_insert_id(&self) -> i64 {
        self.last_insert_id
    }

    pub fn rows_affected(&self) -> i64 {
        self.rows_affected
    }
}

#[cfg(test)]
mod tests {
    use super::{Args, TxnContext, TxnOptions};
    use crate::value::Value;

    #[test]
    fn args_assign_ordinals_from_one() {
        let args = Args::new().push(1i64).named("name", "alice").push(Value::Null);
        let ordinals: Vec<i64> = args.iter().map(|a| a.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
        let names: Vec<&str> = args.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["", "name", ""]);

        let collected: Args = vec![10i64, 20].into_iter().collect();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected.into_inner()[1].ordinal, 2);
    }

    #[test]
    fn fresh_context_is_zeroed() {
        assert_eq!(
            TxnContext::with_options(TxnOptions::default()),
            TxnContext::default()
        );
        let ctx = TxnContext::with_options(TxnOptions {
            isolation: 4,
            read_only: true,
        });
        assert_eq!(ctx.isolation, 4);
        assert!(ctx.read_only);
        assert!(!ctx.committed && !ctx.aborted);
    }
}
