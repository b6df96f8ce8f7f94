use crate::messages::{WireColumn, WireNamedValue, WireRow, WireTimestamp, WireValue};
use chrono::{TimeZone, Utc};
use plugsql_core::{Args, Column, NamedValue, PlugsqlError, Result, Row, Value};
use std::any::Any;

pub fn encode_value(value: &Value) -> WireValue {
    let mut wire = WireValue::default();
    match value {
        Value::Null => wire.null = Some(true),
        Value::Int64(v) => wire.int64 = Some(*v),
        Value::Float64(v) => wire.float64 = Some(*v),
        Value::Bool(v) => wire.bool = Some(*v),
        Value::Bytes(v) => wire.bytes = Some(v.clone()),
        Value::String(v) => wire.string = Some(v.clone()),
        Value::Timestamp(ts) => {
            wire.time = Some(WireTimestamp {
                seconds: ts.timestamp(),
                nanos: ts.timestamp_subsec_nanos(),
            })
        }
    }
    wire
}

/// Encodes an arbitrary native value, rejecting kinds outside the closed set.
pub fn encode_native<T: Any>(value: &T) -> Result<WireValue> {
    Value::from_native(value).map(|v| encode_value(&v))
}

pub fn decode_value(wire: &WireValue) -> Result<Value> {
    let set = [
        wire.null.is_some(),
        wire.int64.is_some(),
        wire.float64.is_some(),
        wire.bool.is_some(),
        wire.bytes.is_some(),
        wire.string.is_some(),
        wire.time.is_some(),
    ]
    .iter()
    .filter(|s| **s)
    .count();
    match set {
        0 => return Err(PlugsqlError::MalformedValue("no variant set".into())),
        1 => {}
        n => {
            return Err(PlugsqlError::MalformedValue(format!(
                "{n} variants set, expected exactly one"
            )))
        }
    }

    if let Some(null) = wire.null {
        if !null {
            return Err(PlugsqlError::MalformedValue("null marker set to false".into()));
        }
        return Ok(Value::Null);
    }
    if let Some(v) = wire.int64 {
        return Ok(Value::Int64(v));
    }
    if let Some(v) = wire.float64 {
        return Ok(Value::Float64(v));
    }
    if let Some(v) = wire.bool {
        return Ok(Value::Bool(v));
    }
    if let Some(v) = &wire.bytes {
        return Ok(Value::Bytes(v.clone()));
    }
    if let Some(v) = &wire.string {
        return Ok(Value::String(v.clone()));
    }
    match wire.time {
        Some(WireTimestamp { seconds, nanos }) => Utc
            .timestamp_opt(seconds, nanos)
            .single()
            .map(Value::Timestamp)
            .ok_or_else(|| {
                PlugsqlError::MalformedValue(format!(
                    "timestamp out of range: {seconds}s {nanos}ns"
                ))
            }),
        None => Err(PlugsqlError::MalformedValue("no variant set".into())),
    }
}

pub fn encode_args(args: &Args) -> Vec<WireNamedValue> {
    args.iter()
        .map(|arg| WireNamedValue {
            name: arg.name.clone(),
            ordinal: arg.ordinal,
            value: encode_value(&arg.value),
        })
        .collect()
}

pub fn decode_args(args: &[WireNamedValue]) -> Result<Vec<NamedValue>> {
    args.iter()
        .map(|arg| {
            if arg.ordinal < 1 {
                return Err(PlugsqlError::Protocol(format!(
                    "argument ordinal must be >= 1, got {}",
                    arg.ordinal
                )));
            }
            Ok(NamedValue {
                name: arg.name.clone(),
                ordinal: arg.ordinal,
                value: decode_value(&arg.value)?,
            })
        })
        .collect()
}

pub fn encode_row(columns: &[String], values: &[Value]) -> Result<WireRow> {
    if columns.len() != values.len() {
        return Err(PlugsqlError::ColumnCount {
            expected: columns.len(),
            got: values.len(),
        });
    }
    Ok(WireRow {
        columns: columns
            .iter()
            .zip(values)
            .map(|(name, value)| WireColumn {
                name: name.clone(),
                value: encode_value(value),
            })
            .collect(),
    })
}

/// Decodes one row of a row-returning response, enforcing that it carries
/// exactly one column per declared result column.
pub fn decode_row(columns: &[String], row: &WireRow) -> Result<Row> {
    if row.columns.len() != columns.len() {
        return Err(PlugsqlError::ColumnCount {
            expected: columns.len(),
            got: row.columns.len(),
        });
    }
    let columns = row
        .columns
        .iter()
        .map(|c| {
            Ok(Column {
                name: c.name.clone(),
                value: decode_value(&c.value)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Row { columns })
}
