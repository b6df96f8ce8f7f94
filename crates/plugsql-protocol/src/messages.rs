//! Field names are part of the protocol. Unknown fields are skipped.


use plugsql_core::TxnContext;
use serde::{Deserialize, Serialize};

/// Wire form of a scalar. Exactly one field is set on a well-formed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub null: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub int64: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub float64: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bool: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<WireTimestamp>,
}

/// Seconds and nanoseconds since the Unix epoch, UTC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireTimestamp {
    pub seconds: i64,
    pub nanos: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireNamedValue {
    pub name: String,
    pub ordinal: i64,
    pub value: WireValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    pub start_ts: u64,
    pub query: String,
    pub args: Vec<WireNamedValue>,
    pub returns_rows: bool,
    pub txn: Option<TxnContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireColumn {
    pub name: String,
    pub value: WireValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireRow {
    pub columns: Vec<WireColumn>,
}

/// What a request produced. The variant must agree with the request's
/// `returns_rows` flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryResult {
    Rows {
        columns: Vec<String>,
        rows: Vec<WireRow>,
    },
    Affected {
        last_insert_id: i64,
        rows_affected: i64,
    },
}

impl Default for QueryResult {
    fn default() -> Self {
        QueryResult::Affected {
            last_insert_id: 0,
            rows_affected: 0,
        }
    }
}

impl QueryResult {
    pub fn returns_rows(&self) -> bool {
        matches!(self, QueryResult::Rows { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Response {
    pub result: QueryResult,
    pub txn: Option<TxnContext>,
}

impl Response {
    pub fn affected(last_insert_id: i64, rows_affected: i64) -> Self {
        Self {
            result: QueryResult::Affected {
                last_insert_id,
                rows_affected,
            },
            txn: None,
        }
    }

    pub fn rows(columns: Vec<String>, rows: Vec<WireRow>) -> Self {
        Self {
            result: QueryResult::Rows { columns, rows },
            txn: None,
        }
    }

    pub fn with_txn(mut self, txn: Option<TxnContext>) -> Self {
        self.txn = txn;
        self
    }
}

/// Frames sent by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    Query(Request),
    CommitOrRollback(TxnContext),
    Ping,
}

/// Frames sent by the plugin.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginMessage {
    Response(Response),
    Txn(TxnContext),
    Pong,
    Error { message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorBody {
    pub message: String,
}
