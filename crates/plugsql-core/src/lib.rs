pub mod error;
pub mod types;
pub mod value;

pub use error::{PlugsqlError, Result};
pub use types::{Args, Column, ExecResult, NamedValue, Row, TxnContext, TxnOptions};
pub use value::{FromValue, Value};
