pub mod config;
pub mod conn;
pub mod driver;
pub mod registry;
pub mod rows;
pub mod session;
pub mod supervisor;
pub mod txn;

pub use config::DriverConfig;
pub use conn::{Connection, Statement, Transaction};
pub use driver::Driver;
pub use plugsql_core::{
    Args, ExecResult, FromValue, PlugsqlError, Result, Row, TxnContext, TxnOptions, Value,
};
pub use registry::DriverRegistry;
pub use rows::Rows;
pub use session::Session;
pub use supervisor::PluginProcess;
pub use txn::{TxnCoordinator, TxnStatus};
