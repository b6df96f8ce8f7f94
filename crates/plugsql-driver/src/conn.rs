use crate::rows::Rows;
use crate::session::Session;
use crate::txn::{TxnCoordinator, TxnStatus};
use chrono::Utc;
use plugsql_core::{Args, ExecResult, PlugsqlError, Result, TxnContext, TxnOptions};
use plugsql_protocol::codec::{decode_row, encode_args};
use plugsql_protocol::{QueryResult, Request};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Transaction state lives here; the plugin only sees the context sent with
/// each statement.
#[derive(Debug)]
pub struct Connection {
    id: Uuid,
    driver: String,
    session: Mutex<Session>,
    txn: TxnCoordinator,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(driver: impl Into<String>, session: Session) -> Self {
        Self {
            id: Uuid::new_v4(),
            driver: driver.into(),
            session: Mutex::new(session),
            txn: TxnCoordinator::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn txn_status(&self) -> TxnStatus {
        self.txn.status()
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.status() != TxnStatus::Idle
    }

    pub fn prepare(&self, query: impl Into<String>) -> Result<Statement<'_>> {
        self.ensure_open()?;
        Ok(Statement {
            conn: self,
            query: query.into(),
        })
    }

    pub async fn execute(&self, query: &str, args: Args) -> Result<ExecResult> {
        self.prepare(query)?.execute(args).await
    }

    pub async fn query(&self, query: &str, args: Args) -> Result<Rows> {
        self.prepare(query)?.query(args).await
    }

    pub fn begin(&self) -> Result<Transaction<'_>> {
        self.begin_with(TxnOptions::default())
    }

    pub fn begin_with(&self, options: TxnOptions) -> Result<Transaction<'_>> {
        self.ensure_open()?;
        self.txn.begin(options)?;
        debug!(conn_id = %self.id, ?options, "transaction started");
        Ok(Transaction {
            conn: self,
            finished: false,
        })
    }

    /// A commit the plugin reports as aborted fails with
    /// [`PlugsqlError::TransactionAborted`]. If this future is dropped before
    /// the reply, the transaction stays open.
    pub async fn end_transaction(&self, commit: bool) -> Result<TxnContext> {
        self.ensure_open()?;
        let ending = self.txn.start_end()?;
        let mut ctx = ending.context();
        ctx.aborted = !commit;
        let outcome = {
            let mut session = self.session.lock().await;
            session.call_txn_control(ctx).await
        };
        ending.finish();

        let remote = outcome?;
        if commit && remote.aborted {
            warn!(conn_id = %self.id, "plugin aborted transaction on commit");
            return Err(PlugsqlError::TransactionAborted);
        }
        debug!(
            conn_id = %self.id,
            commit,
            commit_ts = remote.commit_ts,
            "transaction ended"
        );
        Ok(remote)
    }

    pub async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        self.session.lock().await.ping().await
    }

    /// `None` waits forever.
    pub async fn set_call_timeout(&self, call_timeout: Option<Duration>) {
        self.session.lock().await.set_call_timeout(call_timeout);
    }

    /// Closes the channel. A transaction still open is rolled back first,
    /// best effort. The plugin process keeps running.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut session = self.session.lock().await;
        if let Ok(ending) = self.txn.start_end() {
            warn!(conn_id = %self.id, "closing connection with open transaction, rolling back");
            let mut ctx = ending.context();
            ctx.aborted = true;
            if let Err(err) = session.call_txn_control(ctx).await {
                warn!(conn_id = %self.id, "rollback on close failed: {err}");
            }
            ending.finish();
        }
        debug!(conn_id = %self.id, driver = %self.driver, "connection closed");
        session.close().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(PlugsqlError::ConnectionClosed);
        }
        Ok(())
    }

    async fn run(&self, query: &str, args: &Args, returns_rows: bool) -> Result<QueryResult> {
        self.ensure_open()?;
        let mut session = self.session.lock().await;
        let txn = self.txn.current()?;
        let request = Request {
            start_ts: Utc::now().timestamp_nanos_opt().unwrap_or_default().max(0) as u64,
            query: query.to_string(),
            args: encode_args(args),
            returns_rows,
            txn,
        };
        let response = session.call(request).await?;
        drop(session);

        if let (Some(_), Some(enriched)) = (txn, response.txn) {
            self.txn.absorb(enriched);
        }
        if response.result.returns_rows() != returns_rows {
            return Err(PlugsqlError::Protocol(format!(
                "plugin answered returns_rows={returns_rows} request with the other result kind"
            )));
        }
        Ok(response.result)
    }
}

#[derive(Debug, Clone)]
pub struct Statement<'c> {
    conn: &'c Connection,
    query: String,
}

impl Statement<'_> {
    pub fn query_text(&self) -> &str {
        &self.query
    }

    pub async fn execute(&self, args: Args) -> Result<ExecResult> {
        match self.conn.run(&self.query, &args, false).await? {
            QueryResult::Affected {
                last_insert_id,
                rows_affected,
            } => Ok(ExecResult {
                last_insert_id,
                rows_affected,
            }),
            QueryResult::Rows { .. } => Err(PlugsqlError::Protocol(
                "row set returned for exec".into(),
            )),
        }
    }

    pub async fn query(&self, args: Args) -> Result<Rows> {
        match self.conn.run(&self.query, &args, true).await? {
            QueryResult::Rows { columns, rows } => {
                let rows = rows
                    .iter()
                    .map(|row| decode_row(&columns, row))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Rows::new(columns, rows))
            }
            QueryResult::Affected { .. } => Err(PlugsqlError::Protocol(
                "affected count returned for query".into(),
            )),
        }
    }
}

/// Handle for an open transaction. Dropping it without `commit` or
/// `rollback` leaves the connection in the transaction.
#[derive(Debug)]
pub struct Transaction<'c> {
    conn: &'c Connection,
    finished: bool,
}

impl<'c> Transaction<'c> {
    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    pub fn prepare(&self, query: impl Into<String>) -> Result<Statement<'c>> {
        self.conn.prepare(query)
    }

    pub async fn execute(&self, query: &str, args: Args) -> Result<ExecResult> {
        self.conn.execute(query, args).await
    }

    pub async fn query(&self, query: &str, args: Args) -> Result<Rows> {
        self.conn.query(query, args).await
    }

    pub async fn commit(mut self) -> Result<TxnContext> {
        self.finished = true;
        self.conn.end_transaction(true).await
    }

    pub async fn rollback(mut self) -> Result<TxnContext> {
        self.finished = true;
        self.conn.end_transaction(false).await
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished && self.conn.txn_status() == TxnStatus::Open {
            warn!(
                conn_id = %self.conn.id,
                "transaction dropped without commit or rollback"
            );
        }
    }
}
