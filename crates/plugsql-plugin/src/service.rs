use async_trait::async_trait;
use plugsql_core::TxnContext;
use plugsql_protocol::{Request, Response};

/// One instance serves every connection. An `Err` goes back to the host as
/// an error frame and the connection stays open.
#[async_trait]
pub trait DriverService: Send + Sync {
    /// Runs one statement. The result variant must agree with
    /// `request.returns_rows`.
    async fn query(&self, request: Request) -> anyhow::Result<Response>;

    /// Commits `ctx`, or rolls it back when `ctx.aborted` is set, and
    /// returns the final context.
    async fn commit_or_rollback(&self, ctx: TxnContext) -> anyhow::Result<TxnContext>;

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
