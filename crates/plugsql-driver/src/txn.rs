use parking_lot::Mutex;
use plugsql_core::{PlugsqlError, Result, TxnContext, TxnOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Idle,
    Open,
    /// Commit or rollback has been sent and its reply is outstanding.
    Ending,
}

#[derive(Debug)]
enum TxnState {
    Idle,
    Open(TxnContext),
    Ending,
}

/// The lock is never held across an RPC, so a `begin` racing a slow commit
/// fails instead of waiting.
#[derive(Debug)]
pub struct TxnCoordinator {
    state: Mutex<TxnState>,
}

impl Default for TxnCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TxnCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TxnState::Idle),
        }
    }

    pub fn status(&self) -> TxnStatus {
        match &*self.state.lock() {
            TxnState::Idle => TxnStatus::Idle,
            TxnState::Open(_) => TxnStatus::Open,
            TxnState::Ending => TxnStatus::Ending,
        }
    }

    pub fn begin(&self, options: TxnOptions) -> Result<TxnContext> {
        let mut state = self.state.lock();
        match &*state {
            TxnState::Idle => {
                let ctx = TxnContext::with_options(options);
                *state = TxnState::Open(ctx);
                Ok(ctx)
            }
            TxnState::Open(_) | TxnState::Ending => Err(PlugsqlError::TransactionAlreadyInProgress),
        }
    }

    /// Context to attach to the next statement, `None` outside a transaction.
    pub fn current(&self) -> Result<Option<TxnContext>> {
        match &*self.state.lock() {
            TxnState::Idle => Ok(None),
            TxnState::Open(ctx) => Ok(Some(*ctx)),
            TxnState::Ending => Err(PlugsqlError::TransactionAlreadyClosed),
        }
    }

    /// Stores the plugin's enriched copy of the open transaction's context.
    pub fn absorb(&self, ctx: TxnContext) {
        if let TxnState::Open(current) = &mut *self.state.lock() {
            *current = ctx;
        }
    }

    /// Moves `Open` to `Ending`. Dropping the guard without `finish` puts
    /// the transaction back to `Open`, so a cancelled commit can still be
    /// rolled back.
    pub fn start_end(&self) -> Result<EndGuard<'_>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, TxnState::Ending) {
            TxnState::Open(ctx) => Ok(EndGuard {
                txn: self,
                ctx,
                finished: false,
            }),
            previous => {
                *state = previous;
                Err(PlugsqlError::TransactionAlreadyClosed)
            }
        }
    }
}

#[derive(Debug)]
pub struct EndGuard<'a> {
    txn: &'a TxnCoordinator,
    ctx: TxnContext,
    finished: bool,
}

impl EndGuard<'_> {
    pub fn context(&self) -> TxnContext {
        self.ctx
    }

    /// Discards the local context whatever the remote outcome was.
    pub fn finish(mut self) {
        self.finished = true;
        *self.txn.state.lock() = TxnState::Idle;
    }
}

impl Drop for EndGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            *self.txn.state.lock() = TxnState::Open(self.ctx);
        }
    }
}
