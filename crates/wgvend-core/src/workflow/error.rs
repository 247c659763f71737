//! Workflow error types.

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::ledger::LedgerError;
use crate::pool::PoolError;

/// Errors escaping a workflow step.
///
/// Domain outcomes (pool exhausted, request not found, rejection) are not
/// errors — they are reported through the step's outcome value after the
/// affected parties were notified. Only genuine operation failures surface
/// here.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A pool operation failed.
    #[error("pool failure: {0}")]
    Pool(#[from] PoolError),

    /// A ledger operation failed.
    #[error("ledger failure: {0}")]
    Ledger(#[from] LedgerError),

    /// The messaging gateway failed.
    #[error("gateway failure: {0}")]
    Gateway(#[from] GatewayError),

    /// A workflow state lock was poisoned by a panicking thread.
    #[error("workflow state lock poisoned")]
    LockPoisoned,
}
