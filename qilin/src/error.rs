use crate::{audit::AuditError, channel::RxDropped, guardian::GuardianError, pair::PairError};
use qilin_execution::error::ExecutionError;
use qilin_instrument::instrument::InstrumentError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core-level error taxonomy.
///
/// Protection rejections and trigger firings are values, not errors; everything here is either
/// order-scoped (logged and survived) or process-fatal (audit faults, dropped queues).
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum CoreError {
    #[error("instrument: {0}")]
    Instrument(#[from] InstrumentError),

    #[error("execution: {0}")]
    Execution(#[from] ExecutionError),

    #[error("guardian: {0}")]
    Guardian(#[from] GuardianError),

    #[error("pair: {0}")]
    Pair(#[from] PairError),

    #[error("audit: {0}")]
    Audit(#[from] AuditError),

    #[error("queue receiver dropped: {0}")]
    QueueDropped(String),
}

impl From<RxDropped> for CoreError {
    fn from(value: RxDropped) -> Self {
        Self::QueueDropped(value.to_string())
    }
}

impl CoreError {
    /// Process-fatal errors halt the core deterministically; everything else is order-scoped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Audit(_) | CoreError::QueueDropped(_))
    }
}
