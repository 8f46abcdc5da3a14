use crate::{order::OrderState, order::id::LocalOrderId, timeout::TimeoutKind};
use qilin_instrument::symbol::Symbol;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum ExecutionError {
    /// The per-order FSM rejected an input; the caller logs and continues.
    #[error("invalid transition: {input} in state {state}")]
    InvalidTransition { state: OrderState, input: String },

    /// An identifier mapping conflict; fatal for the order concerned.
    #[error("duplicate id mapping: {0}")]
    DuplicateId(String),

    /// Gateway callback references an order_ref/exchange_id with no known order.
    #[error("unknown id: {0}")]
    UnknownId(String),

    /// A close was requested against more position than is tracked.
    #[error("insufficient position for {symbol}: requested {requested}, available {available}")]
    InsufficientPosition {
        symbol: Symbol,
        requested: i64,
        available: i64,
    },

    /// A fill would push filled_qty beyond the order quantity.
    #[error("fill of {fill} exceeds order {local_id} quantity {qty} (filled {filled})")]
    FillExceedsQuantity {
        local_id: LocalOrderId,
        qty: i64,
        filled: i64,
        fill: i64,
    },

    /// A registered gateway deadline expired before the matching callback arrived.
    #[error("timeout expired: {0}")]
    TimeoutExpired(TimeoutKind),
}
