#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # Qilin-Execution
//! Order lifecycle state machines, local/broker/exchange identifier mapping, request timeouts,
//! trades and trade-driven position tracking.
//!
//! The data structures here are deliberately synchronous and single-owner: the core event loop is
//! the only mutator, and gateway I/O workers communicate with it exclusively through queues (see
//! the `qilin` crate).

/// [`ExecutionError`](error::ExecutionError) taxonomy.
pub mod error;

/// Gateway request/event contracts ([`GatewayRequest`](gateway::GatewayRequest),
/// [`GatewayEvent`](gateway::GatewayEvent)) with order correlation keys.
pub mod gateway;

/// Per-order state machine, [`OrderContext`](order::OrderContext) and the
/// [`OrderRegistry`](order::registry::OrderRegistry) identifier maps.
pub mod order;

/// Trade-driven [`PositionTracker`](position::PositionTracker) with broker reconciliation.
pub mod position;

/// ACK/FILL/CANCEL deadline bookkeeping ([`TimeoutManager`](timeout::TimeoutManager)).
pub mod timeout;

/// Fill ([`Trade`](trade::Trade)) data structures.
pub mod trade;
