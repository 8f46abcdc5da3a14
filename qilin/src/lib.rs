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

//! # Qilin
//! Core trading control plane for the Chinese futures market (SHFE, DCE, CZCE, CFFEX, GFEX,
//! INE): market input -> strategy -> guardian -> protection -> execution -> audit.
//!
//! The core runs a single-threaded drain-per-tick event loop ([`engine::Orchestrator`]); I/O
//! workers communicate with it exclusively over the SPSC queues in
//! [`engine::OrchestratorHandles`]. Every decision, order transition and guardian action lands
//! in an append-only JSONL [`audit`] log deterministic enough for bit-exact replay
//! verification.

/// Append-only JSONL event log, canonical JSON rendering and the replay verifier.
pub mod audit;

/// `Tx`/`Rx` queue plumbing between the core and its I/O workers.
pub mod channel;

/// Injectable time source ([`clock::LiveClock`], [`clock::SimClock`]).
pub mod clock;

/// Fee/slippage/impact estimation and the edge gate.
pub mod cost;

/// The orchestrator event loop gluing every subsystem together.
pub mod engine;

/// Core-level error taxonomy.
pub mod error;

/// Audit event union and run/exec correlation identifiers.
pub mod event;

/// Operational-mode state machine, triggers and the guardian monitor.
pub mod guardian;

/// Structured logging initialisation.
pub mod logging;

/// Real-time margin level tracking and the open-position gate.
pub mod margin;

/// Market snapshot data structures consumed by strategies and gates.
pub mod market;

/// Two-leg calendar-spread execution and leg management.
pub mod pair;

/// Pre-trade protection gates composed into a short-circuiting pipeline.
pub mod protection;

/// Orchestrator process exit-code table.
pub mod shutdown;

/// Strategy capability set and the strategy host.
pub mod strategy;
