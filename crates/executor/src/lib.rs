//! # Meridian Executor Crate
//!
//! Turns a parsed signal into a bracket of three coordinated orders on the
//! exchange: a MARKET entry plus reduce-only TAKE_PROFIT_MARKET and
//! STOP_MARKET protective legs, dispatched concurrently.
//!
//! ## Architectural Principles
//!
//! - **Entry-anchored consistency:** a position row exists only after the
//!   exchange accepted the entry order. A rejected entry rolls back any
//!   accepted protective legs; a rejected protective leg never rolls back
//!   the entry.
//! - **Non-blocking persistence:** order rows flow through a bounded queue
//!   to a single writer task. The dispatch path never waits on the store.
//! - **Filter conformance:** every submitted quantity and trigger price is
//!   rounded to the symbol's lot step and tick, clamped to the exchange
//!   bounds, and lifted above the notional floor.
//!
//! ## Public API
//!
//! - `OrderExecutor`: the per-signal execution pipeline.
//! - `OrderWriter`: the async order-row writer handle.
//! - `ExecutorError`: the specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod dispatch;
pub mod error;
pub mod sizing;
pub mod writer;

// Re-export the key components to provide a clean, public-facing API.
pub use dispatch::OrderExecutor;
pub use error::ExecutorError;
pub use writer::OrderWriter;
