//! # Meridian Database Crate
//!
//! This crate acts as a high-level, application-specific interface to the
//! SQLite store. It is the single source of truth for accounts, signals,
//! positions, orders, and runtime settings.
//!
//! ## Architectural Principles
//!
//! - **Adapter:** encapsulates all database-specific logic behind a clean,
//!   abstract API, hiding SQL and storage details from the trading core.
//! - **Concurrent-read friendly:** the pool runs SQLite in WAL mode so the
//!   dashboard can read while the executor writes.
//! - **Exact money:** monetary columns are TEXT and converted to
//!   `rust_decimal::Decimal` at the row boundary, never floats.
//!
//! ## Public API
//!
//! - `connect`: The async function to establish the database connection pool.
//! - `run_migrations`: A utility to apply database migrations, ensuring the schema is up-to-date.
//! - `DbRepository`: The main struct that holds the connection pool and provides all
//!   the high-level data access methods.
//! - `DbError`: The specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod repository;
pub mod rows;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use repository::{DbRepository, NewOrder, NewPosition, Setting, TradeStats};
