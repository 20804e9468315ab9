//! PostgreSQL storage for prbridge
//!
//! Implements [`prbridge_core::NotifyStore`] on a sqlx connection pool. The
//! schema lives in `migrations/` and is applied by [`PostgresStore::connect`].

pub mod models;
pub mod postgres;

pub use postgres::PostgresStore;
