//! Room availability and double-booking detection for small hotels, served
//! over the PostgreSQL wire protocol. One WAL-backed ledger per database.

pub mod auth;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod observability;
pub mod sql;
pub mod store;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
