pub mod auth;
pub mod booking;
pub mod compactor;
pub mod config;
pub mod contract;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod payment;
pub mod sql;
pub mod time;
pub mod tls;
pub mod wal;
pub mod wire;
