//! Slow-connection engine: holds many HTTP requests open by sending them
//! a few bytes at a time.

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod strategy;
pub mod target;
pub mod user_agent;
pub mod worker;

pub use config::RunConfig;
pub use connection::{Connection, Connector};
pub use engine::{Engine, RunHandle, RunSummary};
pub use error::{ConfigError, DialError, WriteError};
pub use ledger::{ActiveConnection, LedgerSnapshot, StatusLedger};
pub use strategy::{ContentLength, Method, PostBody, Strategy};
pub use target::{Scheme, Target};
pub use worker::WorkerOutcome;
