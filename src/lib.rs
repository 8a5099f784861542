//! Loan servicing backend: disbursement and repayment orchestration,
//! schedule allocation, channel reconciliation and lifecycle events.

pub mod api;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod events;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
