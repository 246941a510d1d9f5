//! WAGERBOOK: points ledger, pari-mutuel wagering and activity rewards
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod clock;
pub mod storage;
pub mod ledger;
pub mod wager;
pub mod activity;
pub mod notify;
pub mod api;
