//! Core domain for gh-agent: sessions, conversation turns, tool traces, the
//! error taxonomy shared by every layer, configuration, and the durable
//! [`ledger::Ledger`] that persists turns.

pub mod config;
pub mod error;
pub mod ledger;
pub mod types;
