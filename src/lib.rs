//! Signing agent: relays the custody platform's action feed to local
//! consumers and, optionally, auto-approves actions.
//!
//! Several agents may watch the same feed; with load balancing enabled they
//! coordinate through a shared cache and distributed lock so each action is
//! approved by exactly one of them.

pub mod agent;
pub mod approver;
pub mod config;
pub mod dedup;
pub mod hub;
pub mod server;
pub mod types;

#[cfg(test)]
mod test_utils;
