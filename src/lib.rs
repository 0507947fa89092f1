//! Keeping delegations in sync with the parent through SIG(0) signed DNS
//! UPDATE, and managing the keys involved.

pub mod cli;
pub mod config;
pub mod delegation;
pub mod dsync;
pub mod keystore;
pub mod log;
pub mod net;
pub mod operation;
pub mod sig0;
pub mod snapshot;
pub mod sync;
pub mod update;
pub mod util;

#[cfg(test)]
mod tests;
