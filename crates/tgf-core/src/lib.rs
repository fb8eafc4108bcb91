//! Core of the message-fetch bot.
//!
//! Framework-agnostic: the bot transport, the messaging platform and the session
//! store live behind ports implemented in adapter crates.

pub mod audit;
pub mod config;
pub mod delivery;
pub mod domain;
pub mod errors;
pub mod fetch;
pub mod link;
pub mod logging;
pub mod login;
pub mod messaging;
pub mod platform;
pub mod security;
pub mod service;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
