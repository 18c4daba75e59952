//! Core domain + application logic for the ferry chat bot.
//!
//! This crate is framework-agnostic. Telegram and the third-party HTTP
//! integrations live behind ports (traits) implemented in adapter crates.
//! The media path classifier in [`classify`] is a pure function and has no
//! dependency on any of the other modules.

pub mod auth;
pub mod cache;
pub mod classify;
pub mod commands;
pub mod config;
pub mod domain;
pub mod download;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod oauth;
pub mod plugins;
pub mod security;

pub use errors::{Error, Result};
