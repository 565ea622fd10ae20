//! Castbridge - Broadcast engine for merged and remuxed web media streams
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod engine;
pub mod error;
pub mod server;
pub mod tools;

pub use error::{Error, Result};
