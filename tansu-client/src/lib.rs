//! # tansu Sync Client
//!
//! Blocking memcached-text client for the tansu server. Connections are
//! pooled and reused across calls, so a sequence of commands pays for one
//! TCP handshake, not one per command.

mod client;
mod pool;
mod text;

pub use client::{CacheClient, ClientConfig, ClientError, ClientResult};
