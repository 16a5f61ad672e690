//! # tansu-server
//!
//! Pipelined front end for the tansu cache: a line parser for the memcached
//! text dialect, per-connection double-buffered output, and a
//! single-threaded accept loop. Every command executes inline on the loop
//! thread against the lockless store, so pipelines of N commands cost one
//! read and one write per connection turn.

pub mod conn;
pub mod protocol;
pub mod server;

pub use server::{handle_connection, serve, SharedStore};
