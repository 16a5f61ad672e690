//! # Wire Protocol Constants
//!
//! Purpose: Keep the memcached text-dialect limits and response phrases in
//! one place so the server and the client cannot drift apart.
//!
//! ## Notes
//!
//! - All command and response lines are ASCII terminated by CR-LF; value
//!   payloads are opaque bytes framed by a declared length.
//! - Response phrases are stored with their trailing CR-LF so writers can
//!   append them verbatim.

/// Maximum key length in bytes accepted on the wire.
pub const MAX_KEY_LEN: usize = 250;

/// Default maximum value length in bytes (1 MiB).
pub const MAX_VALUE_LEN: usize = 1 << 20;

/// Maximum accepted command-line length in bytes, excluding CR-LF.
pub const MAX_LINE_LEN: usize = 4096;

/// Line terminator for commands and responses.
pub const CRLF: &[u8] = b"\r\n";

/// Reply to a successful `set`.
pub const STORED: &[u8] = b"STORED\r\n";

/// Reply to a `delete` that removed a live entry.
pub const DELETED: &[u8] = b"DELETED\r\n";

/// Reply to a `delete` that found nothing.
pub const NOT_FOUND: &[u8] = b"NOT_FOUND\r\n";

/// Reply to `flush_all`.
pub const OK: &[u8] = b"OK\r\n";

/// Terminator for `get` and `stats` responses.
pub const END: &[u8] = b"END\r\n";

/// Reply to an unknown command.
pub const ERROR: &[u8] = b"ERROR\r\n";

/// Reply to a command line that is oversize or malformed.
pub const CLIENT_ERROR_BAD_LINE: &[u8] = b"CLIENT_ERROR bad command line format\r\n";

/// Reply to a `set` whose declared byte count is out of range.
pub const CLIENT_ERROR_BAD_CHUNK: &[u8] = b"CLIENT_ERROR bad data chunk\r\n";

/// Reply to a `set` the arena could not serve.
pub const SERVER_ERROR_OOM: &[u8] = b"SERVER_ERROR out of memory\r\n";
