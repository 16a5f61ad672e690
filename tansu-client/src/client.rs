//! # Blocking Client
//!
//! One call per command: lease a pooled connection, run the exchange, park
//! the connection again. Keys and values are plain byte slices; nothing is
//! copied on the way out except the reply payload itself. The server
//! address is validated when the client is built, so a typo fails before
//! the first command rather than on it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::pool::Pool;

/// Result alias for every client call.
pub type ClientResult<T> = Result<T, ClientError>;

/// Failures a client call can surface.
#[derive(Debug)]
pub enum ClientError {
    /// The socket failed, closed early, or timed out.
    Io(std::io::Error),
    /// The reply did not parse as the text protocol, or was the wrong
    /// reply for the command.
    BadReply,
    /// The server answered with an `ERROR`, `CLIENT_ERROR` or
    /// `SERVER_ERROR` line; the payload is that line.
    Rejected(String),
    /// Every allowed connection is currently leased out.
    PoolExhausted,
    /// The configured address is not a `host:port` socket address.
    InvalidAddress,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Io(err) => write!(f, "socket error: {err}"),
            ClientError::BadReply => f.write_str("malformed reply"),
            ClientError::Rejected(line) => write!(f, "server rejected command: {line}"),
            ClientError::PoolExhausted => f.write_str("no connection available"),
            ClientError::InvalidAddress => f.write_str("bad server address"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(err)
    }
}

/// Tuning for a client handle.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address as `host:port`.
    pub addr: String,
    /// Idle connections kept around for reuse.
    pub max_idle: usize,
    /// Hard cap on dialed connections, leased plus idle.
    pub max_total: usize,
    /// Applied to connect, read and write alike; `None` blocks forever.
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:11211".to_string(),
            max_idle: 4,
            max_total: 16,
            timeout: None,
        }
    }
}

/// Handle to one server. Cheap to clone; every clone shares the same
/// connection pool.
#[derive(Clone)]
pub struct CacheClient {
    pool: Arc<Pool>,
}

impl fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheClient").finish_non_exhaustive()
    }
}

impl CacheClient {
    /// Creates a client for `addr` with default pool settings.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        Self::with_config(ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        })
    }

    /// Creates a client with explicit pool settings.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let addr = config
            .addr
            .parse()
            .map_err(|_| ClientError::InvalidAddress)?;
        Ok(CacheClient {
            pool: Pool::new(addr, config),
        })
    }

    /// Stores a value. `ttl_secs` of 0 means the entry never expires.
    pub fn set(&self, key: &[u8], value: &[u8], ttl_secs: u32) -> ClientResult<()> {
        self.pool.lease()?.run(|conn| conn.set(key, value, ttl_secs))
    }

    /// Looks up a key; `Ok(None)` means missing or expired.
    pub fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        self.pool.lease()?.run(|conn| conn.get(key))
    }

    /// Deletes a key. Returns true when a live entry was removed.
    pub fn delete(&self, key: &[u8]) -> ClientResult<bool> {
        self.pool.lease()?.run(|conn| conn.delete(key))
    }

    /// Drops every entry in the store.
    pub fn flush_all(&self) -> ClientResult<()> {
        self.pool.lease()?.run(|conn| conn.flush_all())
    }

    /// Fetches the server's `STAT` name/value pairs.
    pub fn stats(&self) -> ClientResult<Vec<(String, String)>> {
        self.pool.lease()?.run(|conn| conn.stats())
    }

    /// Fetches the server version string.
    pub fn version(&self) -> ClientResult<String> {
        self.pool.lease()?.run(|conn| conn.version())
    }
}
