//! # Connection Reuse
//!
//! The client keeps a bounded LIFO stack of idle connections. Leasing pops
//! the most recently parked socket, which is the one most likely to still
//! have a warm path through the kernel; parking pushes it back unless the
//! idle cap is reached, in which case the socket is simply dropped. A lease
//! whose command failed never goes back: a failed exchange may leave unread
//! bytes on the wire, and the next borrower would misparse them.

use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};

use crate::client::{ClientConfig, ClientError, ClientResult};
use crate::text;

/// Shared connection stack. `open` counts every dialed socket, leased or
/// idle, and enforces the `max_total` budget.
pub(crate) struct Pool {
    addr: SocketAddr,
    config: ClientConfig,
    idle: Mutex<Idle>,
}

struct Idle {
    stack: Vec<TextConn>,
    open: usize,
}

impl Pool {
    pub fn new(addr: SocketAddr, config: ClientConfig) -> Arc<Self> {
        Arc::new(Pool {
            addr,
            config,
            idle: Mutex::new(Idle {
                stack: Vec::new(),
                open: 0,
            }),
        })
    }

    /// Pops an idle connection, dialing a fresh one when the stack is empty
    /// and the open-socket budget allows it.
    pub fn lease(self: &Arc<Self>) -> ClientResult<Lease> {
        {
            let mut idle = self.idle.lock().expect("pool mutex poisoned");
            if let Some(conn) = idle.stack.pop() {
                return Ok(Lease::new(self, conn));
            }
            if idle.open >= self.config.max_total {
                return Err(ClientError::PoolExhausted);
            }
            idle.open += 1;
        }
        // Dial outside the lock; a slow handshake must not stall peers.
        match TextConn::dial(self.addr, &self.config) {
            Ok(conn) => Ok(Lease::new(self, conn)),
            Err(err) => {
                self.forget_one();
                Err(err)
            }
        }
    }

    fn park(&self, conn: TextConn) {
        let mut idle = self.idle.lock().expect("pool mutex poisoned");
        if idle.stack.len() < self.config.max_idle {
            idle.stack.push(conn);
        } else {
            idle.open -= 1;
        }
    }

    fn forget_one(&self) {
        let mut idle = self.idle.lock().expect("pool mutex poisoned");
        idle.open = idle.open.saturating_sub(1);
    }
}

/// A borrowed connection. Dropping it parks the socket for reuse unless a
/// command on it failed.
pub(crate) struct Lease {
    pool: Arc<Pool>,
    conn: Option<TextConn>,
    healthy: bool,
}

impl Lease {
    fn new(pool: &Arc<Pool>, conn: TextConn) -> Self {
        Lease {
            pool: Arc::clone(pool),
            conn: Some(conn),
            healthy: true,
        }
    }

    /// Runs one command on the leased connection.
    pub fn run<T>(
        &mut self,
        op: impl FnOnce(&mut TextConn) -> ClientResult<T>,
    ) -> ClientResult<T> {
        let conn = self.conn.as_mut().expect("lease holds a connection");
        let result = op(conn);
        self.healthy &= result.is_ok();
        result
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.healthy {
                self.pool.park(conn);
            } else {
                self.pool.forget_one();
            }
        }
    }
}

/// One text-protocol connection plus its reusable scratch buffers.
pub(crate) struct TextConn {
    reader: BufReader<TcpStream>,
    line: Vec<u8>,
    request: Vec<u8>,
}

impl TextConn {
    fn dial(addr: SocketAddr, config: &ClientConfig) -> ClientResult<Self> {
        let stream = match config.timeout {
            Some(limit) => TcpStream::connect_timeout(&addr, limit)?,
            None => TcpStream::connect(addr)?,
        };
        // One knob covers both directions; a cache round trip that takes
        // longer than the configured limit is dead either way.
        stream.set_read_timeout(config.timeout)?;
        stream.set_write_timeout(config.timeout)?;
        // Single-line commands must not sit behind Nagle.
        stream.set_nodelay(true)?;

        Ok(TextConn {
            reader: BufReader::new(stream),
            line: Vec::with_capacity(128),
            request: Vec::with_capacity(256),
        })
    }

    pub fn set(&mut self, key: &[u8], value: &[u8], ttl_secs: u32) -> ClientResult<()> {
        self.request.clear();
        text::encode_set(&mut self.request, key, value, ttl_secs);
        self.send()?;
        match self.reply_line()?.as_slice() {
            b"STORED" => Ok(()),
            _ => Err(ClientError::BadReply),
        }
    }

    pub fn get(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        self.request.clear();
        text::encode_get(&mut self.request, key);
        self.send()?;
        let mut values = text::read_get_reply(&mut self.reader, &mut self.line)?;
        Ok(values.pop().map(|reply| reply.data))
    }

    pub fn delete(&mut self, key: &[u8]) -> ClientResult<bool> {
        self.request.clear();
        text::encode_delete(&mut self.request, key);
        self.send()?;
        match self.reply_line()?.as_slice() {
            b"DELETED" => Ok(true),
            b"NOT_FOUND" => Ok(false),
            _ => Err(ClientError::BadReply),
        }
    }

    pub fn flush_all(&mut self) -> ClientResult<()> {
        self.request.clear();
        text::encode_simple(&mut self.request, "flush_all");
        self.send()?;
        match self.reply_line()?.as_slice() {
            b"OK" => Ok(()),
            _ => Err(ClientError::BadReply),
        }
    }

    pub fn stats(&mut self) -> ClientResult<Vec<(String, String)>> {
        self.request.clear();
        text::encode_simple(&mut self.request, "stats");
        self.send()?;
        text::read_stats_reply(&mut self.reader, &mut self.line)
    }

    pub fn version(&mut self) -> ClientResult<String> {
        self.request.clear();
        text::encode_simple(&mut self.request, "version");
        self.send()?;
        match self.reply_line()?.strip_prefix(b"VERSION ") {
            Some(rest) => Ok(String::from_utf8_lossy(rest).into_owned()),
            None => Err(ClientError::BadReply),
        }
    }

    fn send(&mut self) -> ClientResult<()> {
        let stream = self.reader.get_mut();
        stream.write_all(&self.request)?;
        stream.flush()?;
        Ok(())
    }

    /// Reads one reply line, surfacing error phrases as `Rejected`.
    fn reply_line(&mut self) -> ClientResult<Vec<u8>> {
        text::read_line(&mut self.reader, &mut self.line)?;
        text::reject_error_line(&self.line)?;
        Ok(self.line.clone())
    }
}
