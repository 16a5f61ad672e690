//! # Connection Buffers
//!
//! Each connection owns one input buffer that grows geometrically and never
//! shrinks, and a pair of equally sized output buffers. Replies append to
//! the active buffer; a flush swaps the pair before writing, so bytes
//! arriving while a write is in flight accumulate in the other buffer and
//! at most one write is outstanding per connection. Once a close begins,
//! further appends are dropped.

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Initial size of the input and output buffers.
pub const INITIAL_BUF: usize = 64 * 1024;

/// Pending output that forces a flush mid-pipeline.
pub const FLUSH_THRESHOLD: usize = 256 * 1024;

/// Minimum read room reserved before every socket read.
const READ_CHUNK: usize = 8 * 1024;

pub struct Connection {
    stream: TcpStream,
    input: BytesMut,
    out: [BytesMut; 2],
    active: usize,
    closing: bool,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Connection {
            stream,
            input: BytesMut::with_capacity(INITIAL_BUF),
            out: [
                BytesMut::with_capacity(INITIAL_BUF),
                BytesMut::with_capacity(INITIAL_BUF),
            ],
            active: 0,
            closing: false,
        }
    }

    /// Reads once into the input buffer; 0 means the peer closed.
    pub async fn fill(&mut self) -> std::io::Result<usize> {
        self.input.reserve(READ_CHUNK);
        self.stream.read_buf(&mut self.input).await
    }

    pub fn input_mut(&mut self) -> &mut BytesMut {
        &mut self.input
    }

    /// Appends reply bytes to the active output buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.closing {
            return;
        }
        self.out[self.active].extend_from_slice(bytes);
    }

    /// Appends a decimal number without allocating.
    pub fn push_decimal(&mut self, mut value: u64) {
        let mut buf = [0u8; 20];
        let mut len = 0;
        if value == 0 {
            buf[0] = b'0';
            len = 1;
        } else {
            while value > 0 {
                buf[len] = b'0' + (value % 10) as u8;
                value /= 10;
                len += 1;
            }
            buf[..len].reverse();
        }
        self.push(&buf[..len]);
    }

    /// Bytes queued in the active buffer.
    pub fn pending(&self) -> usize {
        self.out[self.active].len()
    }

    /// Swaps the buffer pair and writes the previously active one out in
    /// full. The swap happens before the write so the connection upholds the
    /// one-write-in-flight rule.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        if self.out[self.active].is_empty() {
            return Ok(());
        }
        let idx = self.active;
        self.active = 1 - self.active;
        let result = self.stream.write_all_buf(&mut self.out[idx]).await;
        if result.is_err() {
            self.closing = true;
            self.out[idx].clear();
        }
        result
    }

    /// Drops all pending output; subsequent pushes are ignored.
    pub fn begin_close(&mut self) {
        self.closing = true;
        self.out[0].clear();
        self.out[1].clear();
    }
}
