//! # Text Protocol Parser
//!
//! Purpose: Decode one memcached-text command at a time out of a byte
//! stream, tracking the pending data phase of a `set`.
//!
//! ## Design Principles
//! 1. **Incremental**: `parse` consumes exactly the bytes it decoded and
//!    returns `None` when the buffer holds no complete request yet.
//! 2. **Fail Per Command**: A malformed line produces a `Bad` request the
//!    dispatcher answers; the connection stays open and parsing continues.
//! 3. **Lenient Payload Framing**: The two bytes after a `set` payload are
//!    consumed but not validated, matching the reference behavior.

use bytes::{Buf, BytesMut};
use memchr::memchr;

use tansu_common::proto::{MAX_KEY_LEN, MAX_LINE_LEN, MAX_VALUE_LEN};

/// One decoded request, or a per-command protocol violation.
#[derive(Debug, PartialEq, Eq)]
pub enum Request {
    Set {
        key: Vec<u8>,
        /// Raw exptime token: seconds from now if positive, never if zero,
        /// already expired if negative.
        exptime: i64,
        data: Vec<u8>,
    },
    Get {
        keys: Vec<Vec<u8>>,
    },
    Delete {
        key: Vec<u8>,
    },
    FlushAll,
    Stats,
    Version,
    Quit,
    Bad(BadRequest),
}

/// Violations the dispatcher answers without closing the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadRequest {
    /// Command word not recognized.
    Unknown,
    /// Oversize or malformed command line.
    BadLine,
    /// `set` byte count outside `[0, MAX_VALUE_LEN]`.
    BadChunk,
}

enum State {
    Ready,
    /// A `set` line was accepted; waiting for `need` bytes of payload plus
    /// terminator.
    Data {
        key: Vec<u8>,
        exptime: i64,
        need: usize,
    },
    /// Swallowing the remainder of an oversize line.
    SkipLine,
}

pub struct TextParser {
    state: State,
}

impl Default for TextParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TextParser {
    pub fn new() -> Self {
        TextParser {
            state: State::Ready,
        }
    }

    /// Decodes at most one request from the front of `buf`. Returns `None`
    /// when more input is needed; call again after the next read.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Option<Request> {
        loop {
            match std::mem::replace(&mut self.state, State::Ready) {
                State::Ready => {
                    let pos = match memchr(b'\n', buf) {
                        Some(pos) => pos,
                        None => {
                            if buf.len() > MAX_LINE_LEN {
                                buf.clear();
                                self.state = State::SkipLine;
                            }
                            return None;
                        }
                    };
                    if pos > MAX_LINE_LEN {
                        buf.advance(pos + 1);
                        return Some(Request::Bad(BadRequest::BadLine));
                    }
                    let line = buf.split_to(pos + 1);
                    let mut line = &line[..pos];
                    if line.last() == Some(&b'\r') {
                        line = &line[..line.len() - 1];
                    }
                    if let Some(request) = self.decode(line) {
                        return Some(request);
                    }
                    // A set entered its data phase; the payload may already
                    // be buffered, so fall through and try to finish it.
                }
                State::Data { key, exptime, need } => {
                    if buf.len() < need {
                        self.state = State::Data { key, exptime, need };
                        return None;
                    }
                    let mut data = buf.split_to(need);
                    // The trailing two bytes frame the payload and are not
                    // validated.
                    data.truncate(need - 2);
                    return Some(Request::Set {
                        key,
                        exptime,
                        data: data.to_vec(),
                    });
                }
                State::SkipLine => match memchr(b'\n', buf) {
                    Some(pos) => {
                        buf.advance(pos + 1);
                        return Some(Request::Bad(BadRequest::BadLine));
                    }
                    None => {
                        buf.clear();
                        self.state = State::SkipLine;
                        return None;
                    }
                },
            }
        }
    }

    fn decode(&mut self, line: &[u8]) -> Option<Request> {
        let mut tokens = line.split(|b| *b == b' ').filter(|t| !t.is_empty());
        let Some(command) = tokens.next() else {
            return Some(Request::Bad(BadRequest::Unknown));
        };
        match command {
            b"set" => self.decode_set(tokens),
            b"get" => {
                let keys: Vec<Vec<u8>> = tokens.map(|t| t.to_vec()).collect();
                if keys.is_empty() || keys.iter().any(|k| k.len() > MAX_KEY_LEN) {
                    return Some(Request::Bad(BadRequest::BadLine));
                }
                Some(Request::Get { keys })
            }
            b"delete" => match (tokens.next(), tokens.next()) {
                (Some(key), None) if !key.is_empty() && key.len() <= MAX_KEY_LEN => {
                    Some(Request::Delete { key: key.to_vec() })
                }
                _ => Some(Request::Bad(BadRequest::BadLine)),
            },
            b"flush_all" => Some(no_args(tokens, Request::FlushAll)),
            b"stats" => Some(no_args(tokens, Request::Stats)),
            b"version" => Some(no_args(tokens, Request::Version)),
            b"quit" => Some(no_args(tokens, Request::Quit)),
            _ => Some(Request::Bad(BadRequest::Unknown)),
        }
    }

    /// `set <key> <flags> <exptime> <bytes>`. Flags are validated as a
    /// number and then dropped; GET always echoes 0.
    fn decode_set<'a>(&mut self, mut tokens: impl Iterator<Item = &'a [u8]>) -> Option<Request> {
        let (Some(key), Some(flags), Some(exptime), Some(bytes), None) = (
            tokens.next(),
            tokens.next(),
            tokens.next(),
            tokens.next(),
            tokens.next(),
        ) else {
            return Some(Request::Bad(BadRequest::BadLine));
        };
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Some(Request::Bad(BadRequest::BadLine));
        }
        if parse_u64(flags).is_none() {
            return Some(Request::Bad(BadRequest::BadLine));
        }
        let Some(exptime) = parse_i64(exptime) else {
            return Some(Request::Bad(BadRequest::BadLine));
        };
        let Some(bytes) = parse_i64(bytes) else {
            return Some(Request::Bad(BadRequest::BadLine));
        };
        if bytes < 0 || bytes as usize > MAX_VALUE_LEN {
            // The data phase is not entered; whatever follows is parsed as
            // commands.
            return Some(Request::Bad(BadRequest::BadChunk));
        }
        self.state = State::Data {
            key: key.to_vec(),
            exptime,
            need: bytes as usize + 2,
        };
        None
    }
}

fn no_args<'a>(mut tokens: impl Iterator<Item = &'a [u8]>, request: Request) -> Request {
    if tokens.next().is_some() {
        Request::Bad(BadRequest::BadLine)
    } else {
        request
    }
}

fn parse_u64(data: &[u8]) -> Option<u64> {
    if data.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for &b in data {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as u64);
    }
    Some(value)
}

fn parse_i64(data: &[u8]) -> Option<i64> {
    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, data),
    };
    let value = parse_u64(digits)?;
    let value = i64::try_from(value).unwrap_or(i64::MAX);
    Some(if negative { -value } else { value })
}
