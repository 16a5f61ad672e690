//! # Wire Encoding and Reply Parsing
//!
//! The client side of the text dialect. Requests are rendered straight into
//! a caller-owned buffer; replies are read line by line off a buffered
//! stream, with value payloads treated as opaque bytes (a payload may
//! contain CR-LF). Any framing the server should never produce comes back
//! as `BadReply` rather than being guessed at.

use std::io::{BufRead, Read};

use crate::client::{ClientError, ClientResult};

/// One `VALUE` block of a get response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueReply {
    pub key: Vec<u8>,
    pub flags: u64,
    pub data: Vec<u8>,
}

pub fn encode_set(out: &mut Vec<u8>, key: &[u8], value: &[u8], ttl_secs: u32) {
    out.extend_from_slice(b"set ");
    out.extend_from_slice(key);
    out.extend_from_slice(b" 0 ");
    push_u64(out, ttl_secs as u64);
    out.push(b' ');
    push_u64(out, value.len() as u64);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

pub fn encode_get(out: &mut Vec<u8>, key: &[u8]) {
    out.extend_from_slice(b"get ");
    out.extend_from_slice(key);
    out.extend_from_slice(b"\r\n");
}

pub fn encode_delete(out: &mut Vec<u8>, key: &[u8]) {
    out.extend_from_slice(b"delete ");
    out.extend_from_slice(key);
    out.extend_from_slice(b"\r\n");
}

pub fn encode_simple(out: &mut Vec<u8>, command: &str) {
    out.extend_from_slice(command.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Reads one CR-LF terminated line, stripping the terminator.
pub fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(ClientError::Io(std::io::ErrorKind::UnexpectedEof.into()));
    }
    match buf.as_slice() {
        [.., b'\r', b'\n'] => {
            buf.truncate(buf.len() - 2);
            Ok(())
        }
        _ => Err(ClientError::BadReply),
    }
}

/// Maps an error phrase to `Rejected`; passes other lines back.
pub fn reject_error_line(line: &[u8]) -> ClientResult<()> {
    if line == b"ERROR"
        || line.starts_with(b"CLIENT_ERROR")
        || line.starts_with(b"SERVER_ERROR")
    {
        return Err(ClientError::Rejected(
            String::from_utf8_lossy(line).into_owned(),
        ));
    }
    Ok(())
}

/// Reads the `VALUE` blocks of a get response up to the `END` line.
pub fn read_get_reply<R: BufRead>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
) -> ClientResult<Vec<ValueReply>> {
    let mut values = Vec::new();
    loop {
        read_line(reader, line_buf)?;
        if line_buf.as_slice() == b"END" {
            return Ok(values);
        }
        reject_error_line(line_buf)?;

        let mut tokens = line_buf.split(|b| *b == b' ').filter(|t| !t.is_empty());
        if tokens.next() != Some(&b"VALUE"[..]) {
            return Err(ClientError::BadReply);
        }
        let key = tokens.next().ok_or(ClientError::BadReply)?.to_vec();
        let flags = parse_u64(tokens.next().ok_or(ClientError::BadReply)?)?;
        let len = parse_u64(tokens.next().ok_or(ClientError::BadReply)?)? as usize;

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(ClientError::BadReply);
        }
        values.push(ValueReply { key, flags, data });
    }
}

/// Reads `STAT name value` lines up to the `END` line.
pub fn read_stats_reply<R: BufRead>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
) -> ClientResult<Vec<(String, String)>> {
    let mut stats = Vec::new();
    loop {
        read_line(reader, line_buf)?;
        if line_buf.as_slice() == b"END" {
            return Ok(stats);
        }
        reject_error_line(line_buf)?;

        let line = String::from_utf8_lossy(line_buf);
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("STAT") {
            return Err(ClientError::BadReply);
        }
        let name = tokens.next().ok_or(ClientError::BadReply)?.to_string();
        let value = tokens.next().ok_or(ClientError::BadReply)?.to_string();
        stats.push((name, value));
    }
}

pub fn parse_u64(digits: &[u8]) -> ClientResult<u64> {
    if digits.is_empty() {
        return Err(ClientError::BadReply);
    }
    digits.iter().try_fold(0u64, |acc, &d| {
        if !d.is_ascii_digit() {
            return Err(ClientError::BadReply);
        }
        acc.checked_mul(10)
            .and_then(|acc| acc.checked_add(u64::from(d - b'0')))
            .ok_or(ClientError::BadReply)
    })
}

/// Formats `value` into `out` by filling a stack buffer from the back.
fn push_u64(out: &mut Vec<u8>, value: u64) {
    let mut digits = [0u8; 20];
    let mut at = digits.len();
    let mut rest = value;
    loop {
        at -= 1;
        digits[at] = b'0' + (rest % 10) as u8;
        rest /= 10;
        if rest == 0 {
            break;
        }
    }
    out.extend_from_slice(&digits[at..]);
}
