//! # Accept Loop and Dispatch
//!
//! One thread runs everything: accept, read, parse, execute, write. The
//! store is the lockless variant behind `Rc<RefCell<..>>`; every command
//! runs to completion between awaits, so no borrow ever crosses a
//! suspension point and no shard lock is taken.

use std::cell::RefCell;
use std::rc::Rc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use tansu_common::proto::{
    CLIENT_ERROR_BAD_CHUNK, CLIENT_ERROR_BAD_LINE, CRLF, DELETED, END, ERROR, NOT_FOUND, OK,
    SERVER_ERROR_OOM, STORED,
};
use tansu_common::CacheError;
use tansu_engine::{unix_now, LocalStore};

use crate::conn::{Connection, FLUSH_THRESHOLD};
use crate::protocol::{BadRequest, Request, TextParser};

/// The event loop's store handle. Single-threaded by construction.
pub type SharedStore = Rc<RefCell<LocalStore>>;

/// Sentinel expiry for a negative exptime: epoch second 1 is always in the
/// past, so the entry is stored already expired.
const ALREADY_EXPIRED: u64 = 1;

/// Accepts connections forever, spawning one local task per socket.
pub async fn serve(listener: TcpListener, store: SharedStore) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        if let Err(err) = tune_socket(&stream) {
            warn!(%peer, error = %err, "socket tuning failed");
        }
        debug!(%peer, "accepted");
        let store = Rc::clone(&store);
        tokio::task::spawn_local(async move {
            match handle_connection(stream, store).await {
                Ok(()) => debug!(%peer, "connection closed"),
                Err(err) => debug!(%peer, error = %err, "connection dropped"),
            }
        });
    }
}

/// Nagle off keeps pipelined replies prompt; the enlarged send buffer
/// absorbs multi-value GET bursts without extra wakeups.
fn tune_socket(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    socket2::SockRef::from(stream).set_send_buffer_size(1 << 20)?;
    Ok(())
}

/// Drives one connection: read, parse every complete command, flush once
/// the input is drained or the output crosses the threshold.
pub async fn handle_connection(stream: TcpStream, store: SharedStore) -> std::io::Result<()> {
    let mut conn = Connection::new(stream);
    let mut parser = TextParser::new();

    loop {
        let bytes = conn.fill().await?;
        if bytes == 0 {
            break;
        }

        while let Some(request) = parser.parse(conn.input_mut()) {
            let flow = dispatch(request, &store, &mut conn);
            if conn.pending() >= FLUSH_THRESHOLD {
                conn.flush().await?;
            }
            if matches!(flow, Flow::Quit) {
                // Pending replies go out, then the close begins: anything a
                // stale pipeline still produces is dropped, not written.
                conn.flush().await?;
                conn.begin_close();
                return Ok(());
            }
        }
        conn.flush().await?;
    }
    conn.begin_close();
    Ok(())
}

enum Flow {
    Continue,
    Quit,
}

fn dispatch(request: Request, store: &SharedStore, conn: &mut Connection) -> Flow {
    match request {
        Request::Set { key, exptime, data } => {
            let expires = expiry_for(exptime, unix_now());
            match store.borrow_mut().set_expiring(&key, &data, expires) {
                Ok(()) => conn.push(STORED),
                Err(CacheError::OutOfMemory) => conn.push(SERVER_ERROR_OOM),
                // The parser bounds key and value sizes, but the engine's
                // own validation answers like a malformed line.
                Err(_) => conn.push(CLIENT_ERROR_BAD_LINE),
            }
        }
        Request::Get { keys } => {
            let store = store.borrow();
            for key in &keys {
                if let Some(value) = store.get(key) {
                    // Header, payload and trailer compose back to back; the
                    // payload is copied once out of the shard.
                    conn.push(b"VALUE ");
                    conn.push(key);
                    conn.push(b" 0 ");
                    conn.push_decimal(value.len() as u64);
                    conn.push(CRLF);
                    conn.push(value);
                    conn.push(CRLF);
                }
            }
            conn.push(END);
        }
        Request::Delete { key } => {
            if store.borrow_mut().delete(&key) {
                conn.push(DELETED);
            } else {
                conn.push(NOT_FOUND);
            }
        }
        Request::FlushAll => {
            store.borrow_mut().flush();
            conn.push(OK);
        }
        Request::Stats => push_stats(store, conn),
        Request::Version => {
            conn.push(b"VERSION ");
            conn.push(LocalStore::version().as_bytes());
            conn.push(CRLF);
        }
        Request::Quit => return Flow::Quit,
        Request::Bad(BadRequest::Unknown) => conn.push(ERROR),
        Request::Bad(BadRequest::BadLine) => conn.push(CLIENT_ERROR_BAD_LINE),
        Request::Bad(BadRequest::BadChunk) => conn.push(CLIENT_ERROR_BAD_CHUNK),
    }
    Flow::Continue
}

fn push_stats(store: &SharedStore, conn: &mut Connection) {
    let stats = store.borrow().stats();
    push_stat(conn, "version", LocalStore::version());
    push_stat(conn, "curr_items", stats.curr_items);
    push_stat(conn, "bytes", stats.bytes);
    push_stat(conn, "limit_maxbytes", stats.limit_maxbytes);
    push_stat(conn, "get_hits", stats.get_hits);
    push_stat(conn, "get_misses", stats.get_misses);
    // Compatibility literals: older tooling parses these three even though
    // this engine has no bloom filter and exactly one storage mode.
    push_stat(conn, "bloom_bits", 0);
    push_stat(conn, "bloom_fill_pct", "0.00");
    push_stat(conn, "storage_mode", "hash");
    conn.push(END);
}

fn push_stat(conn: &mut Connection, name: &str, value: impl std::fmt::Display) {
    conn.push(format!("STAT {name} {value}\r\n").as_bytes());
}

fn expiry_for(exptime: i64, now: u64) -> u64 {
    if exptime == 0 {
        0
    } else if exptime > 0 {
        now + exptime as u64
    } else {
        ALREADY_EXPIRED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_mapping() {
        assert_eq!(expiry_for(0, 1000), 0);
        assert_eq!(expiry_for(60, 1000), 1060);
        assert_eq!(expiry_for(-1, 1000), ALREADY_EXPIRED);
    }
}
