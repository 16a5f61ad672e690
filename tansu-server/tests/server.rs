use std::cell::RefCell;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use tansu_client::CacheClient;
use tansu_engine::{LocalStore, StoreConfig};

/// Runs a server on an OS-assigned port inside its own single-threaded
/// runtime and returns the bound address.
fn spawn_server() -> SocketAddr {
    let (tx, rx) = std::sync::mpsc::channel();
    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let local = tokio::task::LocalSet::new();
        runtime.block_on(local.run_until(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind");
            tx.send(listener.local_addr().expect("addr")).expect("send");
            // A handful of shards keeps the per-test footprint small; the
            // semantics are identical to the 64-shard default.
            let config = StoreConfig {
                pool_bytes: 8 << 20,
                shards: 8,
                ..StoreConfig::default()
            };
            let store = Rc::new(RefCell::new(LocalStore::with_config(config)));
            let _ = tansu_server::serve(listener, store).await;
        }));
    });
    rx.recv().expect("server addr")
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    stream
}

fn expect_reply(stream: &mut TcpStream, expected: &[u8]) {
    let mut reply = vec![0u8; expected.len()];
    stream.read_exact(&mut reply).expect("read reply");
    assert_eq!(
        reply,
        expected,
        "reply was {:?}",
        String::from_utf8_lossy(&reply)
    );
}

#[test]
fn set_then_get_roundtrip() {
    let addr = spawn_server();
    let mut stream = connect(addr);

    stream.write_all(b"set foo 0 0 5\r\nhello\r\n").expect("write");
    expect_reply(&mut stream, b"STORED\r\n");

    stream.write_all(b"get foo\r\n").expect("write");
    expect_reply(&mut stream, b"VALUE foo 0 5\r\nhello\r\nEND\r\n");
}

#[test]
fn get_missing_returns_end() {
    let addr = spawn_server();
    let mut stream = connect(addr);

    stream.write_all(b"get missing\r\n").expect("write");
    expect_reply(&mut stream, b"END\r\n");
}

#[test]
fn pipelined_commands_answer_in_order() {
    let addr = spawn_server();
    let mut stream = connect(addr);

    stream
        .write_all(b"set a 0 0 3\r\nxyz\r\nset a 0 0 2\r\nqq\r\nget a\r\n")
        .expect("write");
    expect_reply(&mut stream, b"STORED\r\nSTORED\r\nVALUE a 0 2\r\nqq\r\nEND\r\n");
}

#[test]
fn long_pipeline_is_strict_fifo() {
    let addr = spawn_server();
    let mut stream = connect(addr);

    let mut batch = Vec::new();
    for i in 0..100 {
        batch.extend_from_slice(format!("set k{i} 0 0 4\r\nv{i:03}\r\n").as_bytes());
    }
    for i in 0..100 {
        batch.extend_from_slice(format!("get k{i}\r\n").as_bytes());
    }
    stream.write_all(&batch).expect("write");

    let mut expected = Vec::new();
    for _ in 0..100 {
        expected.extend_from_slice(b"STORED\r\n");
    }
    for i in 0..100 {
        expected.extend_from_slice(format!("VALUE k{i} 0 4\r\nv{i:03}\r\nEND\r\n").as_bytes());
    }
    expect_reply(&mut stream, &expected);
}

#[test]
fn multi_get_returns_keys_in_request_order() {
    let addr = spawn_server();
    let mut stream = connect(addr);

    stream
        .write_all(b"set one 0 0 1\r\n1\r\nset two 0 0 1\r\n2\r\n")
        .expect("write");
    expect_reply(&mut stream, b"STORED\r\nSTORED\r\n");

    stream.write_all(b"get two missing one\r\n").expect("write");
    expect_reply(
        &mut stream,
        b"VALUE two 0 1\r\n2\r\nVALUE one 0 1\r\n1\r\nEND\r\n",
    );
}

#[test]
fn expired_entry_is_absent() {
    let addr = spawn_server();
    let mut stream = connect(addr);

    stream.write_all(b"set k 0 1 1\r\nZ\r\n").expect("write");
    expect_reply(&mut stream, b"STORED\r\n");

    thread::sleep(Duration::from_secs(2));
    stream.write_all(b"get k\r\n").expect("write");
    expect_reply(&mut stream, b"END\r\n");
}

#[test]
fn negative_exptime_stores_already_expired() {
    let addr = spawn_server();
    let mut stream = connect(addr);

    stream.write_all(b"set k 0 -1 1\r\nZ\r\n").expect("write");
    expect_reply(&mut stream, b"STORED\r\n");

    stream.write_all(b"get k\r\n").expect("write");
    expect_reply(&mut stream, b"END\r\n");
}

#[test]
fn delete_semantics() {
    let addr = spawn_server();
    let mut stream = connect(addr);

    stream.write_all(b"delete nope\r\n").expect("write");
    expect_reply(&mut stream, b"NOT_FOUND\r\n");

    stream.write_all(b"set nope 0 0 1\r\nA\r\n").expect("write");
    expect_reply(&mut stream, b"STORED\r\n");

    stream.write_all(b"delete nope\r\n").expect("write");
    expect_reply(&mut stream, b"DELETED\r\n");

    stream.write_all(b"delete nope\r\n").expect("write");
    expect_reply(&mut stream, b"NOT_FOUND\r\n");
}

#[test]
fn oversize_byte_count_is_rejected_without_data_phase() {
    let addr = spawn_server();
    let mut stream = connect(addr);

    stream.write_all(b"set x 0 0 9999999\r\n").expect("write");
    expect_reply(&mut stream, b"CLIENT_ERROR bad data chunk\r\n");

    // The next line must be parsed as a command, not as value bytes.
    stream.write_all(b"get x\r\n").expect("write");
    expect_reply(&mut stream, b"END\r\n");
}

#[test]
fn unknown_command_and_oversize_line() {
    let addr = spawn_server();
    let mut stream = connect(addr);

    stream.write_all(b"frobnicate\r\n").expect("write");
    expect_reply(&mut stream, b"ERROR\r\n");

    let mut long = vec![b'x'; 5000];
    long.extend_from_slice(b"\r\n");
    stream.write_all(&long).expect("write");
    expect_reply(&mut stream, b"CLIENT_ERROR bad command line format\r\n");

    // The connection survives both faults.
    stream.write_all(b"set ok 0 0 2\r\nhi\r\n").expect("write");
    expect_reply(&mut stream, b"STORED\r\n");
}

#[test]
fn binary_value_with_crlf_roundtrips() {
    let addr = spawn_server();
    let mut stream = connect(addr);

    let value: Vec<u8> = (0..=255u8).collect();
    let mut request = format!("set bin 0 0 {}\r\n", value.len()).into_bytes();
    request.extend_from_slice(&value);
    request.extend_from_slice(b"\r\n");
    stream.write_all(&request).expect("write");
    expect_reply(&mut stream, b"STORED\r\n");

    stream.write_all(b"get bin\r\n").expect("write");
    let mut expected = format!("VALUE bin 0 {}\r\n", value.len()).into_bytes();
    expected.extend_from_slice(&value);
    expected.extend_from_slice(b"\r\nEND\r\n");
    expect_reply(&mut stream, &expected);
}

#[test]
fn flush_all_empties_the_store() {
    let addr = spawn_server();
    let mut stream = connect(addr);

    stream.write_all(b"set a 0 0 1\r\nA\r\n").expect("write");
    expect_reply(&mut stream, b"STORED\r\n");

    stream.write_all(b"flush_all\r\n").expect("write");
    expect_reply(&mut stream, b"OK\r\n");

    stream.write_all(b"get a\r\n").expect("write");
    expect_reply(&mut stream, b"END\r\n");
}

#[test]
fn stats_emits_compatibility_fields() {
    let addr = spawn_server();
    let mut stream = connect(addr);

    stream.write_all(b"set s 0 0 1\r\nS\r\nget s\r\nget gone\r\n").expect("write");
    expect_reply(&mut stream, b"STORED\r\nVALUE s 0 1\r\nS\r\nEND\r\nEND\r\n");

    stream.write_all(b"stats\r\n").expect("write");
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    let mut stats = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read line");
        let line = line.trim_end().to_string();
        if line == "END" {
            break;
        }
        stats.push(line);
    }

    assert!(stats.iter().any(|l| l.starts_with("STAT version ")));
    assert!(stats.contains(&"STAT curr_items 1".to_string()));
    assert!(stats.contains(&"STAT get_hits 1".to_string()));
    assert!(stats.contains(&"STAT get_misses 1".to_string()));
    assert!(stats.contains(&"STAT bloom_bits 0".to_string()));
    assert!(stats.contains(&"STAT bloom_fill_pct 0.00".to_string()));
    assert!(stats.contains(&"STAT storage_mode hash".to_string()));
    assert!(stats
        .iter()
        .any(|l| l.starts_with("STAT limit_maxbytes ")));
}

#[test]
fn quit_closes_the_connection() {
    let addr = spawn_server();
    let mut stream = connect(addr);

    stream.write_all(b"version\r\n").expect("write");
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    let mut line = String::new();
    reader.read_line(&mut line).expect("read line");
    assert!(line.starts_with("VERSION "));

    stream.write_all(b"quit\r\n").expect("write");
    let mut rest = Vec::new();
    let n = reader.read_to_end(&mut rest).expect("read eof");
    assert_eq!(n, 0, "quit must close without further output");
}

#[test]
fn client_end_to_end() {
    let addr = spawn_server();
    let client = CacheClient::connect(addr.to_string()).expect("client");

    client.set(b"alpha", b"value", 0).expect("set");
    assert_eq!(client.get(b"alpha").expect("get"), Some(b"value".to_vec()));

    assert!(client.delete(b"alpha").expect("delete"));
    assert_eq!(client.get(b"alpha").expect("get"), None);

    client.set(b"beta", b"v", 0).expect("set");
    client.flush_all().expect("flush");
    assert_eq!(client.get(b"beta").expect("get"), None);

    let stats = client.stats().expect("stats");
    assert!(stats.iter().any(|(name, value)| name == "storage_mode" && value == "hash"));
    assert!(!client.version().expect("version").is_empty());
}
