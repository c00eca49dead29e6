//! End-to-end test over a real TCP socket.

use ember_server::{Config, Server};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

fn spawn_server() -> (std::net::SocketAddr, ember_server::ShutdownHandle, std::thread::JoinHandle<()>) {
    let mut config = Config::default();
    config.listen = "127.0.0.1:0".parse().unwrap();
    config.cache.arena_size = 4 * 1024 * 1024;

    let mut server = Server::bind(config).expect("bind");
    let addr = server.local_addr();
    let shutdown = server.shutdown_handle();
    let thread = std::thread::spawn(move || {
        server.run().expect("run");
    });
    (addr, shutdown, thread)
}

fn read_exactly(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; n];
    stream.read_exact(&mut bytes).expect("read reply");
    bytes
}

#[test]
fn set_get_quit_over_tcp() {
    let (addr, shutdown, thread) = spawn_server();

    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    stream
        .write_all(b"set foo 0 0 5\r\nhello\r\nget foo\r\n")
        .unwrap();
    let expected = b"STORED\r\nVALUE foo 0 5\r\nhello\r\nEND\r\n";
    assert_eq!(read_exactly(&mut stream, expected.len()), expected);

    stream.write_all(b"version\r\n").unwrap();
    let mut reply = [0u8; 9];
    stream.read_exact(&mut reply).unwrap();
    assert_eq!(&reply[..8], b"VERSION ");

    // drain the rest of the version line
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).unwrap();
        if byte[0] == b'\n' {
            break;
        }
    }

    // quit closes the connection without a reply
    stream.write_all(b"quit\r\n").unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).expect("peer close");
    assert!(rest.is_empty());

    shutdown.shutdown();
    thread.join().unwrap();
}

#[test]
fn two_connections_share_the_cache() {
    let (addr, shutdown, thread) = spawn_server();

    let mut first = TcpStream::connect(addr).unwrap();
    first
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    first.write_all(b"set shared 0 0 4\r\ndata\r\n").unwrap();
    assert_eq!(read_exactly(&mut first, 8), b"STORED\r\n");

    let mut second = TcpStream::connect(addr).unwrap();
    second
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    second.write_all(b"get shared\r\n").unwrap();
    let expected = b"VALUE shared 0 4\r\ndata\r\nEND\r\n";
    assert_eq!(read_exactly(&mut second, expected.len()), expected);

    shutdown.shutdown();
    thread.join().unwrap();
}
