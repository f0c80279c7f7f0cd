use std::{
    thread,
    time::{Duration, Instant},
};

use sockwait::{ConnectStatus, Ready, Socket};

fn listen_local() -> (Socket, u16) {
    let mut listener = Socket::new();

    listener.tcp_listen("127.0.0.1", 0).unwrap();

    let port = listener.local_addr().unwrap().port();

    (listener, port)
}

fn connect_pair() -> (Socket, Socket) {
    let (listener, port) = listen_local();

    listener.set_timeout(2_000);

    let mut client = Socket::new();
    client.set_timeout(2_000);

    assert_eq!(client.connect("127.0.0.1", port), ConnectStatus::Ok);

    let server = listener.accept().unwrap().expect("pending connection");

    (client, server)
}

#[test]
fn test_connect_loopback() {
    _ = pretty_env_logger::try_init();

    let (listener, port) = listen_local();
    listener.set_timeout(2_000);

    let mut client = Socket::new();
    client.set_timeout(2_000);

    let mut status = client.connect("127.0.0.1", port);
    assert_ne!(status, ConnectStatus::Failed);

    let started = Instant::now();

    while status == ConnectStatus::Trying && started.elapsed() < Duration::from_secs(2) {
        client.wait(Ready::WRITABLE, 50).unwrap();
        status = client.connect_check();
    }

    assert_eq!(status, ConnectStatus::Ok);

    let server = listener.accept().unwrap().expect("pending connection");

    assert_eq!(server.remote_addr().unwrap(), client.local_addr().unwrap());
    assert_eq!(server.local_addr().unwrap(), client.remote_addr().unwrap());
}

#[test]
fn test_connect_zero_timeout_returns_trying() {
    _ = pretty_env_logger::try_init();

    let (listener, port) = listen_local();
    listener.set_timeout(2_000);

    // default timeout 0: connect must hand back the in-flight attempt
    // immediately instead of waiting for the handshake
    let mut client = Socket::new();

    let started = Instant::now();
    let status = client.connect("127.0.0.1", port);

    assert!(started.elapsed() < Duration::from_millis(500));
    assert_ne!(status, ConnectStatus::Failed);

    if status == ConnectStatus::Trying {
        client.set_timeout(2_000);

        let got = client.wait(Ready::WRITABLE, 50).unwrap();
        assert!(got.is_writable());

        assert_eq!(client.connect_check(), ConnectStatus::Ok);
    }

    let server = listener.accept().unwrap().expect("pending connection");

    assert_eq!(server.remote_addr().unwrap(), client.local_addr().unwrap());
}

#[test]
fn test_connect_refused() {
    _ = pretty_env_logger::try_init();

    // grab a free port, then close the listener so nothing answers there
    let (listener, port) = listen_local();
    drop(listener);

    let mut client = Socket::new();
    client.set_timeout(2_000);

    let started = Instant::now();

    let mut status = client.connect("127.0.0.1", port);

    while status == ConnectStatus::Trying && started.elapsed() < Duration::from_secs(3) {
        thread::sleep(Duration::from_millis(10));
        status = client.connect_check();
    }

    assert_eq!(status, ConnectStatus::Failed);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test]
fn test_connect_bad_host() {
    _ = pretty_env_logger::try_init();

    let mut client = Socket::new();

    assert_eq!(client.connect("", 80), ConnectStatus::Failed);
    assert!(!client.is_open());
}

#[test]
fn test_send_recv_roundtrip() {
    _ = pretty_env_logger::try_init();

    let (client, server) = connect_pair();

    client.set_timeout(10_000);
    server.set_timeout(10_000);

    // well past typical socket buffers, forcing the partial-send loop
    let payload: Vec<u8> = (0..4 << 20).map(|i| (i % 251) as u8).collect();

    let sender = {
        let payload = payload.clone();

        thread::spawn(move || {
            assert_eq!(client.send(&payload).unwrap(), payload.len());
            client
        })
    };

    let mut buf = vec![0u8; payload.len()];
    let want = buf.len();

    assert_eq!(server.recv(&mut buf, want).unwrap(), payload.len());
    assert_eq!(buf, payload);

    sender.join().unwrap();
}

#[test]
fn test_small_roundtrip() {
    _ = pretty_env_logger::try_init();

    let (client, server) = connect_pair();

    server.set_timeout(2_000);

    assert_eq!(client.send(b"hello world").unwrap(), 11);

    let mut buf = [0u8; 32];

    assert_eq!(server.recv(&mut buf, 11).unwrap(), 11);
    assert_eq!(&buf[..11], b"hello world");
}

#[test]
fn test_zero_timeout_never_blocks() {
    _ = pretty_env_logger::try_init();

    let (client, server) = connect_pair();

    server.set_timeout(0);

    let mut buf = [0u8; 64];
    let started = Instant::now();

    // no data pending: immediate empty result, not an error
    assert_eq!(server.recv(&mut buf, 1).unwrap(), 0);
    assert!(started.elapsed() < Duration::from_millis(250));

    // nobody reads the peer side, so the send buffer eventually fills and
    // a zero-timeout send comes back short instead of waiting
    client.set_timeout(0);

    let chunk = vec![0u8; 1 << 20];
    let mut short_send = false;

    for _ in 0..64 {
        let sent = client.send(&chunk).unwrap();

        if sent < chunk.len() {
            short_send = true;
            break;
        }
    }

    assert!(short_send);
}

#[test]
fn test_recv_min_and_max_bounds() {
    _ = pretty_env_logger::try_init();

    let (client, server) = connect_pair();

    server.set_timeout(2_000);

    let sender = thread::spawn(move || {
        assert_eq!(client.send(b"hell").unwrap(), 4);

        thread::sleep(Duration::from_millis(100));

        assert_eq!(client.send(b"o...").unwrap(), 4);
        client
    });

    // min: the loop keeps gathering across the gap until 8 bytes arrived
    let mut buf = [0u8; 32];

    assert_eq!(server.recv(&mut buf, 8).unwrap(), 8);
    assert_eq!(&buf[..8], b"hello...");

    let client = sender.join().unwrap();

    // max: never reads past the buffer even with more data pending
    assert_eq!(client.send(b"0123456789abcdef").unwrap(), 16);

    let got = server.recv(&mut buf[..8], 4).unwrap();

    assert!((4..=8).contains(&got));
}

#[test]
fn test_peer_close() {
    _ = pretty_env_logger::try_init();

    let (client, server) = connect_pair();

    server.set_timeout(2_000);
    client.set_timeout(1_000);

    assert_eq!(client.send(b"bye").unwrap(), 3);
    drop(client);

    let mut buf = [0u8; 16];

    // data then close: the loop ends with what arrived, no error
    assert_eq!(server.recv(&mut buf, 16).unwrap(), 3);
    assert_eq!(&buf[..3], b"bye");

    // nothing left: now the orderly close is an error
    assert!(server.recv(&mut buf, 1).is_err());
}

#[test]
fn test_detach_attach() {
    _ = pretty_env_logger::try_init();

    let (mut client, server) = connect_pair();

    server.set_timeout(2_000);

    let raw = client.detach();
    assert!(!client.is_open());

    let mut other = Socket::new();
    other.attach(raw);
    other.set_timeout(1_000);

    assert_eq!(other.send(b"ping").unwrap(), 4);

    let mut buf = [0u8; 8];

    assert_eq!(server.recv(&mut buf, 4).unwrap(), 4);
    assert_eq!(&buf[..4], b"ping");
}

#[test]
fn test_accept_timeout() {
    _ = pretty_env_logger::try_init();

    let (listener, _port) = listen_local();

    listener.set_timeout(200);

    let started = Instant::now();

    assert!(listener.accept().unwrap().is_none());

    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_closed_socket_errors() {
    _ = pretty_env_logger::try_init();

    let sk = Socket::new();
    let mut buf = [0u8; 8];

    assert!(sk.send(b"x").is_err());
    assert!(sk.recv(&mut buf, 1).is_err());
    assert!(sk.local_addr().is_err());
    assert!(sk.remote_addr().is_err());
    assert!(sk.accept().is_err());
    assert_eq!(sk.connect_check(), ConnectStatus::Failed);
}
