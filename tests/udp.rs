use std::time::{Duration, Instant};

use sockwait::Socket;

fn bind_local() -> (Socket, u16) {
    let mut sk = Socket::new();

    sk.udp_bind("127.0.0.1", 0).unwrap();

    let port = sk.local_addr().unwrap().port();

    (sk, port)
}

#[test]
fn test_udp_roundtrip() {
    _ = pretty_env_logger::try_init();

    let (a, port_a) = bind_local();
    let (b, port_b) = bind_local();

    a.set_timeout(2_000);
    b.set_timeout(2_000);

    assert_eq!(a.send_to(b"ping", "127.0.0.1", port_b).unwrap(), Some(4));

    let mut buf = [0u8; 64];

    let (len, from) = b.recv_from(&mut buf).unwrap().expect("datagram");

    assert_eq!(len, 4);
    assert_eq!(&buf[..4], b"ping");
    assert_eq!(from.port(), port_a);

    // answer back through the address the datagram carried
    let host = from.ip().to_string();

    assert_eq!(b.send_to(b"pong", &host, port_a).unwrap(), Some(4));

    let (len, from) = a.recv_from(&mut buf).unwrap().expect("datagram");

    assert_eq!(len, 4);
    assert_eq!(&buf[..4], b"pong");
    assert_eq!(from.port(), port_b);
}

#[test]
fn test_udp_recv_timeout() {
    _ = pretty_env_logger::try_init();

    let (sk, _port) = bind_local();

    sk.set_timeout(200);

    let mut buf = [0u8; 64];
    let started = Instant::now();

    assert!(sk.recv_from(&mut buf).unwrap().is_none());

    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_udp_zero_timeout() {
    _ = pretty_env_logger::try_init();

    let (sk, _port) = bind_local();

    let mut buf = [0u8; 64];
    let started = Instant::now();

    assert!(sk.recv_from(&mut buf).unwrap().is_none());
    assert!(started.elapsed() < Duration::from_millis(250));
}

#[test]
fn test_udp_resolve_failure() {
    _ = pretty_env_logger::try_init();

    let (sk, _port) = bind_local();

    assert!(sk.send_to(b"x", "", 1234).is_err());
}
