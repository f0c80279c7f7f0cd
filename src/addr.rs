//! Host name resolution helpers.

use std::{
    io::{Error, ErrorKind, Result},
    net::{SocketAddr, ToSocketAddrs},
};

/// Resolve `host` and stamp `port` into the result, keeping only the first
/// candidate the resolver returns.
///
/// Fails on an empty host or when resolution yields nothing. No caching,
/// no retries.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    if host.is_empty() {
        return Err(Error::new(ErrorKind::InvalidInput, "empty host"));
    }

    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::new(ErrorKind::NotFound, "host resolved to no addresses"))
}

/// Render the numeric (never symbolic) host string and the port of an
/// address record. Works uniformly for v4 and v6.
pub fn describe(addr: &SocketAddr) -> (String, u16) {
    (addr.ip().to_string(), addr.port())
}

/// Resolve a host down to its numeric ip string, or `None` when resolution
/// fails.
pub fn resolve_ip(host: &str) -> Option<String> {
    resolve(host, 0).ok().map(|addr| addr.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_numeric_v4() {
        let addr = resolve("127.0.0.1", 8080).unwrap();

        assert_eq!(describe(&addr), ("127.0.0.1".to_string(), 8080));
    }

    #[test]
    fn resolve_numeric_v6() {
        let addr = resolve("::1", 443).unwrap();

        let (host, port) = describe(&addr);
        assert_eq!(host, "::1");
        assert_eq!(port, 443);
    }

    #[test]
    fn empty_host_fails() {
        assert!(resolve("", 80).is_err());
        assert!(resolve_ip("").is_none());
    }

    #[test]
    fn resolve_ip_strips_port() {
        assert_eq!(resolve_ip("127.0.0.1").as_deref(), Some("127.0.0.1"));
    }
}
