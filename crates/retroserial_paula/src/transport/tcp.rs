use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use super::{ByteTransport, ReadAvailability};
use crate::TransportError;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 1234;
const WRITE_BUFFER_SIZE: usize = 100;

/// Serial port exposed as a single-client TCP server.
///
/// Accepts `tcp:host:port`, `tcp://host:port` and an optional `/wait` path,
/// which blocks at open time until a client connects.
pub struct TcpTransport {
    listener: Option<TcpListener>,
    conn: Option<TcpStream>,
    /// Bytes the socket has not taken yet.
    output: Vec<u8>,
}

/// Split a `tcp:` device name into a bind address and its path.
fn parse_uri(name: &str) -> (String, String) {
    let rest = &name[name.find(':').map_or(0, |i| i + 1)..];
    let rest = rest.trim_start_matches("//");
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i + 1..]),
        None => (rest, ""),
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => (h, p.parse().unwrap_or(DEFAULT_PORT)),
        None => (authority, DEFAULT_PORT),
    };
    let host = if host.is_empty() { DEFAULT_HOST } else { host };
    (format!("{}:{}", host, port), path.to_string())
}

impl TcpTransport {
    pub fn open(name: &str) -> Result<Self, TransportError> {
        let (addr, path) = parse_uri(name);
        let listener = TcpListener::bind(&addr)
            .map_err(|e| TransportError::open_failed(name, e))?;
        listener.set_nonblocking(true)?;
        log::info!("TCP: serial port listening on {}", addr);

        let mut transport = Self {
            listener: Some(listener),
            conn: None,
            output: Vec::with_capacity(WRITE_BUFFER_SIZE),
        };
        if path.eq_ignore_ascii_case("wait") {
            while !transport.is_connected() {
                log::info!("TCP: waiting for serial connection...");
                thread::sleep(Duration::from_millis(1000));
            }
        }
        Ok(transport)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Accept a pending client if there is none yet.
    pub fn is_connected(&mut self) -> bool {
        if self.conn.is_none() {
            if let Some(listener) = &self.listener {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nonblocking(true) {
                            log::error!("TCP: could not configure connection: {}", e);
                            return false;
                        }
                        if let Err(e) = stream.set_nodelay(true) {
                            log::debug!("TCP: could not disable Nagle: {}", e);
                        }
                        log::info!("TCP: serial connection accepted from {}", peer);
                        self.conn = Some(stream);
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) => log::debug!("TCP: accept failed: {}", e),
                }
            }
        }
        self.conn.is_some()
    }

    fn disconnect(&mut self) {
        self.output.clear();
        if self.conn.take().is_some() {
            log::info!("TCP: serial disconnect");
        }
    }

    pub fn close(&mut self) {
        self.output.clear();
        self.conn = None;
        self.listener = None;
    }
}

impl ByteTransport for TcpTransport {
    /// Without a client output goes nowhere, so there is always room.
    fn write_available(&mut self, needed: usize) -> bool {
        if !self.is_connected() {
            return true;
        }
        self.drain_output();
        self.output.len() + needed <= WRITE_BUFFER_SIZE
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        if !self.is_connected() {
            return bytes.len();
        }
        let take = bytes.len().min(WRITE_BUFFER_SIZE - self.output.len());
        self.output.extend_from_slice(&bytes[..take]);
        self.drain_output();
        take
    }

    fn drain_output(&mut self) {
        if self.output.is_empty() {
            return;
        }
        let Some(conn) = self.conn.as_mut() else {
            self.output.clear();
            return;
        };
        match conn.write(&self.output) {
            Ok(n) if n > 0 => {
                self.output.drain(..n);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            _ => self.disconnect(),
        }
    }

    fn read_available(&mut self) -> ReadAvailability {
        if !self.is_connected() {
            return ReadAvailability::default();
        }
        let Some(conn) = self.conn.as_mut() else {
            return ReadAvailability::default();
        };
        let mut peeked = [0u8; 1];
        match conn.peek(&mut peeked) {
            Ok(n) if n > 0 => ReadAvailability {
                bytes: n,
                break_condition: false,
            },
            Err(e) if e.kind() == ErrorKind::WouldBlock => ReadAvailability::default(),
            _ => {
                self.disconnect();
                ReadAvailability::default()
            }
        }
    }

    fn read(&mut self, max_len: usize) -> Vec<u8> {
        if !self.is_connected() {
            return Vec::new();
        }
        let Some(conn) = self.conn.as_mut() else {
            return Vec::new();
        };
        let mut buf = vec![0u8; max_len];
        match conn.read(&mut buf) {
            Ok(n) if n > 0 => {
                buf.truncate(n);
                buf
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Vec::new(),
            _ => {
                self.disconnect();
                Vec::new()
            }
        }
    }

    fn flush(&mut self) {}

    fn is_available(&self) -> bool {
        self.listener.is_some()
    }
}
