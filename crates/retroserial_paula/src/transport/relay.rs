use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use crate::TransportError;

const RELAY_PORT: u16 = 1234;
const RELAY_MAGIC: &[u8; 4] = b"UAE_";
const RELAY_HELLO: &[u8; 10] = b"UAE_HELLO\0";
const RECEIVE_RING: usize = 256;

/// Serial words relayed between emulators over UDP.
///
/// `ENET:H[:port]` hosts a relay and learns its peer from the first
/// datagram; `ENET:host[:port]` connects to one. Every datagram carries one
/// 16-bit serial word so the 9-bit stop information survives the trip.
pub struct RelayTransport {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    received: VecDeque<u16>,
}

impl RelayTransport {
    pub fn open(name: &str) -> Result<Self, TransportError> {
        let target = name.get(5..).unwrap_or("");
        let host_mode = target
            .get(..1)
            .is_some_and(|c| c.eq_ignore_ascii_case("h"));

        let (socket, peer) = if host_mode {
            let port = target
                .get(1..)
                .and_then(|p| p.strip_prefix(':'))
                .and_then(|p| p.parse().ok())
                .unwrap_or(RELAY_PORT);
            let socket = UdpSocket::bind(("0.0.0.0", port))
                .map_err(|e| TransportError::open_failed(name, e))?;
            log::info!("ENET_SERVER: relay hosted on port {}", port);
            (socket, None)
        } else {
            let target = if target.is_empty() {
                format!("127.0.0.1:{}", RELAY_PORT)
            } else if target.contains(':') {
                target.to_string()
            } else {
                format!("{}:{}", target, RELAY_PORT)
            };
            let peer = target
                .to_socket_addrs()
                .map_err(|e| TransportError::open_failed(name, e))?
                .next()
                .ok_or_else(|| TransportError::open_failed(name, "no address"))?;
            let socket = UdpSocket::bind(("0.0.0.0", 0))
                .map_err(|e| TransportError::open_failed(name, e))?;
            socket.send_to(RELAY_HELLO, peer)?;
            log::info!("ENET_CLIENT: connected to {}", peer);
            (socket, Some(peer))
        };
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            peer,
            received: VecDeque::with_capacity(RECEIVE_RING),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    /// Drain pending datagrams into the receive ring.
    fn service(&mut self) {
        let mut buf = [0u8; 16];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    if self.peer.is_none() {
                        log::info!("ENET_SERVER: connect from {}", from);
                        self.peer = Some(from);
                    }
                    if len == 6 && &buf[..4] == RELAY_MAGIC {
                        if self.received.len() + 1 < RECEIVE_RING {
                            self.received
                                .push_back(u16::from_be_bytes([buf[4], buf[5]]));
                        } else {
                            log::debug!("ENET: receive ring full, word dropped");
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::error!("ENET: receive failed: {}", e);
                    break;
                }
            }
        }
    }

    pub fn read_available(&mut self) -> bool {
        self.service();
        !self.received.is_empty()
    }

    pub fn read_word(&mut self) -> Option<u16> {
        self.received.pop_front()
    }

    pub fn send_word(&mut self, word: u16) {
        let Some(peer) = self.peer else {
            return;
        };
        let mut packet = [0u8; 6];
        packet[..4].copy_from_slice(RELAY_MAGIC);
        packet[4..].copy_from_slice(&word.to_be_bytes());
        if let Err(e) = self.socket.send_to(&packet, peer) {
            log::error!("ENET: send failed: {}", e);
        }
    }
}
