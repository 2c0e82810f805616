//! Datagram transport.
//!
//! Binds a UDP socket on the transport port and relays each datagram as
//! one request packet. Responses go to the peer that sent the latest
//! datagram. Retransmission and ordering belong to the client-side
//! reliable layer; this side is a plain relay.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use log::{info, warn};

use super::{BackendKind, TransportBackend, cap_to_single_client};
use crate::channels::{PACKET_CAPACITY, TransportLink};
use crate::config::TransportConfig;

pub struct Datagram {
    config: TransportConfig,
}

impl Datagram {
    fn serve_socket(&self, socket: &UdpSocket, link: &TransportLink) -> std::io::Result<()> {
        socket.set_read_timeout(Some(self.config.accept_timeout()))?;
        let mut buf = [0u8; PACKET_CAPACITY];
        let mut peer: Option<SocketAddr> = None;

        loop {
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    if peer != Some(from) {
                        info!("transport(datagram): peer is now {}", from);
                        link.clear();
                        peer = Some(from);
                    }
                    link.push_request(&buf[..n]);
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => warn!("transport(datagram): recv failed: {}", e),
            }
            if let Some(to) = peer {
                while let Some(resp) = link.try_response() {
                    if let Err(e) = socket.send_to(&resp, to) {
                        warn!("transport(datagram): send to {} failed: {}", to, e);
                    }
                }
            }
        }
    }
}

impl TransportBackend for Datagram {
    const KIND: BackendKind = BackendKind::Datagram;

    fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    fn serve(self, link: TransportLink) -> std::io::Result<()> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.config.listen_port))?;
        info!("transport(datagram): bound :{}", self.config.listen_port);
        cap_to_single_client(Self::KIND, &self.config);
        self.serve_socket(&socket, &link)
    }
}
