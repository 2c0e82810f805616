//! Buffered-connection transport.
//!
//! One client at a time, blocking accept, buffered reader and writer.
//! Reads use a short timeout so pending responses are flushed between
//! requests even when the client goes quiet.

use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};

use log::{info, warn};

use super::{BackendKind, TransportBackend, cap_to_single_client};
use crate::channels::{PACKET_CAPACITY, TransportLink};
use crate::config::TransportConfig;

pub struct Netconn {
    config: TransportConfig,
}

impl Netconn {
    fn serve_client(&self, stream: TcpStream, link: &TransportLink) -> std::io::Result<()> {
        stream.set_read_timeout(Some(self.config.accept_timeout()))?;
        let _ = stream.set_nodelay(true);
        let mut reader = BufReader::with_capacity(PACKET_CAPACITY, stream.try_clone()?);
        let mut writer = BufWriter::with_capacity(PACKET_CAPACITY, stream);
        let mut buf = [0u8; PACKET_CAPACITY];

        loop {
            match reader.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    link.push_request(&buf[..n]);
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => return Err(e),
            }
            let mut wrote = false;
            while let Some(resp) = link.try_response() {
                writer.write_all(&resp)?;
                wrote = true;
            }
            if wrote {
                writer.flush()?;
            }
        }
    }

    fn serve_listener(&self, listener: &TcpListener, link: &TransportLink) {
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    info!("transport(netconn): client {} connected", peer);
                    if let Err(e) = self.serve_client(stream, link) {
                        warn!("transport(netconn): client {} dropped: {}", peer, e);
                    } else {
                        info!("transport(netconn): client {} closed", peer);
                    }
                    link.clear();
                }
                Err(e) => warn!("transport(netconn): accept failed: {}", e),
            }
        }
    }
}

impl TransportBackend for Netconn {
    const KIND: BackendKind = BackendKind::Netconn;

    fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    fn serve(self, link: TransportLink) -> std::io::Result<()> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.config.listen_port))?;
        info!(
            "transport(netconn): listening on :{} (single client)",
            self.config.listen_port
        );
        cap_to_single_client(Self::KIND, &self.config);
        self.serve_listener(&listener, &link);
        Ok(())
    }
}
