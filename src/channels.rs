//! Byte pipe between the transport server and the DAP engine.
//!
//! Two bounded `embassy-sync` channels of fixed-size packets. The
//! transport pushes requests and drains responses; the engine does the
//! reverse. Neither side needs the other to exist: a full queue drops
//! the packet with a warning, an empty queue simply parks the receiver.
//!
//! ```text
//! ┌───────────────┐  requests   ┌──────────────┐
//! │  Transport    │────────────▶│  DAP engine  │
//! │  (one of N)   │◀────────────│              │
//! └───────────────┘  responses  └──────────────┘
//! ```

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

/// Largest packet carried in either direction (CMSIS-DAP v2 HS size).
pub const PACKET_CAPACITY: usize = 512;

/// Queue depth in each direction; matches the advertised packet count.
pub const PIPE_DEPTH: usize = 8;

pub type Packet = heapless::Vec<u8, PACKET_CAPACITY>;

type PacketQueue = Channel<CriticalSectionRawMutex, Packet, PIPE_DEPTH>;

/// Create the two connected endpoints.
pub fn dap_pipe() -> (TransportLink, EngineLink) {
    let requests: Arc<PacketQueue> = Arc::new(Channel::new());
    let responses: Arc<PacketQueue> = Arc::new(Channel::new());
    (
        TransportLink {
            requests: requests.clone(),
            responses: responses.clone(),
        },
        EngineLink {
            requests,
            responses,
        },
    )
}

/// Copy `data` into packets of at most [`PACKET_CAPACITY`] bytes.
pub fn packetize(data: &[u8]) -> impl Iterator<Item = Packet> + '_ {
    data.chunks(PACKET_CAPACITY).map(|chunk| {
        let mut p = Packet::new();
        // `chunks` never yields more than the capacity.
        let _ = p.extend_from_slice(chunk);
        p
    })
}

/// Transport side of the pipe.
pub struct TransportLink {
    requests: Arc<PacketQueue>,
    responses: Arc<PacketQueue>,
}

impl TransportLink {
    /// Forward received bytes to the engine. Returns `false` if any
    /// packet had to be dropped.
    pub fn push_request(&self, data: &[u8]) -> bool {
        let mut delivered = true;
        for packet in packetize(data) {
            if self.requests.try_send(packet).is_err() {
                warn!("pipe: request queue full, dropping {} bytes", data.len());
                delivered = false;
            }
        }
        delivered
    }

    /// Next response, waiting until the engine produces one.
    pub async fn next_response(&self) -> Packet {
        self.responses.receive().await
    }

    pub fn try_response(&self) -> Option<Packet> {
        self.responses.try_receive().ok()
    }

    /// Discard anything queued for a client that has gone away.
    pub fn clear(&self) {
        self.requests.clear();
        self.responses.clear();
    }
}

/// Engine side of the pipe.
pub struct EngineLink {
    requests: Arc<PacketQueue>,
    responses: Arc<PacketQueue>,
}

impl EngineLink {
    pub async fn next_request(&self) -> Packet {
        self.requests.receive().await
    }

    pub fn send_response(&self, packet: Packet) {
        if self.responses.try_send(packet).is_err() {
            warn!("pipe: response queue full, dropping response");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_reaches_engine() {
        let (transport, engine) = dap_pipe();
        assert!(transport.push_request(&[0x00, 0x01]));
        let p = futures_lite::future::block_on(engine.next_request());
        assert_eq!(p.as_slice(), &[0x00, 0x01]);
    }

    #[test]
    fn large_write_is_split() {
        let data = [0xAB_u8; PACKET_CAPACITY + 10];
        let parts: Vec<Packet> = packetize(&data).collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), PACKET_CAPACITY);
        assert_eq!(parts[1].len(), 10);
    }

    #[test]
    fn overflow_drops_without_blocking() {
        let (transport, _engine) = dap_pipe();
        for _ in 0..PIPE_DEPTH {
            assert!(transport.push_request(&[1]));
        }
        assert!(!transport.push_request(&[2]));
    }

    #[test]
    fn responses_flow_back() {
        let (transport, engine) = dap_pipe();
        assert!(transport.try_response().is_none());
        engine.send_response(packetize(&[0xFF]).next().unwrap());
        assert_eq!(transport.try_response().unwrap().as_slice(), &[0xFF]);
    }

    #[test]
    fn clear_drops_stale_traffic() {
        let (transport, engine) = dap_pipe();
        transport.push_request(&[1, 2, 3]);
        engine.send_response(packetize(&[4]).next().unwrap());
        transport.clear();
        assert!(transport.try_response().is_none());
    }
}
