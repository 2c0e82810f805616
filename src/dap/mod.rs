//! Debug-protocol engine task.
//!
//! Pulls request packets off the pipe, hands each to a [`DapHandler`]
//! and queues whatever it answers. The handler owns the probe hardware;
//! the engine only owns the loop.
//!
//! The bundled [`ProbeInfoHandler`] answers `DAP_Info` so host tooling
//! can identify the probe, and rejects every other command with
//! `DAP_ERROR`. Boards with a SWD/JTAG driver plug in their own handler.

use log::{debug, info};

use crate::channels::{EngineLink, PACKET_CAPACITY, PIPE_DEPTH, Packet};

/// Reply status byte for a rejected command.
pub const DAP_ERROR: u8 = 0xFF;

const CMD_INFO: u8 = 0x00;
const CMD_HOST_STATUS: u8 = 0x01;

const INFO_VENDOR: u8 = 0x01;
const INFO_PRODUCT: u8 = 0x02;
const INFO_SERIAL: u8 = 0x03;
const INFO_PROTOCOL_VERSION: u8 = 0x04;
const INFO_FIRMWARE_VERSION: u8 = 0x09;
const INFO_CAPABILITIES: u8 = 0xF0;
const INFO_PACKET_COUNT: u8 = 0xFE;
const INFO_PACKET_SIZE: u8 = 0xFF;

/// SWD supported, JTAG not.
const CAPABILITY_SWD: u8 = 0x01;

/// Executes one protocol command.
pub trait DapHandler: Send + 'static {
    /// Fill `response` for `request`. An empty response sends nothing.
    fn execute(&mut self, request: &[u8], response: &mut Packet);
}

/// Identification-only handler.
pub struct ProbeInfoHandler {
    serial: heapless::String<16>,
}

impl ProbeInfoHandler {
    pub fn new(serial: &str) -> Self {
        let mut s = heapless::String::new();
        for ch in serial.chars() {
            if s.push(ch).is_err() {
                break;
            }
        }
        info!("DAP: probe setup complete (serial {})", s);
        Self { serial: s }
    }

    fn push_string(response: &mut Packet, value: &str) {
        let bytes = value.as_bytes();
        // Length byte counts the trailing NUL.
        let _ = response.push(bytes.len() as u8 + 1);
        let _ = response.extend_from_slice(bytes);
        let _ = response.push(0);
    }

    fn info(&self, id: u8, response: &mut Packet) {
        let _ = response.push(CMD_INFO);
        match id {
            INFO_VENDOR => Self::push_string(response, "DapBridge"),
            INFO_PRODUCT => Self::push_string(response, "Wireless CMSIS-DAP"),
            INFO_SERIAL => Self::push_string(response, &self.serial),
            INFO_PROTOCOL_VERSION => Self::push_string(response, "2.1.0"),
            INFO_FIRMWARE_VERSION => Self::push_string(response, env!("CARGO_PKG_VERSION")),
            INFO_CAPABILITIES => {
                let _ = response.extend_from_slice(&[1, CAPABILITY_SWD]);
            }
            INFO_PACKET_COUNT => {
                let _ = response.extend_from_slice(&[1, PIPE_DEPTH as u8]);
            }
            INFO_PACKET_SIZE => {
                let size = (PACKET_CAPACITY as u16).to_le_bytes();
                let _ = response.extend_from_slice(&[2, size[0], size[1]]);
            }
            _ => {
                let _ = response.push(0);
            }
        }
    }
}

impl DapHandler for ProbeInfoHandler {
    fn execute(&mut self, request: &[u8], response: &mut Packet) {
        match request {
            [CMD_INFO, id, ..] => self.info(*id, response),
            [CMD_HOST_STATUS, ..] => {
                let _ = response.extend_from_slice(&[CMD_HOST_STATUS, 0x00]);
            }
            [cmd, ..] => {
                debug!("DAP: unsupported command 0x{:02X}", cmd);
                let _ = response.extend_from_slice(&[*cmd, DAP_ERROR]);
            }
            [] => {}
        }
    }
}

/// The engine task body.
pub struct DapEngine<H: DapHandler> {
    handler: H,
    link: EngineLink,
}

impl<H: DapHandler> DapEngine<H> {
    pub fn new(handler: H, link: EngineLink) -> Self {
        Self { handler, link }
    }

    /// Handle one request. Split out so tests can step the engine.
    pub async fn step(&mut self) {
        let request = self.link.next_request().await;
        let mut response = Packet::new();
        self.handler.execute(&request, &mut response);
        if !response.is_empty() {
            self.link.send_response(response);
        }
    }

    /// Serve requests for the rest of the process lifetime.
    pub fn run(mut self) {
        info!("DAP: engine running");
        futures_lite::future::block_on(async {
            loop {
                self.step().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::dap_pipe;

    fn exec(request: &[u8]) -> Packet {
        let mut h = ProbeInfoHandler::new("DB-0001");
        let mut resp = Packet::new();
        h.execute(request, &mut resp);
        resp
    }

    #[test]
    fn info_vendor_is_nul_terminated() {
        let r = exec(&[CMD_INFO, INFO_VENDOR]);
        assert_eq!(r[0], CMD_INFO);
        assert_eq!(r[1] as usize, "DapBridge".len() + 1);
        assert_eq!(*r.last().unwrap(), 0);
    }

    #[test]
    fn info_packet_size_is_little_endian() {
        let r = exec(&[CMD_INFO, INFO_PACKET_SIZE]);
        assert_eq!(r.as_slice(), &[CMD_INFO, 2, 0x00, 0x02]);
    }

    #[test]
    fn unknown_info_id_returns_zero_length() {
        assert_eq!(exec(&[CMD_INFO, 0x42]).as_slice(), &[CMD_INFO, 0]);
    }

    #[test]
    fn unsupported_command_is_rejected() {
        assert_eq!(exec(&[0x05, 0x00]).as_slice(), &[0x05, DAP_ERROR]);
    }

    #[test]
    fn empty_request_sends_nothing() {
        assert!(exec(&[]).is_empty());
    }

    #[test]
    fn engine_step_round_trip() {
        let (transport, engine_link) = dap_pipe();
        let mut engine = DapEngine::new(ProbeInfoHandler::new("x"), engine_link);
        transport.push_request(&[CMD_HOST_STATUS, 0, 1]);
        futures_lite::future::block_on(engine.step());
        assert_eq!(
            transport.try_response().unwrap().as_slice(),
            &[CMD_HOST_STATUS, 0x00]
        );
    }
}
