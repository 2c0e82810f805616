//! Serial bridge task.
//!
//! Relays bytes between a hardware UART and one TCP client on the bridge
//! port. Only one client is served; a second connection replaces the
//! first.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: [`UartPort`] drives the ESP-IDF UART
//!   driver through `esp_idf_svc::sys`.
//! - **all other targets**: [`LoopbackPort`] echoes written bytes back.
//!
//! Frame timing on the UART side is best effort at the bridge's low
//! priority; bursts above the driver's RX buffer can be lost.

use core::time::Duration;
use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};

use log::{info, warn};

use crate::budget::TaskKind;
use crate::config::BridgeConfig;

const BUF_SIZE: usize = 256;
const UART_READ_TIMEOUT: Duration = Duration::from_millis(10);
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Byte-oriented serial device.
pub trait SerialPort: Send + 'static {
    /// Read whatever arrives within `timeout`. Zero means nothing did.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;

    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Serial ports
// ───────────────────────────────────────────────────────────────

/// ESP-IDF UART driver.
#[cfg(target_os = "espidf")]
pub struct UartPort {
    port: esp_idf_svc::sys::uart_port_t,
}

#[cfg(target_os = "espidf")]
impl UartPort {
    const RX_BUF: i32 = 1024;
    const TX_BUF: i32 = 1024;

    pub fn open(config: &BridgeConfig) -> std::io::Result<Self> {
        use esp_idf_svc::sys::*;

        let port = uart_port_t::from(config.uart_port);
        let uart_config = uart_config_t {
            baud_rate: config.baud_rate as i32,
            data_bits: uart_word_length_t_UART_DATA_8_BITS,
            parity: uart_parity_t_UART_PARITY_DISABLE,
            stop_bits: uart_stop_bits_t_UART_STOP_BITS_1,
            flow_ctrl: uart_hw_flowcontrol_t_UART_HW_FLOWCTRL_DISABLE,
            ..Default::default()
        };
        // SAFETY: called once from the bridge task before any other use of
        // this UART; the config struct outlives the call.
        let ret = unsafe {
            uart_driver_install(port, Self::RX_BUF, Self::TX_BUF, 0, core::ptr::null_mut(), 0)
        };
        if ret != ESP_OK {
            return Err(std::io::Error::other(format!("uart_driver_install: {ret}")));
        }
        let ret = unsafe { uart_param_config(port, &uart_config) };
        if ret != ESP_OK {
            return Err(std::io::Error::other(format!("uart_param_config: {ret}")));
        }
        info!("bridge: UART{} at {} baud", config.uart_port, config.baud_rate);
        Ok(Self { port })
    }
}

#[cfg(target_os = "espidf")]
impl SerialPort for UartPort {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        let ticks = esp_idf_hal::delay::TickType::from(timeout).ticks();
        // SAFETY: `buf` is valid for `buf.len()` bytes for the whole call.
        let n = unsafe {
            esp_idf_svc::sys::uart_read_bytes(
                self.port,
                buf.as_mut_ptr().cast(),
                buf.len() as u32,
                ticks,
            )
        };
        if n < 0 {
            return Err(std::io::Error::other("uart_read_bytes failed"));
        }
        Ok(n as usize)
    }

    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        // SAFETY: the driver copies `data` into its TX ring before returning.
        let n = unsafe {
            esp_idf_svc::sys::uart_write_bytes(self.port, data.as_ptr().cast(), data.len())
        };
        if n < 0 || n as usize != data.len() {
            return Err(std::io::Error::other("uart_write_bytes short write"));
        }
        Ok(())
    }
}

/// Host stand-in: everything written is read back.
#[derive(Default)]
pub struct LoopbackPort {
    pending: std::collections::VecDeque<u8>,
}

impl SerialPort for LoopbackPort {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        if self.pending.is_empty() {
            std::thread::sleep(timeout);
            return Ok(0);
        }
        let n = buf.len().min(self.pending.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.pending.extend(data);
        Ok(())
    }
}

/// The serial port this build talks to.
#[cfg(target_os = "espidf")]
pub fn open_port(config: &BridgeConfig) -> std::io::Result<UartPort> {
    UartPort::open(config)
}

#[cfg(not(target_os = "espidf"))]
pub fn open_port(config: &BridgeConfig) -> std::io::Result<LoopbackPort> {
    info!("bridge(sim): UART{} loopback", config.uart_port);
    Ok(LoopbackPort::default())
}

// ───────────────────────────────────────────────────────────────
// Bridge task
// ───────────────────────────────────────────────────────────────

pub struct SerialBridge<P: SerialPort> {
    port: P,
    client: Option<TcpStream>,
}

impl<P: SerialPort> SerialBridge<P> {
    pub fn new(port: P) -> Self {
        Self { port, client: None }
    }

    fn accept(&mut self, listener: &TcpListener) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if stream.set_nonblocking(true).is_err() {
                    warn!("bridge: cannot configure {}", peer);
                    return;
                }
                if self.client.is_some() {
                    info!("bridge: {} replaces the previous client", peer);
                } else {
                    info!("bridge: client {} connected", peer);
                }
                self.client = Some(stream);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => warn!("bridge: accept failed: {}", e),
        }
    }

    /// One relay pass in each direction. Returns whether any bytes moved.
    fn pump(&mut self, buf: &mut [u8]) -> std::io::Result<bool> {
        let mut moved = false;

        let n = self.port.read(buf, UART_READ_TIMEOUT)?;
        if n > 0 {
            moved = true;
            if let Some(client) = self.client.as_mut() {
                if let Err(e) = client.write_all(&buf[..n]) {
                    warn!("bridge: client write failed: {}", e);
                    self.client = None;
                }
            }
        }

        if let Some(client) = self.client.as_mut() {
            match client.read(buf) {
                Ok(0) => {
                    info!("bridge: client closed");
                    self.client = None;
                }
                Ok(n) => {
                    moved = true;
                    self.port.write_all(&buf[..n])?;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    warn!("bridge: client read failed: {}", e);
                    self.client = None;
                }
            }
        }
        Ok(moved)
    }

    fn serve_listener(mut self, listener: &TcpListener) -> std::io::Result<()> {
        listener.set_nonblocking(true)?;
        let mut buf = [0u8; BUF_SIZE];
        loop {
            self.accept(listener);
            if !self.pump(&mut buf)? && self.client.is_none() {
                std::thread::sleep(IDLE_POLL);
            }
        }
    }

    /// Task body. Returns only on a UART or listener failure.
    pub fn run(self, config: &BridgeConfig) {
        let result = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.port)).and_then(|l| {
            info!("bridge: listening on :{}", config.port);
            self.serve_listener(&l)
        });
        if let Err(e) = result {
            crate::status::report_fatal(TaskKind::SerialBridge, &e);
        }
    }
}
