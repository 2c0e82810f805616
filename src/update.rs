//! Firmware update listener, backed by the `esp-ota` crate.
//!
//! Session framing, one image per connection:
//!
//! ```text
//!   client → u32 LE image length, then exactly that many image bytes
//!   device → "OK\n" after the image is committed, or "ERR <reason>\n"
//! ```
//!
//! At most `max_sessions` connections are open at once, a session idle
//! for longer than `idle_timeout` is closed, and only one session at a
//! time owns the flash writer. A committed image is activated by a
//! reboot.

use core::fmt;
use core::time::Duration;
use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use log::{info, warn};

use crate::budget::TaskKind;
use crate::config::UpdateConfig;

const MAX_IMAGE_SIZE: u32 = 4 * 1024 * 1024; // 4 MB
const CHUNK_SIZE: usize = 1024;
const SESSION_STACK: usize = 6 * 1024;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    /// Another session owns the flash writer, or the session limit is hit.
    Busy,
    InvalidSize,
    BeginFailed,
    WriteFailed,
    VerifyFailed,
    BootSetFailed,
    IdleTimeout,
    /// The client closed before sending the whole image.
    Truncated,
    NotReceiving,
    Overflow,
}

impl UpdateError {
    /// Short token sent back to the client after `ERR`.
    fn token(self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::InvalidSize => "size",
            Self::BeginFailed => "begin",
            Self::WriteFailed => "write",
            Self::VerifyFailed => "verify",
            Self::BootSetFailed => "boot",
            Self::IdleTimeout => "timeout",
            Self::Truncated => "truncated",
            Self::NotReceiving => "state",
            Self::Overflow => "overflow",
        }
    }
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "update writer busy"),
            Self::InvalidSize => write!(f, "image size out of range (max 4 MB)"),
            Self::BeginFailed => write!(f, "OTA begin failed"),
            Self::WriteFailed => write!(f, "OTA write failed"),
            Self::VerifyFailed => write!(f, "OTA verification failed"),
            Self::BootSetFailed => write!(f, "set boot partition failed"),
            Self::IdleTimeout => write!(f, "session idle timeout"),
            Self::Truncated => write!(f, "connection closed mid-image"),
            Self::NotReceiving => write!(f, "no image in progress"),
            Self::Overflow => write!(f, "write exceeds declared image size"),
        }
    }
}

// ── Flash writer ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Idle,
    Receiving { expected: u32, written: u32 },
    ReadyToReboot,
}

/// Writes one image into the inactive partition.
///
/// On ESP-IDF targets this drives `esp-ota`; elsewhere the image is kept
/// in memory so the session logic can be exercised on the host.
pub struct UpdateSink {
    state: SinkState,
    #[cfg(target_os = "espidf")]
    ota_update: Option<esp_ota::OtaUpdate>,
    #[cfg(not(target_os = "espidf"))]
    staged: Vec<u8>,
    #[cfg(not(target_os = "espidf"))]
    committed: Option<Vec<u8>>,
}

impl UpdateSink {
    pub fn new() -> Self {
        Self {
            state: SinkState::Idle,
            #[cfg(target_os = "espidf")]
            ota_update: None,
            #[cfg(not(target_os = "espidf"))]
            staged: Vec::new(),
            #[cfg(not(target_os = "espidf"))]
            committed: None,
        }
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn begin(&mut self, image_len: u32) -> Result<(), UpdateError> {
        if image_len == 0 || image_len > MAX_IMAGE_SIZE {
            return Err(UpdateError::InvalidSize);
        }

        #[cfg(target_os = "espidf")]
        {
            let update = esp_ota::OtaUpdate::begin().map_err(|e| {
                warn!("esp-ota begin failed: {:?}", e);
                UpdateError::BeginFailed
            })?;
            self.ota_update = Some(update);
        }
        #[cfg(not(target_os = "espidf"))]
        self.staged.clear();

        self.state = SinkState::Receiving {
            expected: image_len,
            written: 0,
        };
        info!("update: begin ({} bytes)", image_len);
        Ok(())
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), UpdateError> {
        let SinkState::Receiving { expected, written } = self.state else {
            return Err(UpdateError::NotReceiving);
        };
        if written as usize + data.len() > expected as usize {
            return Err(UpdateError::Overflow);
        }

        #[cfg(target_os = "espidf")]
        {
            let Some(update) = self.ota_update.as_mut() else {
                return Err(UpdateError::NotReceiving);
            };
            if let Err(e) = update.write(data) {
                warn!("esp-ota write failed: {:?}", e);
                self.abort();
                return Err(UpdateError::WriteFailed);
            }
        }
        #[cfg(not(target_os = "espidf"))]
        self.staged.extend_from_slice(data);

        self.state = SinkState::Receiving {
            expected,
            written: written + data.len() as u32,
        };
        Ok(())
    }

    /// Verify the image and make it the next boot partition.
    pub fn finalize(&mut self) -> Result<(), UpdateError> {
        match self.state {
            SinkState::Receiving { expected, written } if expected == written => {}
            SinkState::Receiving { .. } => return Err(UpdateError::Truncated),
            _ => return Err(UpdateError::NotReceiving),
        }

        #[cfg(target_os = "espidf")]
        {
            let Some(update) = self.ota_update.take() else {
                self.state = SinkState::Idle;
                return Err(UpdateError::NotReceiving);
            };
            let mut completed = update.finalize().map_err(|e| {
                warn!("esp-ota finalize failed: {:?}", e);
                self.state = SinkState::Idle;
                UpdateError::VerifyFailed
            })?;
            completed.set_as_boot_partition().map_err(|e| {
                warn!("esp-ota set_as_boot_partition failed: {:?}", e);
                self.state = SinkState::Idle;
                UpdateError::BootSetFailed
            })?;
        }
        #[cfg(not(target_os = "espidf"))]
        {
            self.committed = Some(core::mem::take(&mut self.staged));
        }

        self.state = SinkState::ReadyToReboot;
        info!("update: finalized, ready to reboot");
        Ok(())
    }

    /// Drop any partial image and return to idle.
    pub fn abort(&mut self) {
        #[cfg(target_os = "espidf")]
        {
            // esp-ota aborts when OtaUpdate is dropped
            self.ota_update.take();
        }
        #[cfg(not(target_os = "espidf"))]
        self.staged.clear();
        if self.state != SinkState::Idle {
            warn!("update: aborted");
        }
        self.state = SinkState::Idle;
    }

    /// The last image committed in simulation.
    #[cfg(not(target_os = "espidf"))]
    pub fn committed(&self) -> Option<&[u8]> {
        self.committed.as_deref()
    }

    /// Soft-reset into the newly flashed firmware.
    #[cfg(target_os = "espidf")]
    pub fn reboot(&self) {
        info!("update: rebooting into new firmware");
        esp_ota::restart();
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn reboot(&mut self) {
        info!("update(sim): reboot skipped");
        self.state = SinkState::Idle;
    }
}

impl Default for UpdateSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Confirm the running image so the bootloader cancels a pending rollback.
#[cfg(target_os = "espidf")]
pub fn mark_running_image_valid() {
    match esp_ota::mark_app_valid() {
        Ok(()) => info!("update: running image marked valid"),
        Err(e) => warn!("update: mark_app_valid failed: {:?}", e),
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn mark_running_image_valid() {
    info!("update(sim): rollback check skipped");
}

// ── Listener task ─────────────────────────────────────────────

/// Decrements the open-session count when a session ends.
struct SessionSlot(Arc<AtomicUsize>);

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn hex(digest: &[u8; 32]) -> heapless::String<64> {
    use core::fmt::Write as _;
    let mut s = heapless::String::new();
    for b in digest {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn map_read_err(e: &std::io::Error) -> UpdateError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => UpdateError::IdleTimeout,
        _ => UpdateError::Truncated,
    }
}

pub struct UpdateListener {
    config: UpdateConfig,
    idle: Duration,
    sink: Arc<Mutex<UpdateSink>>,
    active: Arc<AtomicUsize>,
}

impl UpdateListener {
    pub fn new(config: UpdateConfig) -> Self {
        Self {
            idle: config.idle_timeout(),
            config,
            sink: Arc::new(Mutex::new(UpdateSink::new())),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Receive one image over `stream` into `sink`. Returns the digest.
    fn receive(stream: &mut TcpStream, sink: &mut UpdateSink) -> Result<[u8; 32], UpdateError> {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).map_err(|e| map_read_err(&e))?;
        let image_len = u32::from_le_bytes(len);

        sink.begin(image_len)?;
        let mut hash = hmac_sha256::Hash::new();
        let mut remaining = image_len as usize;
        let mut buf = [0u8; CHUNK_SIZE];
        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE);
            let n = match stream.read(&mut buf[..want]) {
                Ok(0) => return Err(UpdateError::Truncated),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_read_err(&e)),
            };
            hash.update(&buf[..n]);
            sink.write(&buf[..n])?;
            remaining -= n;
        }
        sink.finalize()?;
        Ok(hash.finalize())
    }

    fn session(mut stream: TcpStream, sink: &Mutex<UpdateSink>, idle: Duration) {
        let peer = stream
            .peer_addr()
            .map_or_else(|_| "?".into(), |a| a.to_string());
        if let Err(e) = stream.set_read_timeout(Some(idle)) {
            warn!("update: cannot configure {}: {}", peer, e);
            return;
        }

        let mut guard = match sink.try_lock() {
            Ok(g) => g,
            Err(TryLockError::WouldBlock) => {
                info!("update: {} rejected, writer busy", peer);
                let _ = writeln!(stream, "ERR {}", UpdateError::Busy.token());
                return;
            }
            // A panicked session leaves no partial state worth keeping.
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
        };

        info!("update: session from {}", peer);
        match Self::receive(&mut stream, &mut guard) {
            Ok(digest) => {
                info!("update: image sha256 {}", hex(&digest));
                let _ = stream.write_all(b"OK\n");
                let _ = stream.flush();
                guard.reboot();
            }
            Err(e) => {
                warn!("update: session from {} failed: {}", peer, e);
                guard.abort();
                let _ = writeln!(stream, "ERR {}", e.token());
            }
        }
    }

    fn serve_listener(&self, listener: &TcpListener) {
        let limit = usize::from(self.config.max_sessions);
        for incoming in listener.incoming() {
            let mut stream = match incoming {
                Ok(s) => s,
                Err(e) => {
                    warn!("update: accept failed: {}", e);
                    continue;
                }
            };
            if self.active.load(Ordering::Acquire) >= limit {
                info!("update: session limit ({}) reached", limit);
                let _ = writeln!(stream, "ERR {}", UpdateError::Busy.token());
                continue;
            }
            self.active.fetch_add(1, Ordering::AcqRel);
            let slot = SessionSlot(self.active.clone());
            let sink = self.sink.clone();
            let idle = self.idle;
            let spawned = std::thread::Builder::new()
                .name("ota_session".into())
                .stack_size(SESSION_STACK)
                .spawn(move || {
                    let _slot = slot;
                    Self::session(stream, &sink, idle);
                });
            if let Err(e) = spawned {
                warn!("update: cannot start session: {}", e);
            }
        }
    }

    /// Task body. Returns only if the listener cannot be bound.
    pub fn run(self) {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.config.port)) {
            Ok(listener) => {
                info!(
                    "update: listening on :{} ({} session(s), idle {} s)",
                    self.config.port, self.config.max_sessions, self.config.idle_timeout_secs
                );
                self.serve_listener(&listener);
            }
            Err(e) => crate::status::report_fatal(TaskKind::UpdateListener, &e),
        }
    }
}
