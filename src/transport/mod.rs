//! Transport server backends.
//!
//! Exactly one backend is compiled in, picked by a `transport-*` Cargo
//! feature. The supervisor only ever names [`ActiveBackend`], so a build
//! cannot hold two transports competing for the engine's byte stream.
//!
//! | Feature              | Backend                 | Socket            |
//! |----------------------|-------------------------|-------------------|
//! | `transport-socket`   | [`socket::StreamSocket`]  | non-blocking TCP  |
//! | `transport-netconn`  | [`netconn::Netconn`]      | buffered TCP      |
//! | `transport-datagram` | [`datagram::Datagram`]    | UDP               |

use core::fmt;

use crate::channels::TransportLink;
use crate::config::TransportConfig;

#[cfg(not(any(
    feature = "transport-socket",
    feature = "transport-netconn",
    feature = "transport-datagram"
)))]
compile_error!("enable exactly one transport backend: transport-socket, transport-netconn or transport-datagram");

#[cfg(any(
    all(feature = "transport-socket", feature = "transport-netconn"),
    all(feature = "transport-socket", feature = "transport-datagram"),
    all(feature = "transport-netconn", feature = "transport-datagram"),
))]
compile_error!("transport backends are mutually exclusive; enable only one transport-* feature");

#[cfg(feature = "transport-datagram")]
pub mod datagram;
#[cfg(feature = "transport-netconn")]
pub mod netconn;
#[cfg(feature = "transport-socket")]
pub mod socket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    StreamSocket,
    Netconn,
    Datagram,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamSocket => write!(f, "stream-socket"),
            Self::Netconn => write!(f, "netconn"),
            Self::Datagram => write!(f, "datagram"),
        }
    }
}

/// Task-entry contract shared by every backend.
pub trait TransportBackend: Sized + Send + 'static {
    const KIND: BackendKind;

    fn new(config: TransportConfig) -> Self;

    /// Accept clients and relay bytes through `link` for the rest of the
    /// process lifetime. Returns only if the listener cannot be set up.
    fn serve(self, link: TransportLink) -> std::io::Result<()>;
}

/// Log that a single-peer backend ignores a `max_connections` above one.
/// Returns whether the configured limit was capped.
#[cfg(any(feature = "transport-netconn", feature = "transport-datagram", test))]
fn cap_to_single_client(kind: BackendKind, config: &TransportConfig) -> bool {
    if config.max_connections <= 1 {
        return false;
    }
    log::warn!(
        "transport({}): max_connections = {} but this backend serves one client",
        kind, config.max_connections
    );
    true
}

#[cfg(feature = "transport-socket")]
pub type ActiveBackend = socket::StreamSocket;
#[cfg(feature = "transport-netconn")]
pub type ActiveBackend = netconn::Netconn;
#[cfg(feature = "transport-datagram")]
pub type ActiveBackend = datagram::Datagram;

pub const ACTIVE_KIND: BackendKind = <ActiveBackend as TransportBackend>::KIND;

/// Every backend present in this build. Always exactly one entry.
pub const COMPILED_BACKENDS: &[BackendKind] = &[
    #[cfg(feature = "transport-socket")]
    BackendKind::StreamSocket,
    #[cfg(feature = "transport-netconn")]
    BackendKind::Netconn,
    #[cfg(feature = "transport-datagram")]
    BackendKind::Datagram,
];

const _: () = assert!(COMPILED_BACKENDS.len() == 1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_client_backends_report_the_cap() {
        let mut config = TransportConfig {
            listen_port: 3240,
            max_connections: 1,
            accept_timeout_ms: 50,
        };
        assert!(!cap_to_single_client(BackendKind::Netconn, &config));
        config.max_connections = 3;
        assert!(cap_to_single_client(BackendKind::Netconn, &config));
        assert!(cap_to_single_client(BackendKind::Datagram, &config));
    }

    #[test]
    fn exactly_one_backend_is_compiled() {
        assert_eq!(COMPILED_BACKENDS.len(), 1);
        assert_eq!(COMPILED_BACKENDS[0], ACTIVE_KIND);
    }
}
