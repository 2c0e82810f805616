//! Stream-socket transport — reactor-driven multi-client bridge.
//!
//! Runs three cooperative futures on an `edge-executor` inside the
//! transport task, with `async-io-mini` timers so nothing busy-spins:
//!
//! 1. **Accept** — polls the non-blocking listener every `accept_timeout`
//! 2. **Read** — polls connected clients every 1 ms and forwards bytes
//! 3. **Write** — wakes on the response queue and writes back to the
//!    client that sent the latest request
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────┐
//!  │  transport task                                      │
//!  │  ┌─────────┐  ┌──────────┐  ┌────────────────────┐   │
//!  │  │ Accept  │  │ Read All │  │ Write (async)      │   │
//!  │  │ poll ⏱  │  │ 1ms ⏱    │  │ wake-on-response   │   │
//!  │  └─────────┘  └──────────┘  └────────────────────┘   │
//!  └──────────────────────────────────────────────────────┘
//! ```

use core::cell::RefCell;
use core::time::Duration;
use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::rc::Rc;

use log::{info, warn};

use super::{BackendKind, TransportBackend};
use crate::channels::{PACKET_CAPACITY, TransportLink};
use crate::config::TransportConfig;

/// Hard ceiling on simultaneous clients regardless of configuration.
const MAX_CLIENTS: usize = 4;

const READ_POLL: Duration = Duration::from_millis(1);

pub struct StreamSocket {
    config: TransportConfig,
}

struct Clients {
    slots: [Option<TcpStream>; MAX_CLIENTS],
    limit: usize,
    /// Slot whose request was forwarded last; responses go there.
    last_requester: Option<usize>,
}

impl Clients {
    fn new(limit: usize) -> Self {
        Self {
            slots: Default::default(),
            limit: limit.clamp(1, MAX_CLIENTS),
            last_requester: None,
        }
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots[..self.limit].iter().position(Option::is_none)
    }

    fn drop_client(&mut self, idx: usize, link: &TransportLink) {
        self.slots[idx] = None;
        if self.last_requester == Some(idx) {
            self.last_requester = None;
            link.clear();
        }
    }
}

type Shared = Rc<RefCell<Clients>>;

async fn accept_loop(listener: TcpListener, clients: Shared, period: Duration) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                let mut c = clients.borrow_mut();
                match c.free_slot() {
                    Some(idx) => {
                        if let Err(e) = stream.set_nonblocking(true) {
                            warn!("transport: cannot configure {}: {}", peer, e);
                        } else {
                            let _ = stream.set_nodelay(true);
                            info!("transport: client {} connected from {}", idx, peer);
                            c.slots[idx] = Some(stream);
                        }
                    }
                    None => warn!("transport: refusing {}, {} client(s) connected", peer, c.limit),
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => warn!("transport: accept failed: {}", e),
        }
        async_io_mini::Timer::after(period).await;
    }
}

async fn read_loop(clients: Shared, link: Rc<TransportLink>) {
    let mut buf = [0u8; PACKET_CAPACITY];
    loop {
        {
            let mut c = clients.borrow_mut();
            for idx in 0..MAX_CLIENTS {
                let Some(stream) = c.slots[idx].as_mut() else {
                    continue;
                };
                match stream.read(&mut buf) {
                    Ok(0) => {
                        info!("transport: client {} closed", idx);
                        c.drop_client(idx, &link);
                    }
                    Ok(n) => {
                        link.push_request(&buf[..n]);
                        c.last_requester = Some(idx);
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) => {
                        warn!("transport: client {} read error, disconnecting: {}", idx, e);
                        c.drop_client(idx, &link);
                    }
                }
            }
        }
        async_io_mini::Timer::after(READ_POLL).await;
    }
}

/// Write all of `data`, yielding to the executor while the socket is full.
async fn write_fully(stream: &mut TcpStream, mut data: &[u8]) -> std::io::Result<()> {
    while !data.is_empty() {
        match stream.write(data) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                async_io_mini::Timer::after(READ_POLL).await;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn write_loop(clients: Shared, link: Rc<TransportLink>) {
    loop {
        let resp = link.next_response().await;

        // Clone the stream so no RefCell borrow is held across an await.
        let target = {
            let c = clients.borrow();
            c.last_requester
                .and_then(|idx| c.slots[idx].as_ref().map(|s| (idx, s.try_clone())))
        };
        let Some((idx, stream)) = target else {
            continue;
        };
        let result = match stream {
            Ok(mut s) => write_fully(&mut s, &resp).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("transport: write to client {} failed: {}", idx, e);
            clients.borrow_mut().drop_client(idx, &link);
        }
    }
}

impl StreamSocket {
    /// Drive an already-bound listener forever.
    fn serve_listener(&self, listener: TcpListener, link: TransportLink) -> std::io::Result<()> {
        listener.set_nonblocking(true)?;

        let executor: edge_executor::LocalExecutor<'_, 8> = edge_executor::LocalExecutor::new();
        let clients: Shared = Rc::new(RefCell::new(Clients::new(usize::from(
            self.config.max_connections,
        ))));
        let link = Rc::new(link);

        executor
            .spawn(accept_loop(
                listener,
                clients.clone(),
                self.config.accept_timeout(),
            ))
            .detach();
        executor
            .spawn(read_loop(clients.clone(), link.clone()))
            .detach();
        executor.spawn(write_loop(clients, link)).detach();

        futures_lite::future::block_on(executor.run(core::future::pending::<()>()));
        Ok(())
    }
}

impl TransportBackend for StreamSocket {
    const KIND: BackendKind = BackendKind::StreamSocket;

    fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    fn serve(self, link: TransportLink) -> std::io::Result<()> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.config.listen_port))?;
        info!(
            "transport(stream-socket): listening on :{} ({} client(s) max)",
            self.config.listen_port, self.config.max_connections
        );
        self.serve_listener(listener, link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{dap_pipe, packetize};

    fn test_config() -> TransportConfig {
        TransportConfig {
            listen_port: 0,
            max_connections: 1,
            accept_timeout_ms: 5,
        }
    }

    #[test]
    fn free_slot_respects_limit() {
        let c = Clients::new(1);
        assert_eq!(c.free_slot(), Some(0));
        let c = Clients::new(99);
        assert_eq!(c.limit, MAX_CLIENTS);
    }

    #[test]
    fn relays_request_and_response() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let (transport, engine) = dap_pipe();

        std::thread::spawn(move || {
            let backend = StreamSocket::new(test_config());
            let _ = backend.serve_listener(listener, transport);
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.write_all(&[0x00, 0xFE]).unwrap();

        let request = futures_lite::future::block_on(engine.next_request());
        assert_eq!(request.as_slice(), &[0x00, 0xFE]);

        engine.send_response(packetize(&[0x00, 0x01, 0x08]).next().unwrap());
        let mut reply = [0u8; 3];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(reply, [0x00, 0x01, 0x08]);
    }
}
