//! Wireless link state stream.
//!
//! The network collaborator owns a [`LinkReporter`] and pushes every
//! transition into a bounded `embassy-sync` channel; the supervisor holds
//! the matching [`LinkWatch`] and blocks only until the first `Up`.
//!
//! ```text
//!  ┌──────────────┐  LinkState  ┌────────────┐
//!  │  link task   │────────────▶│ Supervisor │
//!  │  (wifi)      │             │ (boot)     │
//!  └──────────────┘             └────────────┘
//! ```

use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{debug, warn};

/// Wireless connectivity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Connecting,
    Up,
}

/// Transitions buffered between reporter and watcher.
const LINK_DEPTH: usize = 8;

type LinkChannel = Channel<CriticalSectionRawMutex, LinkState, LINK_DEPTH>;

/// Create a connected reporter/watch pair.
pub fn link_channel() -> (LinkReporter, LinkWatch) {
    let channel: Arc<LinkChannel> = Arc::new(Channel::new());
    (
        LinkReporter {
            channel: channel.clone(),
        },
        LinkWatch {
            channel,
            last: LinkState::Down,
        },
    )
}

/// Producer half, owned by the network collaborator.
#[derive(Clone)]
pub struct LinkReporter {
    channel: Arc<LinkChannel>,
}

impl LinkReporter {
    /// Publish a transition. Never blocks; when the watcher has stopped
    /// draining the oldest pending state is discarded.
    pub fn report(&self, state: LinkState) {
        if self.channel.try_send(state).is_err() {
            let _ = self.channel.try_receive();
            if self.channel.try_send(state).is_err() {
                warn!("link: state channel full, dropped {:?}", state);
            }
        }
    }
}

/// The link never reached `Up` in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimeout {
    pub waited: Duration,
    /// Last state observed before giving up.
    pub last: LinkState,
}

/// Consumer half, owned by the supervisor.
pub struct LinkWatch {
    channel: Arc<LinkChannel>,
    last: LinkState,
}

impl LinkWatch {
    /// The most recent state this watch has observed.
    pub fn last(&self) -> LinkState {
        self.last
    }

    /// Block until the first `Up` or until `bound` elapses.
    ///
    /// States consumed along the way update [`last`](Self::last).
    pub fn wait_for_up(&mut self, bound: Duration) -> Result<(), LinkTimeout> {
        if self.last == LinkState::Up {
            return Ok(());
        }
        let started = Instant::now();
        let channel = self.channel.clone();
        let last = &mut self.last;

        let until_up = async {
            loop {
                let state = channel.receive().await;
                debug!("link: observed {:?}", state);
                *last = state;
                if state == LinkState::Up {
                    return true;
                }
            }
        };
        let deadline = async {
            async_io_mini::Timer::after(bound).await;
            false
        };

        if futures_lite::future::block_on(futures_lite::future::or(until_up, deadline)) {
            return Ok(());
        }
        // A state may have landed between the timer firing and the race
        // resolving; drain what is already queued before giving up.
        while let Ok(state) = self.channel.try_receive() {
            self.last = state;
            if state == LinkState::Up {
                return Ok(());
            }
        }
        Err(LinkTimeout {
            waited: started.elapsed(),
            last: self.last,
        })
    }
}
