//! Suspendable receive driver for the async read path.
//!
//! The context is an explicit state record, not a green thread: send paths
//! always run to completion on the caller's thread, so the only suspension
//! point is waiting for an inbound packet. `resume` attempts a non-blocking
//! receive when the fan-out exposes a readiness descriptor and parks in the
//! "in progress" state when the packet is not ready; the caller then
//! polls the descriptor and resumes again. Fan-outs without a descriptor
//! fall back to a blocking receive with unchanged semantics.
//!
//! `cancel` may be called from another thread while the owner is between
//! `resume` calls; the next `resume` completes promptly in the cancelled
//! state without touching the wire.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::connections::Connections;
use crate::error::Result;
use crate::packet::Packet;

pub struct ReadContext {
    cancelled: AtomicBool,
    query_sent: AtomicBool,
    suspend_when_query_sent: bool,
    in_progress: bool,
    packet: Option<Packet>,
}

impl ReadContext {
    /// `suspend_when_query_sent` is used by the async send path: the context
    /// reports a wait point to the caller as soon as the query, scalars, and
    /// external tables have all been written.
    pub fn new(suspend_when_query_sent: bool) -> Self {
        ReadContext {
            cancelled: AtomicBool::new(false),
            query_sent: AtomicBool::new(false),
            suspend_when_query_sent,
            in_progress: false,
            packet: None,
        }
    }

    /// Advances the in-flight receive as far as possible without blocking.
    /// Afterwards exactly one of these holds: a packet is ready
    /// (`take_packet`), the receive is parked (`is_in_progress`, poll the
    /// fan-out's descriptor), or the context was cancelled.
    pub fn resume(&mut self, connections: &mut Connections) -> Result<()> {
        self.packet = None;
        self.in_progress = false;

        if self.is_cancelled() {
            return Ok(());
        }

        #[cfg(unix)]
        let can_suspend = connections.readable_fd().is_some();
        #[cfg(not(unix))]
        let can_suspend = false;

        if can_suspend {
            match connections.try_receive_packet()? {
                Some(packet) => self.packet = Some(packet),
                None => self.in_progress = true,
            }
        } else {
            let packet = connections.receive_packet()?;
            if self.is_cancelled() {
                return Ok(());
            }
            self.packet = Some(packet);
        }
        Ok(())
    }

    /// True while the receive is parked waiting for inbound bytes.
    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// True once the query, scalars, and external tables are on the wire.
    pub fn is_query_sent(&self) -> bool {
        self.query_sent.load(Ordering::Acquire)
    }

    pub fn set_query_sent(&self) {
        self.query_sent.store(true, Ordering::Release);
    }

    pub fn suspends_when_query_sent(&self) -> bool {
        self.suspend_when_query_sent
    }

    pub fn take_packet(&mut self) -> Option<Packet> {
        self.packet.take()
    }

    /// Terminates the in-flight receive. Safe from any thread; the owner
    /// additionally wakes the fan-out so a blocked poller re-checks state.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}
