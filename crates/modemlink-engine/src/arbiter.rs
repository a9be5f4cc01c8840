//! Ownership of the hardware semaphore guarding the shared region.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use modemlink_shm::Side;
use serde::Serialize;

use crate::error::{LinkError, Result};
use crate::mailbox::{encode_command, Opcode};
use crate::traits::Notifier;

/// The hardware semaphore. At most one side holds it at a time.
pub trait Semaphore: Send + Sync {
    /// Take the semaphore for `side`. Succeeds if it is free or already
    /// held by `side`.
    fn try_take(&self, side: Side) -> bool;

    /// Give the semaphore back. Returns false if `side` did not hold it.
    fn give(&self, side: Side) -> bool;

    fn holder(&self) -> Option<Side>;
}

/// Process-local semaphore shared by clones.
#[derive(Debug, Clone, Default)]
pub struct MemorySemaphore {
    holder: Arc<Mutex<Option<Side>>>,
}

impl MemorySemaphore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Side>> {
        self.holder.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Semaphore for MemorySemaphore {
    fn try_take(&self, side: Side) -> bool {
        let mut holder = self.lock();
        match *holder {
            None => {
                *holder = Some(side);
                true
            }
            Some(current) => current == side,
        }
    }

    fn give(&self, side: Side) -> bool {
        let mut holder = self.lock();
        if *holder == Some(side) {
            *holder = None;
            true
        } else {
            false
        }
    }

    fn holder(&self) -> Option<Side> {
        *self.lock()
    }
}

/// Outcome of a peer's `REQ_SEM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRequest {
    /// We were not holding it; answer with `RES_SEM` now.
    Granted,
    /// We hold it; `RES_SEM` goes out on the next release.
    Deferred,
}

/// Authority counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArbiterStats {
    pub acquisitions: u64,
    pub releases: u64,
    pub timeouts: u64,
    pub peer_grants: u64,
    pub deferred_grants: u64,
    /// Worst time spent in `acquire`, in microseconds.
    pub max_latency_us: u64,
}

/// One side's view of the semaphore: whether it holds it and whether the
/// peer is waiting for it.
pub struct Arbiter {
    side: Side,
    semaphore: Arc<dyn Semaphore>,
    poll_interval: Duration,
    held: bool,
    peer_waiting: bool,
    stats: ArbiterStats,
}

impl Arbiter {
    pub fn new(side: Side, semaphore: Arc<dyn Semaphore>, poll_interval: Duration) -> Self {
        Self {
            side,
            semaphore,
            poll_interval,
            held: false,
            peer_waiting: false,
            stats: ArbiterStats::default(),
        }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// A peer `REQ_SEM` is waiting for our next release.
    pub fn peer_waiting(&self) -> bool {
        self.peer_waiting
    }

    pub fn stats(&self) -> ArbiterStats {
        self.stats
    }

    fn record(&mut self, started: Instant) {
        self.held = true;
        self.stats.acquisitions += 1;
        let latency = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.stats.max_latency_us = self.stats.max_latency_us.max(latency);
    }

    /// Take the semaphore if it is free right now.
    pub fn try_acquire(&mut self) -> bool {
        if self.held {
            return true;
        }
        let started = Instant::now();
        if self.semaphore.try_take(self.side) {
            self.record(started);
            true
        } else {
            false
        }
    }

    /// Take the semaphore, asking the peer for it once and polling until
    /// `timeout` elapses.
    pub fn acquire(&mut self, notifier: &dyn Notifier, timeout: Duration) -> Result<()> {
        if self.held {
            return Ok(());
        }
        let started = Instant::now();
        if self.semaphore.try_take(self.side) {
            self.record(started);
            return Ok(());
        }

        tracing::trace!(side = %self.side, "semaphore busy, requesting");
        notifier.signal(encode_command(Opcode::ReqSem, 0));
        let deadline = started + timeout;
        loop {
            if Instant::now() >= deadline {
                self.stats.timeouts += 1;
                tracing::warn!(side = %self.side, ?timeout, "authority timeout");
                return Err(LinkError::AuthorityTimeout(timeout));
            }
            std::thread::sleep(self.poll_interval);
            if self.semaphore.try_take(self.side) {
                self.record(started);
                return Ok(());
            }
        }
    }

    /// Give the semaphore back.
    ///
    /// Returns true when a waiting peer request should be answered with
    /// `RES_SEM` now. With `defer_grant` the request stays recorded for the
    /// following release.
    pub fn release(&mut self, defer_grant: bool) -> bool {
        if !self.held {
            return false;
        }
        self.semaphore.give(self.side);
        self.held = false;
        self.stats.releases += 1;

        if self.peer_waiting && !defer_grant {
            self.peer_waiting = false;
            self.stats.deferred_grants += 1;
            return true;
        }
        false
    }

    /// Handle the peer's `REQ_SEM`.
    pub fn on_peer_request(&mut self) -> PeerRequest {
        if self.held {
            self.peer_waiting = true;
            tracing::debug!(side = %self.side, "semaphore in use, deferring grant");
            PeerRequest::Deferred
        } else {
            self.stats.peer_grants += 1;
            PeerRequest::Granted
        }
    }
}

impl std::fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbiter")
            .field("side", &self.side)
            .field("held", &self.held)
            .field("peer_waiting", &self.peer_waiting)
            .field("stats", &self.stats)
            .finish()
    }
}
