//! The per-link state machine.

use std::collections::VecDeque;
use std::sync::Arc;

use modemlink_frame::{Channel, PacketAllocator};
use modemlink_shm::{RegionLayout, Side};
use serde::Serialize;

use crate::arbiter::{Arbiter, ArbiterStats, PeerRequest};
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::link::SharedLink;
use crate::mailbox::{encode_command, encode_data, Command, DataFlags, MailboxWord, Opcode};
use crate::mux::{ChannelMux, LinkStats};
use crate::snapshot::{DebugSnapshot, RingSnapshot};
use crate::traits::{LinkEvent, Message, Notifier, Sink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Open,
    Closed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EngineState::Open => "open",
            EngineState::Closed => "closed",
        })
    }
}

/// Counters reported by [`TransportEngine::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub arbiter: ArbiterStats,
    pub link: LinkStats,
}

/// One end of the link.
///
/// Every operation takes `&mut self`: an engine is driven by exactly one
/// caller at a time, whether that is an interrupt loop, the async driver or
/// a test pumping two engines by hand. Mailbox words from the peer come in
/// through [`on_peer_event`](Self::on_peer_event); words for the peer go out
/// through the [`Notifier`].
pub struct TransportEngine {
    config: LinkConfig,
    state: EngineState,
    layout: RegionLayout,
    link: SharedLink,
    mux: ChannelMux,
    arbiter: Arbiter,
    sink: Box<dyn Sink>,
    notifier: Arc<dyn Notifier>,
    alloc: Arc<dyn PacketAllocator>,
    outbound: VecDeque<Message>,
}

impl TransportEngine {
    /// Attach to `link` and start accepting events.
    ///
    /// With `config.init_region` the ring indices are zeroed and the magic
    /// written; otherwise the magic must already be present. A mailbox word
    /// the notifier latched before open is processed before returning.
    pub fn open(
        config: LinkConfig,
        link: SharedLink,
        sink: Box<dyn Sink>,
        notifier: Arc<dyn Notifier>,
        alloc: Arc<dyn PacketAllocator>,
    ) -> Result<Self> {
        config.validate()?;
        let layout = config.layout()?;
        let region = link.region.as_ref();
        if config.init_region {
            layout.initialize(region)?;
        } else {
            layout.check_magic(region)?;
        }

        let mux = ChannelMux::new(
            Arc::clone(&link.region),
            &layout,
            config.side,
            config.min_fragment,
            config.max_message_size,
        );
        let arbiter = Arbiter::new(config.side, Arc::clone(&link.semaphore), config.poll_interval());
        notifier.register();

        let mut engine = Self {
            config,
            state: EngineState::Open,
            layout,
            link,
            mux,
            arbiter,
            sink,
            notifier,
            alloc,
            outbound: VecDeque::new(),
        };
        tracing::info!(
            side = %engine.config.side,
            region_len = engine.layout.total_len(),
            "link opened"
        );

        if let Some(word) = engine.notifier.pending_word() {
            tracing::debug!(word = %format_args!("0x{word:08x}"), "processing latched mailbox word");
            if let Err(err) = engine.on_peer_event(word) {
                tracing::warn!(error = %err, "latched mailbox word failed");
            }
        }
        Ok(engine)
    }

    pub fn side(&self) -> Side {
        self.config.side
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    pub fn link(&self) -> &SharedLink {
        &self.link
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            arbiter: self.arbiter.stats(),
            link: self.mux.stats(),
        }
    }

    /// Messages submitted but not yet written to a ring.
    pub fn poll_outbound_queue_depth(&self) -> usize {
        self.outbound.len()
    }

    /// Fs-relay segments read but not yet delivered.
    pub fn relay_backlog_len(&self) -> usize {
        self.mux.relay_backlog_len()
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            EngineState::Open => Ok(()),
            EngineState::Closed => Err(LinkError::Closed),
        }
    }

    fn acquire_authority(&mut self) -> Result<()> {
        self.arbiter
            .acquire(self.notifier.as_ref(), self.config.authority_timeout())
    }

    fn release_authority(&mut self, defer_grant: bool) {
        if self.arbiter.release(defer_grant) {
            self.notifier.signal(encode_command(Opcode::ResSem, 0));
        }
    }

    /// Queue `message` for the next [`flush`](Self::flush).
    pub fn submit(&mut self, message: Message) -> Result<()> {
        self.ensure_open()?;
        self.outbound.push_back(message);
        Ok(())
    }

    /// Write the internal outbound queue. See [`write_batch`](Self::write_batch).
    pub fn flush(&mut self) -> Result<usize> {
        let mut queue = std::mem::take(&mut self.outbound);
        let result = self.write_batch(&mut queue);
        self.outbound = queue;
        result
    }

    /// Write as much of `queue` as fits, in one authority window.
    ///
    /// Messages leave the queue once fully written. When a channel's ring
    /// fills, that channel's remaining messages stay queued in their original
    /// order, the sink gets `queue_full`, and the peer is asked to
    /// acknowledge when it drains the ring. Other channels keep going. One
    /// data word announcing every channel with unread bytes goes out after
    /// the semaphore is released. Returns the number of messages written.
    pub fn write_batch(&mut self, queue: &mut VecDeque<Message>) -> Result<usize> {
        self.ensure_open()?;
        if queue.is_empty() {
            return Ok(0);
        }
        self.acquire_authority()?;

        let mut flags = DataFlags::empty();
        let mut full = [false; Channel::COUNT];
        let mut retained = VecDeque::new();
        let mut sent = 0usize;

        while let Some(message) = queue.pop_front() {
            let channel = message.route.channel();
            if full[channel.index()] {
                retained.push_back(message);
                continue;
            }
            match self.mux.write(message.route, &message.payload) {
                Ok(_) => {
                    sent += 1;
                    if self.mux.set_blocked(channel, false) {
                        self.sink.queue_resumed(channel);
                    }
                }
                Err(LinkError::NoSpace { .. }) => {
                    full[channel.index()] = true;
                    flags |= DataFlags::req_ack(channel);
                    retained.push_back(message);
                    if !self.mux.set_blocked(channel, true) {
                        tracing::debug!(%channel, "ring full, backpressure on");
                        self.sink.queue_full(channel);
                    }
                }
                Err(err) => {
                    tracing::warn!(route = %message.route, len = message.payload.len(), error = %err, "dropping unsendable message");
                }
            }
        }
        *queue = retained;

        for channel in Channel::ALL {
            if self.mux.ring(channel).outbound_pending() > 0 {
                flags |= DataFlags::send(channel);
            }
        }
        self.release_authority(false);
        if !flags.is_empty() {
            self.notifier.signal(encode_data(flags));
        }
        tracing::trace!(sent, queued = queue.len(), "batch written");
        Ok(sent)
    }

    /// Handle one mailbox word from the peer.
    pub fn on_peer_event(&mut self, word: u32) -> Result<()> {
        self.ensure_open()?;
        match MailboxWord::decode(word) {
            MailboxWord::Invalid(raw) => {
                tracing::warn!(word = %format_args!("0x{raw:08x}"), "ignoring mailbox word without valid bit");
                Ok(())
            }
            MailboxWord::Command(command) => {
                self.check_missed_interrupt()?;
                self.handle_command(command, word);
                Ok(())
            }
            MailboxWord::Data(flags) => self.on_data(flags),
        }
    }

    /// Look for inbound bytes whose data word never arrived.
    fn check_missed_interrupt(&mut self) -> Result<()> {
        if !self.arbiter.try_acquire() {
            return Ok(());
        }
        let mut pending = DataFlags::empty();
        for channel in Channel::ALL {
            if self.mux.ring(channel).bytes_pending() > 0 {
                pending |= DataFlags::send(channel);
            }
        }
        self.release_authority(false);

        if pending.is_empty() {
            return Ok(());
        }
        tracing::debug!(?pending, "inbound data without a data event");
        self.on_data(pending)
    }

    fn handle_command(&mut self, command: Command, word: u32) {
        match command.opcode {
            Opcode::ReqSem => match self.arbiter.on_peer_request() {
                PeerRequest::Granted => self.notifier.signal(encode_command(Opcode::ResSem, 0)),
                PeerRequest::Deferred => {}
            },
            Opcode::ResSem => {}
            Opcode::PhoneStart => {
                let flags = self.config.boot_mode.bits() | self.config.host_os.bits();
                tracing::info!(flags = %format_args!("0x{flags:04x}"), "peer started, sending INIT_END");
                self.notifier.signal(encode_command(Opcode::InitEnd, flags));
                self.sink.link_event(LinkEvent::PeerStarted);
            }
            Opcode::InitEnd => {
                tracing::info!(flags = %format_args!("0x{:04x}", command.flags), "peer initialization complete");
                self.sink.link_event(LinkEvent::InitEnd {
                    flags: command.flags,
                });
            }
            Opcode::Reset => {
                tracing::info!(word = %format_args!("0x{word:08x}"), "peer requested reset");
                self.sink.link_event(LinkEvent::Reset { word });
            }
            Opcode::ErrDisplay => {
                tracing::warn!(word = %format_args!("0x{word:08x}"), "peer reported an error");
                self.sink.link_event(LinkEvent::PeerError { word });
            }
            other => {
                tracing::debug!(opcode = other.name(), code = other.code(), "command ignored");
            }
        }
    }

    /// Resume our own blocked channels, then read every channel with pending
    /// bytes and acknowledge what the peer asked to have acknowledged.
    fn on_data(&mut self, flags: DataFlags) -> Result<()> {
        let mut first_err = None;

        // The peer sends each RES_ACK once, so it is honored even when the
        // read below cannot get authority.
        let mut resumed = false;
        for channel in Channel::ALL {
            if flags.contains(DataFlags::res_ack(channel)) {
                resumed = true;
                if self.mux.set_blocked(channel, false) {
                    tracing::debug!(%channel, "peer drained ring, backpressure off");
                    self.sink.queue_resumed(channel);
                }
            }
        }

        if flags.wants_read() {
            match self.acquire_authority() {
                Ok(()) => self.read_channels(flags, &mut first_err),
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }

        self.pump_relay();

        if resumed && !self.outbound.is_empty() {
            if let Err(err) = self.flush() {
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Read pending channels while holding authority, then release it and
    /// send one RES_ACK word for every REQ_ACK bit in `flags`.
    fn read_channels(&mut self, flags: DataFlags, first_err: &mut Option<LinkError>) {
        let mut acks = DataFlags::empty();
        for channel in Channel::ALL {
            if self.mux.ring(channel).bytes_pending() > 0 {
                match self.mux.read(channel, self.sink.as_mut(), self.alloc.as_ref()) {
                    Ok(outcome) => tracing::trace!(%channel, ?outcome, "channel read"),
                    Err(err) => {
                        tracing::warn!(%channel, error = %err, "channel read failed");
                        first_err.get_or_insert(err);
                    }
                }
            }
            // Acknowledge even when an earlier event already drained the
            // ring; the peer stays blocked until it sees the ack.
            if flags.contains(DataFlags::req_ack(channel)) {
                acks |= DataFlags::res_ack(channel);
            }
        }
        self.release_authority(false);
        if !acks.is_empty() {
            self.notifier.signal(encode_data(acks));
        }
    }

    /// Deliver up to `fs_relay_burst` queued fs-relay segments. Returns the
    /// number still queued.
    pub fn pump_relay(&mut self) -> usize {
        self.mux
            .pump_fs_relay(self.sink.as_mut(), self.config.fs_relay_burst)
    }

    /// Write already-framed bytes into the control ring and tell the peer.
    pub fn write_preframed(&mut self, bytes: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if bytes.is_empty() {
            return Ok(0);
        }
        self.acquire_authority()?;
        let result = self.mux.write_preframed(bytes);
        self.release_authority(false);
        let written = result?;
        self.notifier.signal(encode_data(DataFlags::SEND_CONTROL));
        Ok(written)
    }

    /// Debug: feed `channel`'s unread outbound bytes back into its inbound
    /// ring and process them as if the peer had sent them.
    pub fn loopback(&mut self, channel: Channel) -> Result<usize> {
        self.ensure_open()?;
        self.acquire_authority()?;
        let moved = self.mux.loopback(channel);
        // The local read below takes the semaphore again; any peer grant
        // goes out after that.
        self.release_authority(true);
        if moved > 0 {
            self.on_data(DataFlags::send(channel))?;
        }
        Ok(moved)
    }

    pub fn debug_dump(&self) -> DebugSnapshot {
        DebugSnapshot {
            side: self.config.side,
            state: self.state,
            rings: Channel::ALL
                .iter()
                .map(|&ch| RingSnapshot::new(ch, self.mux.snapshot(ch)))
                .collect(),
            fragments_in_flight: self.mux.fragments_in_flight(),
            relay_backlog: self.mux.relay_backlog_len(),
            outbound_queue: self.outbound.len(),
        }
    }

    /// Empty every ring and drop queued and partial messages, e.g. after the
    /// peer sent `RESET`. The engine stays open.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.acquire_authority()?;
        self.mux.reset();
        self.release_authority(false);
        let dropped = self.outbound.len();
        self.outbound.clear();
        tracing::info!(side = %self.config.side, dropped, "link reset");
        Ok(())
    }

    /// Detach from the link. Queued and partial messages are dropped.
    pub fn close(&mut self) {
        if self.state == EngineState::Closed {
            return;
        }
        self.notifier.unregister();
        if self.arbiter.is_held() {
            self.release_authority(false);
        }
        let dropped = self.outbound.len();
        self.outbound.clear();
        self.mux.clear();
        self.state = EngineState::Closed;
        tracing::info!(side = %self.config.side, dropped, "link closed");
    }
}

impl Drop for TransportEngine {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TransportEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportEngine")
            .field("side", &self.config.side)
            .field("state", &self.state)
            .field("outbound", &self.outbound.len())
            .field("mux", &self.mux)
            .field("arbiter", &self.arbiter)
            .finish()
    }
}
