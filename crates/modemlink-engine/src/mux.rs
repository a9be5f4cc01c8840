//! Channel multiplexing over the three rings.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use modemlink_frame::{
    Channel, ControlByte, FragmentAssembler, FrameError, FrameReader, FrameTag, FrameWriter,
    PacketAllocator,
};
use modemlink_shm::{RegionLayout, RingBuffer, RingIndices, SharedRegion, Side};
use serde::Serialize;

use crate::error::{LinkError, Result};
use crate::traits::{Message, Route, Sink};

/// Fs-relay payloads are handed to the sink in segments of at most this size.
pub const FS_SEGMENT_SIZE: usize = 4096;

/// Traffic counters for one engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub frames_out: u64,
    pub bytes_out: u64,
    pub frames_in: u64,
    pub bytes_in: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub corrupt: u64,
    pub purged_bytes: u64,
    pub out_of_memory: u64,
    pub no_space: u64,
}

/// What one [`ChannelMux::read`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOutcome {
    pub frames: usize,
    pub delivered: usize,
    /// Segments queued on the fs-relay backlog.
    pub queued: usize,
    pub dropped: usize,
}

/// The control message currently being fragmented into the ring.
#[derive(Debug)]
struct PartialSend {
    payload: Bytes,
    offset: usize,
    id: u8,
}

impl PartialSend {
    /// Same message as before: the retry hands back the same buffer.
    fn matches(&self, payload: &Bytes) -> bool {
        self.payload.as_ptr() == payload.as_ptr() && self.payload.len() == payload.len()
    }
}

enum Inbound {
    Pending,
    Deliver(Message),
    Queue(Vec<Message>),
    Drop,
}

/// Owns every ring of a link and turns messages into frames and back.
pub struct ChannelMux {
    rings: Vec<RingBuffer>,
    writer: FrameWriter,
    reader: FrameReader,
    assembler: FragmentAssembler,
    next_id: u8,
    partial: Option<PartialSend>,
    blocked: [bool; Channel::COUNT],
    relay_backlog: VecDeque<Message>,
    min_fragment: usize,
    stats: LinkStats,
}

impl ChannelMux {
    /// Build the mux for `side`. `layout` must hold one ring per channel.
    pub fn new(
        region: Arc<dyn SharedRegion>,
        layout: &RegionLayout,
        side: Side,
        min_fragment: usize,
        max_message_size: usize,
    ) -> Self {
        let rings = layout
            .rings()
            .iter()
            .map(|ring| RingBuffer::new(Arc::clone(&region), ring, side))
            .collect();
        let scratch = layout.max_ring_size();
        Self {
            rings,
            writer: FrameWriter::new(scratch),
            reader: FrameReader::new(scratch),
            assembler: FragmentAssembler::new(max_message_size),
            next_id: 0,
            partial: None,
            blocked: [false; Channel::COUNT],
            relay_backlog: VecDeque::new(),
            min_fragment,
            stats: LinkStats::default(),
        }
    }

    pub fn ring(&self, channel: Channel) -> &RingBuffer {
        &self.rings[channel.index()]
    }

    pub fn snapshot(&self, channel: Channel) -> RingIndices {
        self.ring(channel).snapshot()
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn is_blocked(&self, channel: Channel) -> bool {
        self.blocked[channel.index()]
    }

    /// Set the backpressure flag; returns the previous value.
    pub fn set_blocked(&mut self, channel: Channel, blocked: bool) -> bool {
        std::mem::replace(&mut self.blocked[channel.index()], blocked)
    }

    pub fn relay_backlog_len(&self) -> usize {
        self.relay_backlog.len()
    }

    pub fn fragments_in_flight(&self) -> usize {
        self.assembler.in_flight()
    }

    /// A control message is partly in the ring, waiting for room.
    pub fn has_partial_send(&self) -> bool {
        self.partial.is_some()
    }

    fn next_message_id(&mut self) -> u8 {
        let id = self.next_id;
        self.next_id = (self.next_id + 1) & ControlByte::ID_MASK;
        id
    }

    /// Frame `payload` onto the channel `route` names.
    ///
    /// Returns the bytes committed to the ring. An empty payload writes
    /// nothing. A control message that does not fit is fragmented; when the
    /// ring fills mid-message `NoSpace` is returned and a later call with the
    /// same `Bytes` continues where this one stopped.
    pub fn write(&mut self, route: Route, payload: &Bytes) -> Result<usize> {
        if payload.is_empty() {
            return Ok(0);
        }
        let channel = route.channel();
        let tag = match route {
            Route::Control => return self.write_control(payload),
            Route::Raw { sub_channel } => FrameTag::Raw { sub_channel },
            Route::FsRelay => FrameTag::FsRelay,
        };
        if payload.len() > channel.max_payload() {
            return Err(LinkError::InvalidArgument(format!(
                "{} byte {channel} payload exceeds the {} byte frame limit",
                payload.len(),
                channel.max_payload()
            )));
        }
        let capacity = self.rings[channel.index()].usable_capacity();
        if payload.len() + channel.overhead() > capacity {
            return Err(LinkError::InvalidArgument(format!(
                "{} byte {channel} payload can never fit the {capacity} byte ring",
                payload.len()
            )));
        }

        match self
            .writer
            .write_frame(&mut self.rings[channel.index()], tag, payload)
        {
            Ok(written) => {
                self.stats.frames_out += 1;
                self.stats.bytes_out += written as u64;
                Ok(written)
            }
            Err(err) => {
                if matches!(err, FrameError::NoSpace { .. }) {
                    self.stats.no_space += 1;
                }
                Err(err.into())
            }
        }
    }

    fn write_control(&mut self, payload: &Bytes) -> Result<usize> {
        let (id, mut offset) = match self.partial.take() {
            Some(partial) if partial.matches(payload) => (partial.id, partial.offset),
            Some(abandoned) => {
                tracing::warn!(
                    id = abandoned.id,
                    sent = abandoned.offset,
                    len = abandoned.payload.len(),
                    "abandoning partially sent control message"
                );
                (self.next_message_id(), 0)
            }
            None => (self.next_message_id(), 0),
        };

        let channel = Channel::Control;
        let ring = &mut self.rings[channel.index()];
        let mut written = 0usize;
        loop {
            let remaining = payload.len() - offset;
            let usable = ring
                .space_available()
                .saturating_sub(channel.overhead())
                .min(channel.max_payload());
            let start = offset == 0;

            if remaining <= usable {
                let tag = FrameTag::Control(ControlByte::new(id, start, false));
                let n = self.writer.write_frame(ring, tag, &payload[offset..])?;
                self.stats.frames_out += 1;
                self.stats.bytes_out += n as u64;
                written += n;
                tracing::trace!(id, len = payload.len(), "control message complete");
                return Ok(written);
            }

            if usable < self.min_fragment {
                tracing::debug!(id, sent = offset, len = payload.len(), "control ring full");
                self.partial = Some(PartialSend {
                    payload: payload.clone(),
                    offset,
                    id,
                });
                self.stats.no_space += 1;
                return Err(LinkError::NoSpace { channel });
            }

            let tag = FrameTag::Control(ControlByte::new(id, start, true));
            let n = self
                .writer
                .write_frame(ring, tag, &payload[offset..offset + usable])?;
            self.stats.frames_out += 1;
            self.stats.bytes_out += n as u64;
            written += n;
            offset += usable;
        }
    }

    /// Write bytes that already carry framing into the control ring.
    pub fn write_preframed(&mut self, bytes: &[u8]) -> Result<usize> {
        let written = self
            .writer
            .write_preframed(&mut self.rings[Channel::Control.index()], bytes)?;
        self.stats.bytes_out += written as u64;
        Ok(written)
    }

    /// Read every pending frame of `channel`.
    ///
    /// Control messages go to the sink once complete, raw packets straight
    /// away, fs-relay segments onto the relay backlog. A corrupt frame purges
    /// the channel's inbound ring. Out-of-memory leaves the failing frame in
    /// the ring for the next attempt.
    pub fn read(
        &mut self,
        channel: Channel,
        sink: &mut dyn Sink,
        alloc: &dyn PacketAllocator,
    ) -> Result<ReadOutcome> {
        let mut outcome = ReadOutcome::default();
        let ring = &mut self.rings[channel.index()];

        loop {
            let saved_tail = ring.inbound_tail();
            let frame = match self.reader.read_frame(ring, channel) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    if err.is_corrupt() {
                        let purged = ring.purge_inbound();
                        self.stats.corrupt += 1;
                        self.stats.purged_bytes += purged as u64;
                        tracing::warn!(%channel, purged, error = %err, "corrupt frame, inbound ring purged");
                    }
                    return Err(err.into());
                }
            };
            outcome.frames += 1;
            self.stats.frames_in += 1;
            self.stats.bytes_in += frame.header.frame_len() as u64;

            let inbound = match frame.header.tag {
                FrameTag::Control(control) if control.has_more() => self
                    .assembler
                    .on_fragment(control, frame.payload, alloc)
                    .map(|()| Inbound::Pending),
                FrameTag::Control(control) => self
                    .assembler
                    .on_final(control, frame.payload, alloc)
                    .map(|payload| Inbound::Deliver(Message::control(payload))),
                FrameTag::Raw { sub_channel } => {
                    if sink.accepts(sub_channel) {
                        copy_payload(frame.payload, alloc)
                            .map(|payload| Inbound::Deliver(Message::raw(sub_channel, payload)))
                    } else {
                        tracing::warn!(sub_channel, len = frame.payload.len(), "no consumer for raw sub-channel, dropping");
                        Ok(Inbound::Drop)
                    }
                }
                FrameTag::FsRelay => fs_segments(frame.payload, alloc).map(Inbound::Queue),
            };

            match inbound {
                Ok(Inbound::Pending) => {}
                Ok(Inbound::Deliver(message)) => {
                    sink.deliver(message);
                    outcome.delivered += 1;
                    self.stats.delivered += 1;
                }
                Ok(Inbound::Queue(segments)) => {
                    outcome.queued += segments.len();
                    self.relay_backlog.extend(segments);
                }
                Ok(Inbound::Drop) => {
                    outcome.dropped += 1;
                    self.stats.dropped += 1;
                }
                Err(FrameError::OutOfMemory { requested }) => {
                    ring.rewind_inbound(saved_tail);
                    self.stats.out_of_memory += 1;
                    tracing::warn!(%channel, requested, "out of memory, frame left in ring");
                    return Err(LinkError::OutOfMemory { requested });
                }
                Err(FrameError::MessageTooLarge { size, max }) => {
                    tracing::warn!(%channel, size, max, "oversized control message dropped");
                    outcome.dropped += 1;
                    self.stats.dropped += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(outcome)
    }

    /// Hand up to `limit` queued fs-relay segments to the sink. Returns how
    /// many segments remain queued.
    pub fn pump_fs_relay(&mut self, sink: &mut dyn Sink, limit: usize) -> usize {
        for _ in 0..limit {
            let Some(segment) = self.relay_backlog.pop_front() else {
                break;
            };
            sink.deliver(segment);
            self.stats.delivered += 1;
        }
        self.relay_backlog.len()
    }

    /// Debug: move `channel`'s outbound bytes into its inbound ring.
    pub fn loopback(&mut self, channel: Channel) -> usize {
        self.rings[channel.index()].loopback()
    }

    /// Forget in-flight state: partial chains, the partial send, the relay
    /// backlog and backpressure flags. Ring contents are untouched.
    pub fn clear(&mut self) {
        self.assembler.clear();
        self.partial = None;
        self.relay_backlog.clear();
        self.blocked = [false; Channel::COUNT];
    }

    /// Empty every ring in both directions and forget in-flight state.
    pub fn reset(&mut self) {
        for ring in &mut self.rings {
            ring.reset();
        }
        self.clear();
    }
}

impl std::fmt::Debug for ChannelMux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelMux")
            .field("rings", &self.rings)
            .field("next_id", &self.next_id)
            .field("blocked", &self.blocked)
            .field("relay_backlog", &self.relay_backlog.len())
            .field("stats", &self.stats)
            .finish()
    }
}

fn copy_payload(payload: &[u8], alloc: &dyn PacketAllocator) -> modemlink_frame::Result<Bytes> {
    let mut buf = alloc.allocate(payload.len()).ok_or(FrameError::OutOfMemory {
        requested: payload.len(),
    })?;
    buf.extend_from_slice(payload);
    Ok(buf.freeze())
}

/// Split one fs-relay payload into page-sized segments. All segments are
/// allocated before any is returned.
fn fs_segments(payload: &[u8], alloc: &dyn PacketAllocator) -> modemlink_frame::Result<Vec<Message>> {
    let count = payload.len().div_ceil(FS_SEGMENT_SIZE).max(1);
    let mut segments = Vec::with_capacity(count);
    for index in 0..count {
        let start = index * FS_SEGMENT_SIZE;
        let end = (start + FS_SEGMENT_SIZE).min(payload.len());
        segments.push(Message {
            route: Route::FsRelay,
            payload: copy_payload(&payload[start..end], alloc)?,
            end_of_message: index + 1 == count,
        });
    }
    Ok(segments)
}
