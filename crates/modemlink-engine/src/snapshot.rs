use std::fmt;

use modemlink_frame::Channel;
use modemlink_shm::{RingIndices, Side};
use serde::Serialize;

use crate::engine::EngineState;

/// One ring's indices at dump time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RingSnapshot {
    pub index: usize,
    pub name: &'static str,
    pub size: usize,
    pub in_head: usize,
    pub in_tail: usize,
    pub in_pending: usize,
    pub out_head: usize,
    pub out_tail: usize,
    pub out_pending: usize,
}

impl RingSnapshot {
    pub fn new(channel: Channel, indices: RingIndices) -> Self {
        Self {
            index: channel.index(),
            name: channel.name(),
            size: indices.size,
            in_head: indices.in_head,
            in_tail: indices.in_tail,
            in_pending: indices.in_pending(),
            out_head: indices.out_head,
            out_tail: indices.out_tail,
            out_pending: indices.out_pending(),
        }
    }
}

/// Engine state for diagnostics. `Display` renders the stable text form:
///
/// ```text
/// modemlink side=application state=open
/// 0 control size=8192
///     in  head=0 tail=0 pending=0
///     out head=12 tail=0 pending=12
/// ...
/// fragments in-flight=0 relay-backlog=0 outbound-queue=0
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugSnapshot {
    pub side: Side,
    pub state: EngineState,
    pub rings: Vec<RingSnapshot>,
    pub fragments_in_flight: usize,
    pub relay_backlog: usize,
    pub outbound_queue: usize,
}

impl fmt::Display for DebugSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "modemlink side={} state={}", self.side, self.state)?;
        for ring in &self.rings {
            writeln!(f, "{} {} size={}", ring.index, ring.name, ring.size)?;
            writeln!(
                f,
                "    in  head={} tail={} pending={}",
                ring.in_head, ring.in_tail, ring.in_pending
            )?;
            writeln!(
                f,
                "    out head={} tail={} pending={}",
                ring.out_head, ring.out_tail, ring.out_pending
            )?;
        }
        writeln!(
            f,
            "fragments in-flight={} relay-backlog={} outbound-queue={}",
            self.fragments_in_flight, self.relay_backlog, self.outbound_queue
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_format_is_stable() {
        let snapshot = DebugSnapshot {
            side: Side::Modem,
            state: EngineState::Open,
            rings: vec![RingSnapshot::new(
                Channel::RawData,
                RingIndices {
                    size: 64,
                    out_head: 10,
                    out_tail: 4,
                    in_head: 2,
                    in_tail: 60,
                },
            )],
            fragments_in_flight: 1,
            relay_backlog: 2,
            outbound_queue: 3,
        };

        assert_eq!(
            snapshot.to_string(),
            "modemlink side=modem state=open\n\
             1 raw size=64\n    in  head=2 tail=60 pending=6\n    out head=10 tail=4 pending=6\n\
             fragments in-flight=1 relay-backlog=2 outbound-queue=3\n"
        );
    }

    #[test]
    fn serializes_to_json() {
        let snapshot = DebugSnapshot {
            side: Side::Application,
            state: EngineState::Closed,
            rings: Vec::new(),
            fragments_in_flight: 0,
            relay_backlog: 0,
            outbound_queue: 0,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["side"], "application");
        assert_eq!(json["state"], "closed");
    }
}
