//! In-process wiring of two engines over one heap region.
//!
//! The hardware delivers a mailbox word to the peer's interrupt handler. Here
//! each engine's [`Notifier`] is a [`MailboxQueue`] that the other engine
//! drains in [`pump`], which keeps every engine call on one thread and never
//! re-enters an engine from inside its own call.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use modemlink_frame::{Channel, HeapAllocator};
use modemlink_shm::Side;

use crate::config::LinkConfig;
use crate::engine::TransportEngine;
use crate::error::Result;
use crate::link::SharedLink;
use crate::traits::{LinkEvent, Message, Notifier, Sink};

/// Give up pumping after this many words; two well-behaved engines settle
/// long before.
const MAX_PUMP_WORDS: usize = 100_000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Notifier that queues words for the peer instead of raising an interrupt.
#[derive(Debug, Clone, Default)]
pub struct MailboxQueue {
    words: Arc<Mutex<VecDeque<u32>>>,
    latched: Arc<Mutex<Option<u32>>>,
    registrations: Arc<AtomicUsize>,
}

impl MailboxQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue whose backend already latched `word` before the engine opened.
    pub fn with_latched(word: u32) -> Self {
        let queue = Self::default();
        *lock(&queue.latched) = Some(word);
        queue
    }

    pub fn pop(&self) -> Option<u32> {
        lock(&self.words).pop_front()
    }

    pub fn drain(&self) -> Vec<u32> {
        lock(&self.words).drain(..).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.words).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.words).is_empty()
    }

    /// Engines currently registered on this queue.
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }
}

impl Notifier for MailboxQueue {
    fn signal(&self, word: u32) {
        lock(&self.words).push_back(word);
    }

    fn register(&self) {
        self.registrations.fetch_add(1, Ordering::SeqCst);
    }

    fn unregister(&self) {
        // Saturate: unregister without register is harmless.
        let _ = self
            .registrations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn pending_word(&self) -> Option<u32> {
        lock(&self.latched).take()
    }
}

#[derive(Debug, Default)]
struct Recorded {
    messages: Vec<Message>,
    full: Vec<Channel>,
    resumed: Vec<Channel>,
    events: Vec<LinkEvent>,
}

/// Sink that records everything it is handed. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    record: Arc<Mutex<Recorded>>,
    accepted: Option<Arc<HashSet<u8>>>,
}

impl RecordingSink {
    /// Accepts every raw sub-channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts only the listed raw sub-channels.
    pub fn accepting(sub_channels: impl IntoIterator<Item = u8>) -> Self {
        Self {
            record: Arc::default(),
            accepted: Some(Arc::new(sub_channels.into_iter().collect())),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.record).messages.clone()
    }

    pub fn take_messages(&self) -> Vec<Message> {
        std::mem::take(&mut lock(&self.record).messages)
    }

    pub fn queue_full_signals(&self) -> Vec<Channel> {
        lock(&self.record).full.clone()
    }

    pub fn queue_resumed_signals(&self) -> Vec<Channel> {
        lock(&self.record).resumed.clone()
    }

    pub fn events(&self) -> Vec<LinkEvent> {
        lock(&self.record).events.clone()
    }
}

impl Sink for RecordingSink {
    fn deliver(&mut self, message: Message) {
        lock(&self.record).messages.push(message);
    }

    fn queue_full(&mut self, channel: Channel) {
        lock(&self.record).full.push(channel);
    }

    fn queue_resumed(&mut self, channel: Channel) {
        lock(&self.record).resumed.push(channel);
    }

    fn link_event(&mut self, event: LinkEvent) {
        lock(&self.record).events.push(event);
    }

    fn accepts(&self, sub_channel: u8) -> bool {
        self.accepted
            .as_ref()
            .is_none_or(|set| set.contains(&sub_channel))
    }
}

/// Deliver queued mailbox words between two engines until both queues are
/// empty. `a_outbox` holds words `a` raised for `b`, and vice versa.
///
/// Errors from either engine are logged and pumping continues; the first
/// one is returned once the queues settle. Returns the number of words
/// delivered.
pub fn pump(
    a: &mut TransportEngine,
    a_outbox: &MailboxQueue,
    b: &mut TransportEngine,
    b_outbox: &MailboxQueue,
) -> Result<usize> {
    let mut delivered = 0usize;
    let mut first_err = None;

    while delivered < MAX_PUMP_WORDS {
        let (target, word) = if let Some(word) = a_outbox.pop() {
            (&mut *b, word)
        } else if let Some(word) = b_outbox.pop() {
            (&mut *a, word)
        } else {
            break;
        };
        delivered += 1;
        if let Err(err) = target.on_peer_event(word) {
            tracing::warn!(side = %target.side(), word = %format_args!("0x{word:08x}"), error = %err, "peer event failed");
            first_err.get_or_insert(err);
        }
    }

    if delivered >= MAX_PUMP_WORDS {
        tracing::warn!(delivered, "mailbox pump did not settle");
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(delivered),
    }
}

/// An application engine and a modem engine sharing one heap region.
pub struct LoopbackPair {
    pub app: TransportEngine,
    pub modem: TransportEngine,
    /// Words the application raised for the modem.
    pub to_modem: MailboxQueue,
    /// Words the modem raised for the application.
    pub to_app: MailboxQueue,
    pub app_sink: RecordingSink,
    pub modem_sink: RecordingSink,
}

impl LoopbackPair {
    /// Open both ends. `config.side` is ignored; each end gets its own side
    /// and only the application end initializes the region.
    pub fn open(config: &LinkConfig) -> Result<Self> {
        let layout = config.layout()?;
        let link = SharedLink::in_memory(&layout);
        Self::open_with(config, link, RecordingSink::new(), RecordingSink::new())
    }

    /// Open both ends over `link` with the given sinks.
    pub fn open_with(
        config: &LinkConfig,
        link: SharedLink,
        app_sink: RecordingSink,
        modem_sink: RecordingSink,
    ) -> Result<Self> {
        let to_modem = MailboxQueue::new();
        let to_app = MailboxQueue::new();
        let alloc = Arc::new(HeapAllocator::new());

        let app_config = LinkConfig {
            side: Side::Application,
            init_region: true,
            ..config.clone()
        };
        let modem_config = LinkConfig {
            side: Side::Modem,
            init_region: false,
            ..config.clone()
        };

        let app = TransportEngine::open(
            app_config,
            link.clone(),
            Box::new(app_sink.clone()),
            Arc::new(to_modem.clone()),
            alloc.clone(),
        )?;
        let modem = TransportEngine::open(
            modem_config,
            link,
            Box::new(modem_sink.clone()),
            Arc::new(to_app.clone()),
            alloc,
        )?;

        Ok(Self {
            app,
            modem,
            to_modem,
            to_app,
            app_sink,
            modem_sink,
        })
    }

    /// Deliver mailbox words both ways until the link is idle.
    pub fn pump(&mut self) -> Result<usize> {
        pump(&mut self.app, &self.to_modem, &mut self.modem, &self.to_app)
    }
}
