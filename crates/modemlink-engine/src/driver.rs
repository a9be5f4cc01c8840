//! Tokio front end for a [`TransportEngine`].
//!
//! The engine blocks while it waits for the semaphore, so it runs on the
//! blocking pool and is fed through a channel. Each input is answered on a
//! oneshot once the engine has handled it.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::engine::TransportEngine;
use crate::error::{LinkError, Result};
use crate::traits::Message;

/// Work for the engine thread.
#[derive(Debug)]
pub enum DriverInput {
    /// A mailbox word from the peer's interrupt.
    PeerEvent(u32),
    Submit(Message),
    Flush,
    Shutdown,
}

struct Request {
    input: DriverInput,
    reply: oneshot::Sender<Result<usize>>,
}

/// Handle to an engine running on the blocking pool.
pub struct EngineDriver {
    tx: mpsc::Sender<Request>,
    task: JoinHandle<TransportEngine>,
}

impl EngineDriver {
    /// Move `engine` onto the blocking pool. At most `capacity` inputs wait
    /// in the queue. Must be called from within a tokio runtime.
    pub fn spawn(engine: TransportEngine, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::task::spawn_blocking(move || run(engine, rx));
        Self { tx, task }
    }

    async fn call(&self, input: DriverInput) -> Result<usize> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Request { input, reply })
            .await
            .map_err(|_| LinkError::Closed)?;
        response.await.map_err(|_| LinkError::Closed)?
    }

    pub async fn peer_event(&self, word: u32) -> Result<()> {
        self.call(DriverInput::PeerEvent(word)).await.map(|_| ())
    }

    pub async fn submit(&self, message: Message) -> Result<()> {
        self.call(DriverInput::Submit(message)).await.map(|_| ())
    }

    /// Returns the number of messages written.
    pub async fn flush(&self) -> Result<usize> {
        self.call(DriverInput::Flush).await
    }

    /// Stop the engine thread and hand the engine back, still open.
    pub async fn shutdown(self) -> Result<TransportEngine> {
        // The thread may already be gone; the join below reports that.
        let _ = self.call(DriverInput::Shutdown).await;
        drop(self.tx);
        self.task.await.map_err(|err| {
            tracing::error!(error = %err, "engine thread failed");
            LinkError::Closed
        })
    }
}

impl std::fmt::Debug for EngineDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineDriver")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

fn run(mut engine: TransportEngine, mut rx: mpsc::Receiver<Request>) -> TransportEngine {
    tracing::debug!(side = %engine.side(), "engine driver started");
    while let Some(Request { input, reply }) = rx.blocking_recv() {
        let result = match input {
            DriverInput::PeerEvent(word) => engine.on_peer_event(word).map(|()| 0),
            DriverInput::Submit(message) => engine.submit(message).map(|()| 0),
            DriverInput::Flush => engine.flush(),
            DriverInput::Shutdown => {
                let _ = reply.send(Ok(0));
                break;
            }
        };
        // The caller may have stopped waiting.
        let _ = reply.send(result);
    }
    tracing::debug!(side = %engine.side(), "engine driver stopped");
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::loopback::LoopbackPair;

    #[tokio::test]
    async fn submit_and_flush_through_driver() {
        let LoopbackPair {
            app,
            mut modem,
            to_modem,
            modem_sink,
            ..
        } = LoopbackPair::open(&LinkConfig::default()).unwrap();

        let driver = EngineDriver::spawn(app, 8);
        driver.submit(Message::raw(2, &b"async"[..])).await.unwrap();
        assert_eq!(driver.flush().await.unwrap(), 1);

        for word in to_modem.drain() {
            modem.on_peer_event(word).unwrap();
        }
        assert_eq!(modem_sink.messages(), vec![Message::raw(2, &b"async"[..])]);

        let app = driver.shutdown().await.unwrap();
        assert_eq!(app.poll_outbound_queue_depth(), 0);
    }

    #[tokio::test]
    async fn peer_events_reach_engine() {
        let LoopbackPair {
            app,
            mut modem,
            to_app,
            app_sink,
            ..
        } = LoopbackPair::open(&LinkConfig::default()).unwrap();
        let driver = EngineDriver::spawn(app, 8);

        modem.submit(Message::control(&b"+CREG: 1"[..])).unwrap();
        modem.flush().unwrap();
        for word in to_app.drain() {
            driver.peer_event(word).await.unwrap();
        }

        assert_eq!(app_sink.messages(), vec![Message::control(&b"+CREG: 1"[..])]);
        driver.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn engine_errors_are_returned() {
        let LoopbackPair { mut app, .. } = LoopbackPair::open(&LinkConfig::default()).unwrap();
        app.close();

        let driver = EngineDriver::spawn(app, 1);
        let err = driver.submit(Message::control(&b"AT"[..])).await.unwrap_err();
        assert!(matches!(err, LinkError::Closed));
    }
}
