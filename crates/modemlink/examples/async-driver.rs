//! Async driver example: the application engine runs on tokio's blocking
//! pool while the modem end is driven directly.
//!
//! Run with:
//!   cargo run --example async-driver --features async

use modemlink::{EngineDriver, LinkConfig, LoopbackPair, Message};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let LoopbackPair {
        app,
        mut modem,
        to_modem,
        to_app,
        app_sink,
        modem_sink,
    } = LoopbackPair::open(&LinkConfig::default())?;
    let driver = EngineDriver::spawn(app, 16);

    driver.submit(Message::control(&b"AT+COPS?"[..])).await?;
    driver.flush().await?;
    for word in to_modem.drain() {
        modem.on_peer_event(word)?;
    }
    for message in modem_sink.take_messages() {
        eprintln!("[modem] {}", String::from_utf8_lossy(&message.payload));
    }

    modem.submit(Message::control(&b"+COPS: 0,0,\"carrier\""[..]))?;
    modem.flush()?;
    for word in to_app.drain() {
        driver.peer_event(word).await?;
    }
    for message in app_sink.take_messages() {
        eprintln!("[app] {}", String::from_utf8_lossy(&message.payload));
    }

    let app = driver.shutdown().await?;
    print!("{}", app.debug_dump());
    Ok(())
}
