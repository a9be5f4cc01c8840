//! Loopback pair example: an application engine and a modem engine over one
//! heap region, exchanging an AT command and its response.
//!
//! Run with:
//!   cargo run --example loopback-pair

use modemlink::{LinkConfig, LoopbackPair, Message};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut pair = LoopbackPair::open(&LinkConfig::default())?;

    pair.app.submit(Message::control(&b"AT+CSQ"[..]))?;
    pair.app.flush()?;
    pair.pump()?;

    for message in pair.modem_sink.take_messages() {
        eprintln!(
            "[modem] {} {}",
            message.route,
            String::from_utf8_lossy(&message.payload)
        );
        pair.modem.submit(Message::control(&b"+CSQ: 23,99"[..]))?;
    }
    // A burst of data packets on sub-channel 1.
    for i in 0..4u8 {
        pair.modem.submit(Message::raw(1, vec![i; 1200]))?;
    }
    pair.modem.flush()?;
    pair.pump()?;

    for message in pair.app_sink.take_messages() {
        eprintln!("[app] {} {} bytes", message.route, message.payload.len());
    }

    print!("{}", pair.app.debug_dump());
    Ok(())
}
