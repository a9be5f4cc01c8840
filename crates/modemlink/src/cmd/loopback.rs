use modemlink::engine::{pump, EngineStats, MailboxQueue};
use modemlink::{DebugSnapshot, LinkConfig, LoopbackPair, Message, Route, Side, TransportEngine};
use serde::Serialize;

use crate::cmd::LoopbackArgs;
use crate::exit::{link_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{payload_preview, print_json, table, OutputFormat};

/// Flush and pump rounds before the link is declared stuck.
const MAX_ROUNDS: usize = 64;

#[derive(Serialize)]
struct Delivery {
    route: Route,
    size: usize,
    end_of_message: bool,
    preview: String,
}

#[derive(Serialize)]
struct LoopbackOutput {
    sender: Side,
    rounds: usize,
    sent: usize,
    verified: bool,
    delivered: Vec<Delivery>,
    sender_dump: DebugSnapshot,
    receiver_dump: DebugSnapshot,
    sender_stats: EngineStats,
    receiver_stats: EngineStats,
}

pub fn run(args: LoopbackArgs, format: OutputFormat, config: LinkConfig) -> CliResult<i32> {
    let outgoing = build_messages(&args)?;
    let LoopbackPair {
        mut app,
        mut modem,
        to_modem,
        to_app,
        app_sink,
        modem_sink,
    } = LoopbackPair::open(&config).map_err(|err| link_error("open loopback pair", err))?;

    let (sender, sender_outbox, receiver, receiver_outbox, receiver_sink) = if args.from_modem {
        (&mut modem, &to_app, &mut app, &to_modem, &app_sink)
    } else {
        (&mut app, &to_modem, &mut modem, &to_app, &modem_sink)
    };

    for message in &outgoing {
        sender
            .submit(message.clone())
            .map_err(|err| link_error("submit", err))?;
    }
    let rounds = drive(sender, sender_outbox, receiver, receiver_outbox)?;

    let received = receiver_sink.take_messages();
    let verified = verify(&outgoing, &received);
    let output = LoopbackOutput {
        sender: sender.side(),
        rounds,
        sent: outgoing.len(),
        verified,
        delivered: received
            .iter()
            .map(|m| Delivery {
                route: m.route,
                size: m.payload.len(),
                end_of_message: m.end_of_message,
                preview: payload_preview(&m.payload, 32),
            })
            .collect(),
        sender_dump: sender.debug_dump(),
        receiver_dump: receiver.debug_dump(),
        sender_stats: sender.stats(),
        receiver_stats: receiver.stats(),
    };
    print_loopback(&output, format);

    if verified {
        Ok(SUCCESS)
    } else {
        tracing::error!("delivered payloads differ from what was sent");
        Ok(FAILURE)
    }
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i % 251) as u8 ^ seed)
        .collect()
}

fn build_messages(args: &LoopbackArgs) -> CliResult<Vec<Message>> {
    let mut messages = Vec::new();
    if args.control > 0 {
        messages.push(Message::control(pattern(args.control, 0x11)));
    }
    if args.raw > 0 {
        messages.push(Message::raw(args.sub_channel, pattern(args.raw, 0x22)));
    }
    if args.fs > 0 {
        messages.push(Message::fs_relay(pattern(args.fs, 0x33)));
    }
    if messages.is_empty() {
        return Err(CliError::new(USAGE, "nothing to send: every size is zero"));
    }
    Ok(messages)
}

/// Flush and exchange mailbox words until the sender's queue is empty and
/// the receiver has handed every relay segment to its sink.
fn drive(
    sender: &mut TransportEngine,
    sender_outbox: &MailboxQueue,
    receiver: &mut TransportEngine,
    receiver_outbox: &MailboxQueue,
) -> CliResult<usize> {
    for round in 1..=MAX_ROUNDS {
        sender.flush().map_err(|err| link_error("flush", err))?;
        pump(sender, sender_outbox, receiver, receiver_outbox)
            .map_err(|err| link_error("pump mailbox", err))?;
        while receiver.relay_backlog_len() > 0 {
            receiver.pump_relay();
        }
        if sender.poll_outbound_queue_depth() == 0 {
            tracing::debug!(round, "loopback drained");
            return Ok(round);
        }
    }
    Err(CliError::new(
        FAILURE,
        format!(
            "link did not drain after {MAX_ROUNDS} rounds ({} messages still queued)",
            sender.poll_outbound_queue_depth()
        ),
    ))
}

/// Every sent message arrived intact. Fs-relay segments are joined first.
fn verify(sent: &[Message], received: &[Message]) -> bool {
    let mut whole: Vec<(Route, Vec<u8>)> = Vec::new();
    let mut relay = Vec::new();
    for message in received {
        match message.route {
            Route::FsRelay => {
                relay.extend_from_slice(&message.payload);
                if message.end_of_message {
                    whole.push((Route::FsRelay, std::mem::take(&mut relay)));
                }
            }
            route => whole.push((route, message.payload.to_vec())),
        }
    }
    if !relay.is_empty() || whole.len() != sent.len() {
        return false;
    }
    sent.iter().all(|message| {
        whole
            .iter()
            .any(|(route, payload)| *route == message.route && payload[..] == message.payload[..])
    })
}

fn print_loopback(output: &LoopbackOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table => {
            let mut t = table(&["ROUTE", "SIZE", "EOM", "PAYLOAD"]);
            for d in &output.delivered {
                t.add_row(vec![
                    d.route.to_string(),
                    d.size.to_string(),
                    d.end_of_message.to_string(),
                    d.preview.clone(),
                ]);
            }
            println!("{t}");
            println!(
                "sent={} delivered={} rounds={} verified={}\n",
                output.sent,
                output.delivered.len(),
                output.rounds,
                output.verified
            );
            print!("{}\n{}", output.sender_dump, output.receiver_dump);
        }
        OutputFormat::Pretty => {
            for d in &output.delivered {
                println!("delivered {} {} bytes", d.route, d.size);
            }
            println!("verified={} rounds={}", output.verified, output.rounds);
            print!("{}{}", output.sender_dump, output.receiver_dump);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(control: usize, raw: usize, fs: usize) -> LoopbackArgs {
        LoopbackArgs {
            control,
            raw,
            sub_channel: 2,
            fs,
            from_modem: false,
        }
    }

    #[test]
    fn zero_sizes_are_a_usage_error() {
        let err = build_messages(&args(0, 0, 0)).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn verify_joins_relay_segments() {
        let sent = vec![Message::fs_relay(pattern(10, 1)), Message::raw(2, pattern(3, 2))];
        let payload = pattern(10, 1);
        let received = vec![
            Message::raw(2, pattern(3, 2)),
            Message {
                route: Route::FsRelay,
                payload: payload[..6].to_vec().into(),
                end_of_message: false,
            },
            Message {
                route: Route::FsRelay,
                payload: payload[6..].to_vec().into(),
                end_of_message: true,
            },
        ];
        assert!(verify(&sent, &received));
        assert!(!verify(&sent, &received[..2]));
    }

    #[test]
    fn drives_mixed_traffic_through_pair() {
        let config = LinkConfig::default();
        let outgoing = build_messages(&args(20_000, 100, 9_000)).unwrap();
        let mut pair = LoopbackPair::open(&config).unwrap();
        for message in &outgoing {
            pair.app.submit(message.clone()).unwrap();
        }

        drive(&mut pair.app, &pair.to_modem, &mut pair.modem, &pair.to_app).unwrap();
        assert!(verify(&outgoing, &pair.modem_sink.messages()));
    }
}
