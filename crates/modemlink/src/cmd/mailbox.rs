use modemlink::engine::{DataFlags, MailboxWord};
use serde::Serialize;

use crate::cmd::MailboxArgs;
use crate::exit::{CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_json, table, OutputFormat};

#[derive(Serialize, Debug, PartialEq, Eq)]
struct MailboxOutput {
    word: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    opcode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command_flags: Option<String>,
    flags: Vec<String>,
    summary: String,
}

pub fn run(args: MailboxArgs, format: OutputFormat) -> CliResult<i32> {
    let word = parse_word(&args.word)?;
    let output = describe(word);

    match format {
        OutputFormat::Json => print_json(&output),
        OutputFormat::Table => {
            let mut t = table(&["FIELD", "VALUE"]);
            t.add_row(vec!["word", output.word.as_str()]);
            t.add_row(vec!["kind", output.kind]);
            if let (Some(opcode), Some(code)) = (output.opcode, output.code) {
                t.add_row(vec!["opcode".to_string(), format!("{opcode} (0x{code:02x})")]);
            }
            if let Some(flags) = &output.command_flags {
                t.add_row(vec!["command flags", flags.as_str()]);
            }
            if !output.flags.is_empty() {
                t.add_row(vec!["data flags".to_string(), output.flags.join(" ")]);
            }
            println!("{t}");
        }
        OutputFormat::Pretty => println!("{}: {}", output.word, output.summary),
    }
    Ok(SUCCESS)
}

fn parse_word(text: &str) -> CliResult<u32> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => trimmed.replace('_', "").parse::<u32>(),
    };
    parsed.map_err(|err| CliError::new(USAGE, format!("invalid mailbox word '{text}': {err}")))
}

fn flag_names(flags: DataFlags) -> Vec<String> {
    flags.iter_names().map(|(name, _)| name.to_string()).collect()
}

fn describe(word: u32) -> MailboxOutput {
    let decoded = MailboxWord::decode(word);
    let mut output = MailboxOutput {
        word: format!("0x{word:08x}"),
        kind: "invalid",
        opcode: None,
        code: None,
        command_flags: None,
        flags: Vec::new(),
        summary: decoded.to_string(),
    };
    match decoded {
        MailboxWord::Invalid(_) => {}
        MailboxWord::Command(cmd) => {
            output.kind = "command";
            output.opcode = Some(cmd.opcode.name());
            output.code = Some(cmd.opcode.code());
            output.command_flags = Some(format!("0x{:08x}", cmd.flags));
        }
        MailboxWord::Data(flags) => {
            output.kind = "data";
            output.flags = flag_names(flags);
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_and_decimal() {
        assert_eq!(parse_word("0xC0001102").unwrap(), 0xC000_1102);
        assert_eq!(parse_word("0x8000_0003").unwrap(), 0x8000_0003);
        assert_eq!(parse_word("2147483650").unwrap(), 0x8000_0002);
        assert_eq!(parse_word("nope").unwrap_err().code, USAGE);
        assert_eq!(parse_word("0x1_0000_0000").unwrap_err().code, USAGE);
    }

    #[test]
    fn describes_command_word() {
        let out = describe(0xC000_1102);
        assert_eq!(out.kind, "command");
        assert_eq!(out.opcode, Some("INIT_END"));
        assert_eq!(out.code, Some(0x02));
        assert_eq!(out.command_flags.as_deref(), Some("0x00001100"));
    }

    #[test]
    fn describes_data_word() {
        let out = describe(0x8000_0012);
        assert_eq!(out.kind, "data");
        assert_eq!(out.flags, vec!["SEND_CONTROL", "REQ_ACK_RAW"]);
        assert_eq!(out.summary, "data SEND_CONTROL REQ_ACK_RAW");
    }

    #[test]
    fn describes_invalid_word() {
        let out = describe(0x0000_0002);
        assert_eq!(out.kind, "invalid");
        assert!(out.flags.is_empty());
    }
}
