//! Link commands shared by one-shot subcommands and the interactive shell.

use std::time::Duration;

use anyhow::{Result, bail};
use echolink_core::{
    CommandCoordinator, LinkObserver, SerialTransport, VerifyOutcome, decode_hex, is_hex_literal,
};

/// One operation on an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    /// Transmit without echo check.
    Send(String),
    /// Transmit with echo check; hex if prefixed `0x`, else text.
    Trans(String),
    /// Transmit with echo check; always hex.
    Hex(String),
    /// Line command, wait for one line back.
    At(String),
}

/// A line typed into the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellInput {
    Link(LinkCommand),
    Status,
    Help,
    Exit,
    Empty,
}

pub const SHELL_HELP: &str = "\
Commands:
  send <text>      transmit text as typed, no echo check
  trans <data>     transmit and verify echo (0x... = hex, otherwise text)
  hex <hexdata>    transmit hex bytes and verify echo
  at <command>     send a line and print the response
  status           show connection state
  help             show this help
  exit | quit      leave the shell";

/// Parse one shell line. The argument keeps its inner spacing.
pub fn parse_line(line: &str) -> Result<ShellInput> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ShellInput::Empty);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (line, ""),
    };

    let need_arg = |name: &str| -> Result<String> {
        if rest.is_empty() {
            bail!("usage: {} <argument>", name);
        }
        Ok(rest.to_string())
    };

    Ok(match word.to_ascii_lowercase().as_str() {
        "send" => ShellInput::Link(LinkCommand::Send(need_arg("send")?)),
        "trans" => ShellInput::Link(LinkCommand::Trans(need_arg("trans")?)),
        "hex" => ShellInput::Link(LinkCommand::Hex(need_arg("hex")?)),
        "at" => ShellInput::Link(LinkCommand::At(need_arg("at")?)),
        "status" => ShellInput::Status,
        "help" | "?" => ShellInput::Help,
        "exit" | "quit" => ShellInput::Exit,
        other => bail!("unknown command '{}', type 'help'", other),
    })
}

/// Make `data` a hex literal the codec will always decode as hex.
pub fn hex_spec(data: &str) -> Result<String> {
    decode_hex(data)?;
    Ok(if is_hex_literal(data) {
        data.to_string()
    } else {
        format!("0x{}", data)
    })
}

/// Run `command` on `link`, printing its result.
///
/// Returns `false` when an echo check did not match.
pub fn execute<T, O>(
    link: &CommandCoordinator<T, O>,
    command: &LinkCommand,
    echo_timeout: Duration,
    command_timeout: Duration,
) -> Result<bool>
where
    T: SerialTransport,
    O: LinkObserver + 'static,
{
    let spec = match command {
        LinkCommand::Send(text) => {
            link.transmit_text(text)?;
            println!("sent {} byte(s)", text.len());
            return Ok(true);
        }
        LinkCommand::At(text) => {
            let response = link.send_command(text, command_timeout)?;
            println!("{}", response);
            return Ok(true);
        }
        LinkCommand::Trans(data) => data.clone(),
        LinkCommand::Hex(data) => hex_spec(data)?,
    };

    let report = link.transmit_and_verify(&spec, echo_timeout)?;
    match report.outcome {
        VerifyOutcome::Matched => {
            println!("echo OK ({} ms)", report.elapsed.as_millis());
        }
        VerifyOutcome::Mismatched => {
            println!("echo MISMATCH");
            println!("  sent:     {}", report.expected);
            println!("  received: {}", report.received);
        }
        VerifyOutcome::TimedOut => {
            println!("echo TIMEOUT after {} ms", echo_timeout.as_millis());
            if !report.received.is_empty() {
                println!("  received: {}", report.received);
            }
        }
    }
    Ok(report.outcome.is_match())
}

#[cfg(test)]
mod tests {
    use super::*;
    use echolink_core::{EchoMode, MockTransport, NullObserver, PortSettings};
    use std::sync::Arc;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_line("trans 0xFF 00").unwrap(),
            ShellInput::Link(LinkCommand::Trans("0xFF 00".into()))
        );
        assert_eq!(
            parse_line("  AT   AT+CSQ ").unwrap(),
            ShellInput::Link(LinkCommand::At("AT+CSQ".into()))
        );
        assert_eq!(
            parse_line("send hello world").unwrap(),
            ShellInput::Link(LinkCommand::Send("hello world".into()))
        );
        assert_eq!(parse_line("").unwrap(), ShellInput::Empty);
        assert_eq!(parse_line("quit").unwrap(), ShellInput::Exit);
        assert_eq!(parse_line("?").unwrap(), ShellInput::Help);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("hex").is_err());
        assert!(parse_line("frobnicate 1").is_err());
    }

    #[test]
    fn test_hex_spec() {
        assert_eq!(hex_spec("FF00").unwrap(), "0xFF00");
        assert_eq!(hex_spec("0xff00").unwrap(), "0xff00");
        assert!(hex_spec("F").is_err());
        // Text that happens to look like words is still decoded as hex
        assert!(hex_spec("hello").is_err());
    }

    #[test]
    fn test_execute_hex_echo() {
        let mock = MockTransport::new();
        mock.set_echo(EchoMode::Exact);
        let link = CommandCoordinator::with_observer(mock.clone(), Arc::new(NullObserver));
        link.connect(&PortSettings::default()).unwrap();

        let ok = execute(
            &link,
            &LinkCommand::Hex("A5 5A".into()),
            Duration::from_millis(200),
            Duration::from_millis(50),
        )
        .unwrap();
        assert!(ok);
        assert_eq!(mock.get_writes(), vec![vec![0xA5, 0x5A]]);
    }

    #[test]
    fn test_execute_send_writes_text_verbatim() {
        let mock = MockTransport::new();
        let link = CommandCoordinator::with_observer(mock.clone(), Arc::new(NullObserver));
        link.connect(&PortSettings::default()).unwrap();

        for text in ["0x41", "0xZZ"] {
            let ok = execute(
                &link,
                &LinkCommand::Send(text.into()),
                Duration::from_millis(30),
                Duration::from_millis(30),
            )
            .unwrap();
            assert!(ok);
        }
        assert_eq!(mock.get_writes(), vec![b"0x41".to_vec(), b"0xZZ".to_vec()]);
    }

    #[test]
    fn test_execute_trans_timeout_reports_false() {
        let mock = MockTransport::new();
        let link = CommandCoordinator::with_observer(mock, Arc::new(NullObserver));
        link.connect(&PortSettings::default()).unwrap();

        let ok = execute(
            &link,
            &LinkCommand::Trans("ping".into()),
            Duration::from_millis(30),
            Duration::from_millis(30),
        )
        .unwrap();
        assert!(!ok);
    }
}
