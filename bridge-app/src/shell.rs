//! Interactive terminal: typed lines go to the controller, device output is
//! printed as it arrives, and a few `:` commands drive the session.

use std::path::PathBuf;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use fcbridge::verify::{Expectation, load_expectations};
use fcbridge::{Bridge, BridgeEvent, DEFAULT_EXPORT_FILE};

use crate::output;

pub const HELP: &str = "\
Lines are sent to the controller as typed. Session commands:
  :clear            clear the session log
  :save [file]      save the session log (default betaflight-cli-output.txt)
  :load <file>      load an expectation file
  :verify [file]    check settings against the loaded (or given) file
  :get <name>       print one setting's value
  :help             show this text
  :quit             leave without rebooting the controller";

/// One line of shell input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellInput {
    Empty,
    Send(String),
    Clear,
    Save(Option<PathBuf>),
    Load(PathBuf),
    Verify(Option<PathBuf>),
    Get(String),
    Help,
    Quit,
    Invalid(String),
}

pub fn parse_input(line: &str) -> ShellInput {
    let line = line.trim();
    if line.is_empty() {
        return ShellInput::Empty;
    }
    let Some(meta) = line.strip_prefix(':') else {
        return ShellInput::Send(line.to_string());
    };

    let (word, arg) = match meta.split_once(char::is_whitespace) {
        Some((word, arg)) => (word, arg.trim()),
        None => (meta, ""),
    };
    let arg = (!arg.is_empty()).then(|| arg.to_string());

    match (word, arg) {
        ("clear", None) => ShellInput::Clear,
        ("save", file) => ShellInput::Save(file.map(PathBuf::from)),
        ("load", Some(file)) => ShellInput::Load(PathBuf::from(file)),
        ("load", None) => ShellInput::Invalid(":load needs a file name".into()),
        ("verify", file) => ShellInput::Verify(file.map(PathBuf::from)),
        ("get", Some(name)) => ShellInput::Get(name),
        ("get", None) => ShellInput::Invalid(":get needs a setting name".into()),
        ("help", None) => ShellInput::Help,
        ("quit" | "q", None) => ShellInput::Quit,
        _ => ShellInput::Invalid(format!("unknown command :{meta} (try :help)")),
    }
}

/// Run until `:quit`, end of input, or the controller goes away.
pub async fn run(bridge: &Bridge) -> Result<()> {
    let mut events = bridge.subscribe();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut expectations: Option<Vec<Expectation>> = None;

    println!("{HELP}\n");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(BridgeEvent::Line(line)) => println!("{line}"),
                Ok(BridgeEvent::Timeout { command }) => {
                    eprintln!("No prompt after `{command}`.");
                }
                Ok(BridgeEvent::Disconnected) => {
                    println!("Controller disconnected.");
                    return Ok(());
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "shell fell behind device output");
                }
                Err(RecvError::Closed) => return Ok(()),
            },

            line = stdin.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                match parse_input(&line) {
                    ShellInput::Quit => return Ok(()),
                    input => handle(bridge, input, &mut expectations).await,
                }
            }
        }
    }
}

async fn handle(bridge: &Bridge, input: ShellInput, expectations: &mut Option<Vec<Expectation>>) {
    match input {
        ShellInput::Empty | ShellInput::Quit => {}
        ShellInput::Send(line) => bridge.send(&line).await,
        ShellInput::Clear => {
            bridge.clear_log();
            println!("Log cleared.");
        }
        ShellInput::Save(file) => {
            let path = file.unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_FILE));
            match bridge.save_log(&path) {
                Ok(()) => println!("Log saved to {}.", path.display()),
                Err(e) => eprintln!("Could not save log: {e}"),
            }
        }
        ShellInput::Load(path) => match load_expectations(&path) {
            Ok(loaded) => {
                let notice = format!("Expectation file loaded ({} entries).", loaded.len());
                bridge.notice(&notice);
                println!("{notice}");
                *expectations = Some(loaded);
            }
            Err(e) => {
                let notice = format!("Error loading expectation file: {e}");
                bridge.notice(&notice);
                eprintln!("{notice}");
            }
        },
        ShellInput::Verify(file) => {
            if let Some(path) = file {
                match load_expectations(&path) {
                    Ok(loaded) => *expectations = Some(loaded),
                    Err(e) => {
                        eprintln!("Error loading expectation file: {e}");
                        return;
                    }
                }
            }
            let Some(entries) = expectations.as_deref() else {
                eprintln!("No expectation file loaded. Use :load <file> first.");
                return;
            };
            let print = output::stream_results(std::io::stdout(), false);
            match bridge.verify_with(entries, print).await {
                Ok(report) => output::print_report(&report, false),
                Err(e) => eprintln!("Verification stopped: {e}"),
            }
        }
        ShellInput::Get(name) => match bridge.get_setting(&name).await {
            Ok(Some(value)) => println!("{name} = {value}"),
            Ok(None) => eprintln!("{name}: no value in response"),
            Err(e) => eprintln!("{name}: {e}"),
        },
        ShellInput::Help => println!("{HELP}"),
        ShellInput::Invalid(message) => eprintln!("{message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_sent_trimmed() {
        assert_eq!(parse_input("  status \n"), ShellInput::Send("status".into()));
        assert_eq!(
            parse_input("set min_throttle = 1070"),
            ShellInput::Send("set min_throttle = 1070".into())
        );
    }

    #[test]
    fn blank_input_is_empty() {
        assert_eq!(parse_input(""), ShellInput::Empty);
        assert_eq!(parse_input("   "), ShellInput::Empty);
    }

    #[test]
    fn hash_line_is_sent() {
        assert_eq!(parse_input("#"), ShellInput::Send("#".into()));
    }

    #[test]
    fn meta_commands() {
        assert_eq!(parse_input(":clear"), ShellInput::Clear);
        assert_eq!(parse_input(":save"), ShellInput::Save(None));
        assert_eq!(
            parse_input(":save my quad.txt"),
            ShellInput::Save(Some(PathBuf::from("my quad.txt")))
        );
        assert_eq!(
            parse_input(":load expected.json"),
            ShellInput::Load(PathBuf::from("expected.json"))
        );
        assert_eq!(parse_input(":verify"), ShellInput::Verify(None));
        assert_eq!(
            parse_input(":get min_throttle"),
            ShellInput::Get("min_throttle".into())
        );
        assert_eq!(parse_input(":quit"), ShellInput::Quit);
        assert_eq!(parse_input(":help"), ShellInput::Help);
    }

    #[test]
    fn meta_commands_missing_arguments() {
        assert!(matches!(parse_input(":load"), ShellInput::Invalid(_)));
        assert!(matches!(parse_input(":get  "), ShellInput::Invalid(_)));
        assert!(matches!(parse_input(":clear now"), ShellInput::Invalid(_)));
        assert!(matches!(parse_input(":reboot"), ShellInput::Invalid(_)));
    }
}
