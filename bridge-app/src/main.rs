// fcbridge -- terminal bridge to a flight-controller configuration CLI.
//
// Usage:
//   fcbridge ports
//   fcbridge --port /dev/ttyACM0 shell
//   fcbridge --port /dev/ttyACM0 send "get min_throttle" "get motor_pwm_protocol"
//   fcbridge --port COM5 verify expected.json --save-log session.txt
//   fcbridge --port COM5 verify expected.json --json > results.json
//
// Leaving never sends `exit`: on Betaflight that reboots the controller.

mod logging;
mod output;
mod shell;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use fcbridge::verify::load_expectations;
use fcbridge::{Bridge, BridgeBuilder, DEFAULT_BAUD_RATE, PromptMatch, list_ports};

use crate::logging::{LogFormat, LogLevel, init_logging};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Talk to a flight controller's CLI over its USB serial port.
#[derive(Parser)]
#[command(name = "fcbridge", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyACM0, COM5). When omitted and exactly
    /// one port is present, that port is used.
    #[arg(long, global = true, env = "FCBRIDGE_PORT")]
    port: Option<String>,

    /// Baud rate.
    #[arg(long, global = true, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// How long to wait for the prompt after each awaited command, in ms.
    #[arg(long, global = true, default_value_t = 5000)]
    timeout_ms: u64,

    /// Pause between opening the port and entering CLI mode, in ms.
    #[arg(long, global = true, default_value_t = 300)]
    settle_ms: u64,

    /// End a response at any `#`, not only a `#` starting a line.
    #[arg(long, global = true)]
    prompt_anywhere: bool,

    /// Diagnostic log level (written to stderr).
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    /// Diagnostic log format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports.
    Ports,

    /// Interactive terminal session.
    Shell,

    /// Send each line, wait for its response and print it.
    Send {
        /// CLI lines, e.g. "get min_throttle".
        #[arg(required = true)]
        lines: Vec<String>,
    },

    /// Check settings against an expectation file.
    Verify {
        /// JSON expectation file.
        file: PathBuf,

        /// Print results as JSON instead of a table.
        #[arg(long)]
        json: bool,

        /// Save the session log here when done.
        #[arg(long)]
        save_log: Option<PathBuf>,
    },
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

fn resolve_port(cli: &Cli) -> Result<String> {
    if let Some(port) = &cli.port {
        return Ok(port.clone());
    }

    let ports = list_ports().context("failed to enumerate serial ports")?;
    match ports.as_slice() {
        [only] => {
            tracing::info!(port = %only.name, "using the only serial port present");
            Ok(only.name.clone())
        }
        [] => bail!("no serial ports found; is the controller plugged in?"),
        _ => bail!(
            "{} serial ports found; choose one with --port (see `fcbridge ports`)",
            ports.len()
        ),
    }
}

fn builder(cli: &Cli, port: &str) -> Result<BridgeBuilder> {
    if cli.timeout_ms == 0 {
        bail!("--timeout-ms must be greater than zero");
    }

    let prompt = if cli.prompt_anywhere {
        PromptMatch::Anywhere
    } else {
        PromptMatch::LineStart
    };

    Ok(BridgeBuilder::new()
        .serial_port(port)
        .baud_rate(cli.baud)
        .command_timeout(Duration::from_millis(cli.timeout_ms))
        .settle_delay(Duration::from_millis(cli.settle_ms))
        .prompt_match(prompt))
}

async fn connect(cli: &Cli) -> Result<Bridge> {
    let port = resolve_port(cli)?;
    let bridge = builder(cli, &port)?
        .build()
        .await
        .with_context(|| format!("failed to open {port}"))?;
    bridge
        .wait_ready()
        .await
        .with_context(|| format!("{port} closed before CLI mode was entered"))?;
    Ok(bridge)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_ports() -> Result<()> {
    let ports = list_ports().context("failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }
    println!("{}", output::ports_table(&ports));
    Ok(())
}

async fn cmd_shell(cli: &Cli) -> Result<()> {
    let port = resolve_port(cli)?;
    let bridge = builder(cli, &port)?
        .build()
        .await
        .with_context(|| format!("failed to open {port}"))?;
    println!("{} ({port})", fcbridge::CONNECTED_NOTICE);

    let result = shell::run(&bridge).await;
    bridge.close().await;
    result
}

async fn cmd_send(bridge: &Bridge, lines: &[String]) -> Result<()> {
    for line in lines {
        let response = bridge
            .send_and_await(line)
            .await
            .with_context(|| format!("`{line}` failed"))?;
        println!("{response}");
    }
    Ok(())
}

async fn cmd_verify(
    bridge: &Bridge,
    file: &Path,
    json: bool,
    save_log: Option<&Path>,
) -> Result<()> {
    let expectations = load_expectations(file)
        .with_context(|| format!("failed to load {}", file.display()))?;

    let report = bridge
        .verify_with(&expectations, output::stream_results(std::io::stdout(), json))
        .await
        .context("verification aborted")?;

    if let Some(path) = save_log {
        bridge
            .save_log(path)
            .with_context(|| format!("failed to save log to {}", path.display()))?;
    }

    output::print_report(&report, json);

    if !report.all_passed() && !report.results.is_empty() {
        bail!(
            "{} of {} settings did not pass",
            report.failed() + report.errors(),
            report.results.len()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    match &cli.command {
        Command::Ports => cmd_ports(),
        Command::Shell => cmd_shell(&cli).await,
        Command::Send { lines } => {
            let bridge = connect(&cli).await?;
            let result = cmd_send(&bridge, lines).await;
            bridge.close().await;
            result
        }
        Command::Verify {
            file,
            json,
            save_log,
        } => {
            let bridge = connect(&cli).await?;
            let result = cmd_verify(&bridge, file, *json, save_log.as_deref()).await;
            bridge.close().await;
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_verify_with_globals_after_subcommand() {
        let cli = Cli::try_parse_from([
            "fcbridge",
            "verify",
            "expected.json",
            "--json",
            "--port",
            "/dev/ttyACM0",
            "--timeout-ms",
            "2000",
        ])
        .unwrap();

        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.timeout_ms, 2000);
        assert_eq!(cli.baud, 115_200);
        match cli.command {
            Command::Verify {
                file,
                json,
                save_log,
            } => {
                assert_eq!(file, PathBuf::from("expected.json"));
                assert!(json);
                assert!(save_log.is_none());
            }
            _ => panic!("expected verify"),
        }
    }

    #[test]
    fn send_requires_a_line() {
        assert!(Cli::try_parse_from(["fcbridge", "send"]).is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let cli = Cli::try_parse_from(["fcbridge", "--timeout-ms", "0", "shell"]).unwrap();
        assert!(builder(&cli, "/dev/null").is_err());
    }
}
