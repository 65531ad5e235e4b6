//! Line-oriented console loop: stdin in, monitor commands out.
//!
//! Every input line is submitted as a command unless it starts with `~`,
//! which introduces a console directive. `~~` sends a literal `~`.

use sermon_monitor::monitor::SerialMonitor;
use sermon_serial::serial::{BaudRate, LineEnding, SerialError};
use std::io::{self, Write};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Send(String),
    Baud(BaudRate),
    LineEnding(LineEnding),
    Pause,
    Resume,
    History,
    Clear,
    Help,
    Quit,
}

const HELP: &str = "\
~baud <rate>     reopen at a new baud rate
~ending <key>    line ending: none, nl, cr, crlf
~pause / ~resume hold or allow automatic reconnect
~history         list submitted commands
~clear           clear the transcript
~quit            close the port and exit
~~text           send text starting with a literal ~";

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(directive) = line.strip_prefix('~') else {
            return Ok(Self::Send(line.to_string()));
        };
        if directive.starts_with('~') {
            return Ok(Self::Send(directive.to_string()));
        }

        let mut words = directive.split_whitespace();
        let name = words.next().unwrap_or_default();
        let arg = words.next();
        match (name, arg) {
            ("baud", Some(rate)) => BaudRate::parse_label(rate)
                .map(Self::Baud)
                .ok_or_else(|| format!("not a baud rate: {rate}")),
            ("ending", Some(key)) => LineEnding::from_key(key)
                .map(Self::LineEnding)
                .ok_or_else(|| format!("unknown line ending '{key}' (none, nl, cr, crlf)")),
            ("pause", None) => Ok(Self::Pause),
            ("resume", None) => Ok(Self::Resume),
            ("history", None) => Ok(Self::History),
            ("clear", None) => Ok(Self::Clear),
            ("help", None) | ("?", None) => Ok(Self::Help),
            ("quit", None) | ("q", None) => Ok(Self::Quit),
            _ => Err(format!("unknown directive '~{directive}', try ~help")),
        }
    }
}

/// Tally of one console run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsoleOutcome {
    pub submitted: usize,
    pub failed: usize,
    /// Stopped on `~quit` rather than end of input.
    pub quit: bool,
}

/// Feed `input` to the monitor until end of input or `~quit`. Notices for
/// the user go to `out`; serial failures are reported and the loop keeps
/// going, since the presence poller may bring the port back.
pub async fn run_console<R, W>(
    monitor: &SerialMonitor,
    input: R,
    out: &mut W,
) -> io::Result<ConsoleOutcome>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut outcome = ConsoleOutcome::default();
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        let command = match ConsoleCommand::parse(&line) {
            Ok(c) => c,
            Err(msg) => {
                writeln!(out, "! {msg}")?;
                continue;
            }
        };

        match command {
            ConsoleCommand::Send(text) => {
                outcome.submitted += 1;
                if !send_line(monitor, &text, out).await? {
                    outcome.failed += 1;
                }
            }
            ConsoleCommand::Baud(rate) => {
                if let Err(e) = monitor.change_baud_rate(rate).await {
                    writeln!(out, "! {e}")?;
                }
            }
            ConsoleCommand::LineEnding(le) => {
                monitor.set_line_ending(le);
                writeln!(out, "- line ending: {}", le.key())?;
            }
            ConsoleCommand::Pause => monitor.set_paused(true),
            ConsoleCommand::Resume => {
                monitor.set_paused(false);
                if let Err(e) = monitor.resume().await {
                    writeln!(out, "! {e}")?;
                }
            }
            ConsoleCommand::History => {
                for (i, entry) in monitor.history().iter().enumerate() {
                    writeln!(out, "{:>3}  {entry}", i + 1)?;
                }
            }
            ConsoleCommand::Clear => monitor.clear_display(),
            ConsoleCommand::Help => writeln!(out, "{HELP}")?,
            ConsoleCommand::Quit => {
                outcome.quit = true;
                break;
            }
        }
    }
    Ok(outcome)
}

/// Submit one line. In unbuffered mode the characters go out one by one
/// first, the way a keyboard would send them. Returns whether the line
/// went out.
async fn send_line<W: Write>(monitor: &SerialMonitor, text: &str, out: &mut W) -> io::Result<bool> {
    if monitor.settings().unbuffered {
        for byte in text.bytes() {
            if let Err(e) = monitor.send_key(byte).await {
                report(out, &e)?;
                return Ok(false);
            }
        }
    }
    match monitor.submit_command(text).await {
        Ok(alert) => {
            if alert {
                writeln!(out, "- nothing was sent: the line ending is 'none'. Pick one with ~ending")?;
            }
            Ok(true)
        }
        Err(e) => {
            report(out, &e)?;
            Ok(false)
        }
    }
}

fn report<W: Write>(out: &mut W, e: &SerialError) -> io::Result<()> {
    log::debug!("Submit failed: {}", e);
    writeln!(out, "! {e}")?;
    if let Some(hint) = e.hint() {
        writeln!(out, "  {hint}")?;
    }
    Ok(())
}
