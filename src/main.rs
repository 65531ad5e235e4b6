//! sermon: interactive serial console.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use sermon_core::{keys, Preferences};
use sermon_lib::{
    console_display, init_logging, preferences_path, run_console, PreferenceStore,
};
use sermon_monitor::monitor::{ExclusiveFlag, MonitorParts, SerialMonitor};
use sermon_serial::serial::discovery::display_label;
use sermon_serial::serial::{
    touch_for_reset, DeviceDiscovery, LineEnding, SystemDiscovery,
    SystemTransportProvider,
};

#[derive(Parser, Debug)]
#[command(name = "sermon")]
#[command(version)]
#[command(about = "Serial console that survives board resets and unplugs", long_about = None)]
struct CliArgs {
    /// Port to open (e.g. /dev/ttyACM0, COM3). Defaults to the last one used
    #[arg(short, long, value_name = "PORT")]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, value_name = "RATE")]
    baud: Option<u32>,

    /// Line ending appended to each line: none, nl, cr, crlf
    #[arg(short = 'e', long, value_name = "KEY", value_parser = parse_line_ending)]
    line_ending: Option<LineEnding>,

    /// Send characters as they are typed instead of whole lines
    #[arg(short, long)]
    unbuffered: bool,

    /// Collect numeric lines as plot samples and print them as CSV on exit
    #[arg(long)]
    plot: bool,

    /// List serial ports and exit
    #[arg(short, long)]
    list: bool,

    /// Pulse the port at 1200 baud to ask the board to reset, then exit
    #[arg(long)]
    touch_reset: bool,

    /// Preferences file
    #[arg(long, value_name = "FILE")]
    prefs: Option<PathBuf>,
}

fn parse_line_ending(key: &str) -> Result<LineEnding, String> {
    LineEnding::from_key(key).ok_or_else(|| format!("expected none, nl, cr or crlf, got '{key}'"))
}

/// CLI flags take precedence over stored preferences and are remembered.
fn apply_overrides(args: &CliArgs, prefs: &dyn Preferences) {
    if let Some(port) = &args.port {
        prefs.set(keys::SERIAL_PORT, port);
    }
    if let Some(baud) = args.baud {
        prefs.set(keys::SERIAL_BAUD, &baud.to_string());
    }
    if let Some(le) = args.line_ending {
        prefs.set(keys::SERIAL_LINE_ENDING, le.key());
    }
    if args.unbuffered {
        prefs.set_bool(keys::SERIAL_UNBUFFERED, true);
    }
}

async fn list_ports() -> ExitCode {
    let ports = SystemDiscovery::new().list().await;
    if ports.is_empty() {
        eprintln!("No serial ports found");
    }
    for port in &ports {
        println!("{}", display_label(port));
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging("info");
    let args = CliArgs::parse();

    if args.list {
        return list_ports().await;
    }

    let store = PreferenceStore::open(args.prefs.clone().or_else(preferences_path));
    let prefs = store.handle();
    apply_overrides(&args, prefs.as_ref());

    let Some(address) = prefs.get(keys::SERIAL_PORT).filter(|p| !p.is_empty()) else {
        eprintln!("No port selected. Pass --port, or --list to see what is connected");
        return ExitCode::FAILURE;
    };
    let provider = SystemTransportProvider::new();

    if args.touch_reset {
        return match touch_for_reset(provider.as_ref(), &address).await {
            Ok(()) => {
                store.save();
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    let monitor = SerialMonitor::new(MonitorParts {
        prefs: prefs.clone(),
        provider,
        discovery: Arc::new(SystemDiscovery::new()),
        exclusive: ExclusiveFlag::new(),
        display: console_display(args.plot, Box::new(std::io::stdout())),
    });

    if let Err(e) = monitor.open().await {
        eprintln!("{e}");
        if let Some(hint) = e.hint() {
            eprintln!("{hint}");
        }
        monitor.dispose().await;
        store.save();
        return ExitCode::FAILURE;
    }
    eprintln!(
        "Connected to {} at {}. Type ~help for console directives",
        address,
        monitor.session().config().baud_rate.label()
    );

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let result = run_console(&monitor, stdin, &mut std::io::stderr()).await;

    if args.plot {
        print!("{}", monitor.display_contents());
    }
    monitor.close().await;
    monitor.dispose().await;
    store.save();

    match result {
        Ok(outcome) => {
            log::debug!("Console finished: {:?}", outcome);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Reading input failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
