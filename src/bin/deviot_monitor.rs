//! Standalone serial monitor. Device output goes to stdout through the same
//! console pipeline the editor uses; each stdin line is sent to the device.

use anyhow::{bail, Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use deviot_lib::config::{load_preferences, save_preferences};
use deviot_lib::serial_monitor::available_ports;
use deviot_lib::{AppState, DisplayMode, LineEnding, StartOutcome, SurfaceHost, TextSurface};

/// deviot-monitor: watch a serial port from the terminal
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Serial port path/name (defaults to the last port used)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate (defaults to the saved preference)
    #[arg(short, long)]
    baud: Option<u32>,

    /// How received bytes are shown (plain|ascii|hex|mixed)
    #[arg(short, long)]
    mode: Option<DisplayMode>,

    /// Line ending appended to each sent line (none|nl|cr|crlf)
    #[arg(long)]
    line_ending: Option<LineEnding>,

    /// Hide the HH:MM:SS prefix on status lines
    #[arg(long)]
    no_timestamps: bool,

    /// Just list ports and exit
    #[arg(long)]
    list: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Console surface that writes straight to stdout.
#[derive(Default)]
struct StdoutSurface {
    read_only: AtomicBool,
    lines: AtomicUsize,
}

impl TextSurface for StdoutSurface {
    fn append(&self, text: &str) {
        self.lines.fetch_add(text.matches('\n').count(), Ordering::Relaxed);
        let mut out = io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
    }
    fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Relaxed);
    }
    fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Relaxed)
    }
    fn scroll_to_end(&self) {
        let _ = io::stdout().flush();
    }
    fn erase_all(&self) {
        self.lines.store(0, Ordering::Relaxed);
    }
    fn set_syntax(&self, _syntax: &str) {}
    fn set_scratch(&self, _scratch: bool) {}
    fn line_count(&self) -> usize {
        self.lines.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct StdoutHost {
    surfaces: Mutex<HashMap<String, Arc<StdoutSurface>>>,
}

impl SurfaceHost for StdoutHost {
    fn find(&self, name: &str) -> Option<Arc<dyn TextSurface>> {
        self.surfaces
            .lock()
            .get(name)
            .map(|s| s.clone() as Arc<dyn TextSurface>)
    }

    fn create(&self, name: &str) -> Arc<dyn TextSurface> {
        let surface = Arc::new(StdoutSurface::default());
        self.surfaces.lock().insert(name.to_string(), surface.clone());
        surface
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    deviot_lib::logging::init(args.verbose);

    if args.list {
        let ports = available_ports().context("Failed to enumerate serial ports")?;
        if ports.is_empty() {
            println!("No serial ports found.");
        }
        for port in ports {
            println!("{port}");
        }
        return Ok(());
    }

    let mut prefs = load_preferences();
    if let Some(mode) = args.mode {
        prefs.display_mode = mode;
    }
    if let Some(line_ending) = args.line_ending {
        prefs.line_ending = line_ending;
    }
    if args.no_timestamps {
        prefs.show_timestamps = false;
    }
    let Some(port) = args.port.clone().or_else(|| prefs.last_port.clone()) else {
        bail!("no port given and no previous port saved; use --port or --list");
    };

    let state = AppState::new(Arc::new(StdoutHost::default()), None, prefs.clone());
    let outcome = state
        .start_monitor(&port, args.baud)
        .with_context(|| format!("Failed to start monitor on '{port}'"))?;
    match outcome {
        StartOutcome::Running | StartOutcome::AlreadyRunning => {}
        StartOutcome::Unavailable | StartOutcome::Cancelled => {
            state.stop_all();
            bail!("serial port '{port}' is not available");
        }
    }

    if prefs.last_port.as_deref() != Some(port.as_str()) {
        prefs.last_port = Some(port.clone());
        if let Err(e) = save_preferences(&prefs) {
            tracing::warn!("could not save preferences: {e}");
        }
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let running = state.monitor(&port).is_some_and(|m| m.is_running());
        if !running {
            tracing::info!(port = %port, "monitor stopped, exiting");
            break;
        }
        if let Err(e) = state.send_to(&port, &line) {
            tracing::warn!(port = %port, "send failed: {e}");
            break;
        }
    }

    state.stop_all();
    Ok(())
}
