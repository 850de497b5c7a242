//! Serial port monitor: one receive thread per open port.
//!
//! The receive loop polls the transport for pending bytes, renders them with
//! the session's [`DisplayCodec`] and pushes the text into the monitor's
//! [`LineMessageQueue`]. A transport error while polling is treated as the
//! device going away and ends the session.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::display_codec::{DisplayCodec, DisplayMode};
use crate::error::SerialError;
use crate::message_queue::LineMessageQueue;

/// Sleep between two polls of the transport. Trades latency for CPU.
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Largest single read from the transport.
const READ_CHUNK: usize = 4096;

/// Byte-level access to a serial device.
pub trait SerialTransport: Send {
    fn open(&mut self, port: &str, baud: u32) -> Result<(), SerialError>;
    fn is_open(&self) -> bool;
    fn bytes_available(&mut self) -> Result<usize, SerialError>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError>;
    fn write(&mut self, data: &[u8]) -> Result<(), SerialError>;
    fn close(&mut self);
}

/// [`SerialTransport`] over the operating system's serial driver.
#[derive(Default)]
pub struct NativeSerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl NativeSerialTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, SerialError> {
        self.port.as_mut().ok_or(SerialError::NotOpen)
    }
}

impl SerialTransport for NativeSerialTransport {
    fn open(&mut self, port: &str, baud: u32) -> Result<(), SerialError> {
        let opened = serialport::new(port, baud)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| SerialError::Open {
                port: port.to_string(),
                reason: e.description,
            })?;
        self.port = Some(opened);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn bytes_available(&mut self) -> Result<usize, SerialError> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        match std::io::Read::read(self.port()?, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), SerialError> {
        let port = self.port()?;
        std::io::Write::write_all(&mut *port, data)?;
        std::io::Write::flush(&mut *port)?;
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }
}

/// Names of the serial ports present on this machine.
pub fn available_ports() -> Result<Vec<String>, SerialError> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}

/// Terminator appended by [`SerialPortMonitor::send`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    None,
    #[default]
    Nl,
    Cr,
    CrLf,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::None => "",
            LineEnding::Nl => "\n",
            LineEnding::Cr => "\r",
            LineEnding::CrLf => "\r\n",
        }
    }
}

impl FromStr for LineEnding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(LineEnding::None),
            "nl" | "lf" => Ok(LineEnding::Nl),
            "cr" => Ok(LineEnding::Cr),
            "crlf" | "both" => Ok(LineEnding::CrLf),
            other => Err(format!("unknown line ending: {other}")),
        }
    }
}

/// Process-wide set of ports owned by a live session.
#[derive(Default)]
pub struct PortRegistry {
    ports: Mutex<HashSet<String>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the port is already claimed.
    pub fn claim(&self, port: &str) -> bool {
        self.ports.lock().insert(port.to_string())
    }

    pub fn release(&self, port: &str) {
        self.ports.lock().remove(port);
    }

    pub fn contains(&self, port: &str) -> bool {
        self.ports.lock().contains(port)
    }

    pub fn ports(&self) -> Vec<String> {
        let mut ports: Vec<String> = self.ports.lock().iter().cloned().collect();
        ports.sort();
        ports
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Starting,
    Running,
}

/// Result of [`SerialPortMonitor::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Running,
    AlreadyRunning,
    /// The port could not be opened; reported on the console.
    Unavailable,
    /// `stop()` ran while the port was being opened. The port is closed
    /// again and the monitor stays stopped.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSession {
    pub port: String,
    pub baud: u32,
    pub is_alive: bool,
}

/// Per-session options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    pub baud: u32,
    pub mode: DisplayMode,
    pub line_ending: LineEnding,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            baud: 9600,
            mode: DisplayMode::default(),
            line_ending: LineEnding::default(),
        }
    }
}

/// State shared with the receive thread.
struct Shared {
    port: String,
    transport: Mutex<Box<dyn SerialTransport>>,
    state: Mutex<MonitorState>,
    alive: AtomicBool,
    queue: Arc<LineMessageQueue>,
    registry: Arc<PortRegistry>,
}

impl Shared {
    /// Close the port and give it back. Safe to call more than once.
    fn teardown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut state = self.state.lock();
        if *state == MonitorState::Stopped {
            return;
        }
        self.transport.lock().close();
        self.registry.release(&self.port);
        *state = MonitorState::Stopped;
    }
}

pub struct SerialPortMonitor {
    shared: Arc<Shared>,
    options: Mutex<MonitorOptions>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialPortMonitor {
    pub fn new(
        port: impl Into<String>,
        options: MonitorOptions,
        transport: Box<dyn SerialTransport>,
        queue: Arc<LineMessageQueue>,
        registry: Arc<PortRegistry>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                port: port.into(),
                transport: Mutex::new(transport),
                state: Mutex::new(MonitorState::Stopped),
                alive: AtomicBool::new(false),
                queue,
                registry,
            }),
            options: Mutex::new(options),
            worker: Mutex::new(None),
        }
    }

    pub fn port(&self) -> &str {
        &self.shared.port
    }

    pub fn state(&self) -> MonitorState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == MonitorState::Running
    }

    pub fn options(&self) -> MonitorOptions {
        *self.options.lock()
    }

    pub fn queue(&self) -> &Arc<LineMessageQueue> {
        &self.shared.queue
    }

    pub fn session(&self) -> SerialSession {
        SerialSession {
            port: self.shared.port.clone(),
            baud: self.options.lock().baud,
            is_alive: self.shared.alive.load(Ordering::SeqCst),
        }
    }

    /// Display mode changes take effect on the next session.
    pub fn set_options(&self, options: MonitorOptions) {
        *self.options.lock() = options;
    }

    /// Open the port and spawn the receive thread.
    ///
    /// Fails only when another session owns the port. An unopenable port is
    /// an expected condition: it is reported on the console and the monitor
    /// stays stopped.
    pub fn start(&self) -> Result<StartOutcome, SerialError> {
        let shared = &self.shared;
        let port = shared.port.as_str();
        {
            let mut state = shared.state.lock();
            if *state == MonitorState::Running {
                return Ok(StartOutcome::AlreadyRunning);
            }
            if !shared.registry.claim(port) {
                return Err(SerialError::PortInUse(port.to_string()));
            }
            *state = MonitorState::Starting;
        }

        // A previous session that ended on disconnect left its finished thread.
        if let Some(old) = self.worker.lock().take() {
            let _ = old.join();
        }

        let options = self.options();
        shared.queue.start();

        let opened = shared.transport.lock().open(port, options.baud);
        {
            // A concurrent stop() already released the claim; it may belong
            // to another monitor by now, so leave the registry alone.
            let mut state = shared.state.lock();
            if *state != MonitorState::Starting {
                if opened.is_ok() {
                    shared.transport.lock().close();
                }
                tracing::info!(port, "serial monitor start cancelled by stop");
                return Ok(StartOutcome::Cancelled);
            }
            if let Err(e) = opened {
                tracing::warn!(port, "serial port unavailable: {e}");
                shared.queue.put(&format!("Serial port {port} is not available ({e})"));
                shared.registry.release(port);
                *state = MonitorState::Stopped;
                return Ok(StartOutcome::Unavailable);
            }
            shared.alive.store(true, Ordering::SeqCst);
            *state = MonitorState::Running;
        }

        shared
            .queue
            .put(&format!("Serial monitor started on {port} at {} baud", options.baud));
        tracing::info!(port, baud = options.baud, mode = ?options.mode, "serial monitor started");

        let thread_shared = shared.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("serial-rx-{port}"))
            .spawn(move || receive_loop(&thread_shared, DisplayCodec::new(options.mode)));
        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(StartOutcome::Running)
            }
            Err(e) => {
                tracing::error!(port, "failed to spawn serial receive thread: {e}");
                shared.teardown();
                Err(SerialError::Io(e))
            }
        }
    }

    /// Cooperative stop: the receive thread notices within one poll interval.
    pub fn stop(&self) {
        let was_alive = self.shared.alive.swap(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take()
            && handle.join().is_err()
        {
            tracing::error!(port = %self.shared.port, "serial receive thread panicked");
        }
        self.shared.teardown();
        if was_alive {
            self.shared
                .queue
                .put(&format!("Serial monitor stopped on {}", self.shared.port));
            tracing::info!(port = %self.shared.port, "serial monitor stopped");
        }
    }

    /// Send `text` plus the configured line ending. Fire and forget: no
    /// acknowledgement is expected from the device.
    pub fn send(&self, text: &str) -> Result<(), SerialError> {
        if !self.is_running() {
            return Err(SerialError::NotRunning(self.shared.port.clone()));
        }
        let line_ending = self.options.lock().line_ending;
        self.shared.queue.put(&format!("sent: {text}"));
        let payload = format!("{text}{}", line_ending.as_str());
        self.shared.transport.lock().write(payload.as_bytes())
    }
}

impl Drop for SerialPortMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(shared: &Shared, mut codec: DisplayCodec) {
    let mut buf = vec![0u8; READ_CHUNK];
    while shared.alive.load(Ordering::SeqCst) {
        let polled = {
            let mut transport = shared.transport.lock();
            match transport.bytes_available() {
                Ok(0) => Ok(0),
                Ok(n) => transport.read(&mut buf[..n.min(READ_CHUNK)]),
                Err(e) => Err(e),
            }
        };

        match polled {
            Ok(0) => {}
            Ok(n) => {
                let text = codec.feed(&buf[..n]);
                shared.queue.put_raw(&text);
            }
            Err(e) => {
                tracing::warn!(port = %shared.port, "serial port disconnected: {e}");
                shared
                    .queue
                    .put(&format!("Serial port {} disconnected ({e})", shared.port));
                shared.teardown();
                return;
            }
        }

        std::thread::sleep(RECEIVE_POLL_INTERVAL);
    }
}
