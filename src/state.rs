use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::annotations::{AnnotationView, ErrorAnnotationTracker};
use crate::config::MonitorPreferences;
use crate::console::{ConsoleSink, SurfaceHost, EXEC_CONSOLE, SERIAL_CONSOLE_PREFIX};
use crate::error::SerialError;
use crate::message_queue::{ConsolePrinter, LineMessageQueue};
use crate::serial_monitor::{
    MonitorOptions, MonitorState, NativeSerialTransport, PortRegistry, SerialPortMonitor,
    SerialTransport, StartOutcome,
};

/// Builds a fresh transport for each monitor.
pub type TransportFactory = Box<dyn Fn() -> Box<dyn SerialTransport> + Send + Sync>;

/// Console name used by the monitor of `port`.
pub fn serial_console_name(port: &str) -> String {
    format!("{SERIAL_CONSOLE_PREFIX}{port}")
}

/// Process-scoped context: every registry the pipeline shares lives here,
/// created once at startup and handed around by `Arc`.
pub struct AppState {
    pub consoles: Arc<ConsoleSink>,
    pub annotations: Arc<ErrorAnnotationTracker>,
    /// Ports currently owned by a live session.
    pub ports_in_use: Arc<PortRegistry>,
    /// Monitors by port name.
    pub(crate) monitors: DashMap<String, Arc<SerialPortMonitor>>,
    pub(crate) exec_queue: Arc<LineMessageQueue>,
    pub(crate) preferences: RwLock<MonitorPreferences>,
    transport_factory: TransportFactory,
}

impl AppState {
    pub fn new(
        host: Arc<dyn SurfaceHost>,
        view: Option<Arc<dyn AnnotationView>>,
        preferences: MonitorPreferences,
    ) -> Self {
        Self::with_transport_factory(
            host,
            view,
            preferences,
            Box::new(|| Box::new(NativeSerialTransport::new()) as Box<dyn SerialTransport>),
        )
    }

    pub fn with_transport_factory(
        host: Arc<dyn SurfaceHost>,
        view: Option<Arc<dyn AnnotationView>>,
        preferences: MonitorPreferences,
        transport_factory: TransportFactory,
    ) -> Self {
        let consoles = Arc::new(ConsoleSink::new(host, preferences.console_settings()));
        let annotations = Arc::new(ErrorAnnotationTracker::new(view));
        let exec_queue = Arc::new(LineMessageQueue::with_tracker(
            Arc::new(ConsolePrinter::new(consoles.clone(), EXEC_CONSOLE)),
            annotations.clone(),
        ));
        exec_queue.set_timestamps(preferences.show_timestamps);
        Self {
            consoles,
            annotations,
            ports_in_use: Arc::new(PortRegistry::new()),
            monitors: DashMap::new(),
            exec_queue,
            preferences: RwLock::new(preferences),
            transport_factory,
        }
    }

    pub fn preferences(&self) -> MonitorPreferences {
        self.preferences.read().clone()
    }

    /// Apply new preferences to the consoles and queues. Running monitors
    /// keep their display mode until restarted.
    pub fn set_preferences(&self, preferences: MonitorPreferences) {
        self.consoles.set_settings(preferences.console_settings());
        self.exec_queue.set_timestamps(preferences.show_timestamps);
        for monitor in self.monitors.iter() {
            monitor.queue().set_timestamps(preferences.show_timestamps);
            monitor.set_options(MonitorOptions {
                baud: monitor.options().baud,
                ..preferences.monitor_options()
            });
        }
        *self.preferences.write() = preferences;
    }

    /// Queue feeding the build output console.
    pub fn exec_queue(&self) -> &Arc<LineMessageQueue> {
        &self.exec_queue
    }

    /// Start monitoring `port`. `baud` overrides the preferred baud rate.
    ///
    /// A running monitor on the same port is left untouched and the call is
    /// rejected with [`SerialError::PortInUse`].
    pub fn start_monitor(&self, port: &str, baud: Option<u32>) -> Result<StartOutcome, SerialError> {
        let prefs = self.preferences();
        let mut options = prefs.monitor_options();
        if let Some(baud) = baud {
            options.baud = baud;
        }

        if let Some(existing) = self.monitor(port) {
            if existing.state() != MonitorState::Stopped {
                return Err(SerialError::PortInUse(port.to_string()));
            }
            existing.set_options(options);
            self.annotations.reset();
            return existing.start();
        }

        let queue = Arc::new(LineMessageQueue::with_tracker(
            Arc::new(ConsolePrinter::new(self.consoles.clone(), serial_console_name(port))),
            self.annotations.clone(),
        ));
        queue.set_timestamps(prefs.show_timestamps);
        let monitor = Arc::new(SerialPortMonitor::new(
            port,
            options,
            (self.transport_factory)(),
            queue,
            self.ports_in_use.clone(),
        ));
        self.annotations.reset();
        let outcome = monitor.start()?;
        self.monitors.insert(port.to_string(), monitor);
        Ok(outcome)
    }

    /// Stop the monitor of `port` and flush its console.
    pub fn stop_monitor(&self, port: &str) -> Result<(), SerialError> {
        let monitor = self
            .monitor(port)
            .ok_or_else(|| SerialError::NotRunning(port.to_string()))?;
        monitor.stop();
        monitor.queue().stop();
        Ok(())
    }

    pub fn send_to(&self, port: &str, text: &str) -> Result<(), SerialError> {
        self.monitor(port)
            .ok_or_else(|| SerialError::NotRunning(port.to_string()))?
            .send(text)
    }

    pub fn monitor(&self, port: &str) -> Option<Arc<SerialPortMonitor>> {
        self.monitors.get(port).map(|m| m.value().clone())
    }

    /// Ports with a live session, sorted.
    pub fn active_ports(&self) -> Vec<String> {
        self.ports_in_use.ports()
    }

    /// Stop every monitor and drain every queue. Called at shutdown.
    pub fn stop_all(&self) {
        let monitors: Vec<Arc<SerialPortMonitor>> =
            self.monitors.iter().map(|m| m.value().clone()).collect();
        for monitor in monitors {
            monitor.stop();
            monitor.queue().stop();
        }
        self.monitors.clear();
        self.exec_queue.stop();
    }
}
