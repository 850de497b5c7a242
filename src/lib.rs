//! Output side of an embedded-development editor plugin: serial port
//! monitors, the ordered message pipeline feeding editor consoles, compiler
//! diagnostic annotations and an INI-style structured text store.
//!
//! The editor itself is reached only through the traits in [`console`] and
//! [`annotations`]; everything else is plain threads and shared state held
//! by [`AppState`].

pub mod annotations;
pub mod build_exec;
pub mod cli;
pub mod config;
pub mod console;
pub mod diagnostics;
pub mod display_codec;
pub mod error;
pub mod logging;
pub mod message_queue;
pub mod serial_monitor;
pub mod state;
pub mod structured_text;

pub use annotations::{AnnotationView, ErrorAnnotationTracker};
pub use config::MonitorPreferences;
pub use console::{ConsoleSink, SurfaceHost, TextSurface};
pub use display_codec::{DisplayCodec, DisplayMode};
pub use error::{BuildError, ConfigError, SerialError};
pub use message_queue::{LineMessageQueue, MessageSink};
pub use serial_monitor::{LineEnding, SerialPortMonitor, SerialTransport, StartOutcome};
pub use state::AppState;
pub use structured_text::StructuredTextDocument;
