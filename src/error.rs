//! Typed error variants for the serial and configuration layers.
//!
//! Expected, recoverable conditions (port unavailable at start, malformed
//! structured text) are not errors here: they are reported through the
//! message queue or the document's `bad_format` flag. These types cover the
//! failures a caller has to act on.

use thiserror::Error;

/// Errors produced by serial transports and the monitor registry.
#[derive(Debug, Error)]
pub enum SerialError {
    /// Another live session already owns this port.
    #[error("port {0} is already in use by another monitor")]
    PortInUse(String),

    /// No monitor is registered for this port.
    #[error("no monitor running on port {0}")]
    NotRunning(String),

    /// The transport could not open the port.
    #[error("could not open {port}: {reason}")]
    Open { port: String, reason: String },

    /// The transport was used before `open` or after `close`.
    #[error("port is not open")]
    NotOpen,

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serialport::Error> for SerialError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::Io(kind) => SerialError::Io(std::io::Error::new(kind, e.description)),
            _ => SerialError::Io(std::io::Error::other(e.description)),
        }
    }
}

/// Errors produced while loading or saving configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// The text contains characters the requested encoding cannot represent.
    #[error("cannot encode {0} as Latin-1")]
    Encoding(String),
}

/// Errors produced while running the external build tool.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
