use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::console::{ConsoleSettings, DEFAULT_AUTO_CLEAN_THRESHOLD};
use crate::display_codec::DisplayMode;
use crate::error::ConfigError;
use crate::serial_monitor::{LineEnding, MonitorOptions};
use crate::structured_text::StructuredTextDocument;

const PREFERENCES_FILE: &str = "monitor.json";

/// Get the config directory using platform-appropriate location.
///
/// - macOS: `~/Library/Application Support/deviot/`
/// - Linux: `~/.config/deviot/` (or `$XDG_CONFIG_HOME`)
/// - Windows: `%APPDATA%/deviot/`
///
/// Falls back to `~/.deviot/` if the platform dir is unavailable.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("deviot"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".deviot")
        })
}

/// Load a JSON config file from `dir`, returning Default if missing or corrupt.
/// Logs when the file exists but cannot be read or parsed, so corrupt files
/// are visible in logs instead of silently resetting state.
pub fn load_json_config_in<T: DeserializeOwned + Default>(dir: &Path, filename: &str) -> T {
    let path = dir.join(filename);
    if !path.exists() {
        return T::default();
    }
    let content = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("could not read config {}: {e}", path.display());
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("corrupt config {}: {e}. Using defaults.", path.display());
            T::default()
        }
    }
}

/// Save a JSON config file atomically (temp file + rename).
pub fn save_json_config_in<T: Serialize>(dir: &Path, filename: &str, config: &T) -> Result<(), ConfigError> {
    let io_err = |path: &Path| {
        let path = path.display().to_string();
        move |source| ConfigError::Io { path, source }
    };

    std::fs::create_dir_all(dir).map_err(io_err(dir))?;

    let target = dir.join(filename);
    let json = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Json {
        path: target.display().to_string(),
        source,
    })?;

    let temp = dir.join(format!("{}.tmp.{}", filename, std::process::id()));
    std::fs::write(&temp, &json).map_err(io_err(&temp))?;

    // Either the old file or the new one exists, never a partial write.
    std::fs::rename(&temp, &target).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        io_err(&target)(e)
    })?;

    Ok(())
}

/// Monitor and console preferences persisted between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorPreferences {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default)]
    pub display_mode: DisplayMode,
    #[serde(default)]
    pub line_ending: LineEnding,
    #[serde(default = "default_true")]
    pub auto_scroll: bool,
    #[serde(default = "default_true")]
    pub auto_clean: bool,
    #[serde(default = "default_auto_clean_threshold")]
    pub auto_clean_threshold: usize,
    #[serde(default = "default_true")]
    pub show_timestamps: bool,
    /// Port used when none is given explicitly.
    #[serde(default)]
    pub last_port: Option<String>,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_true() -> bool {
    true
}

fn default_auto_clean_threshold() -> usize {
    DEFAULT_AUTO_CLEAN_THRESHOLD
}

impl Default for MonitorPreferences {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            display_mode: DisplayMode::default(),
            line_ending: LineEnding::default(),
            auto_scroll: true,
            auto_clean: true,
            auto_clean_threshold: default_auto_clean_threshold(),
            show_timestamps: true,
            last_port: None,
        }
    }
}

impl MonitorPreferences {
    pub fn console_settings(&self) -> ConsoleSettings {
        ConsoleSettings {
            auto_scroll: self.auto_scroll,
            auto_clean: self.auto_clean,
            auto_clean_threshold: self.auto_clean_threshold,
        }
    }

    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            baud: self.baud_rate,
            mode: self.display_mode,
            line_ending: self.line_ending,
        }
    }
}

pub fn load_preferences() -> MonitorPreferences {
    load_json_config_in(&config_dir(), PREFERENCES_FILE)
}

pub fn save_preferences(prefs: &MonitorPreferences) -> Result<(), ConfigError> {
    save_json_config_in(&config_dir(), PREFERENCES_FILE, prefs)
}

// ---------------------------------------------------------------------------
// Structured-text files (platformio.ini)
// ---------------------------------------------------------------------------

/// On-disk encoding of a structured-text file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEncoding {
    #[default]
    Utf8,
    /// Single-byte ISO-8859-1.
    Latin1,
}

impl FileEncoding {
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            FileEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            FileEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }

    pub fn encode(self, text: &str) -> Result<Vec<u8>, ConfigError> {
        match self {
            FileEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            FileEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).map_err(|_| ConfigError::Encoding(c.to_string())))
                .collect(),
        }
    }
}

/// Read a structured-text file. A missing file is an empty document.
pub fn read_structured_file(path: &Path, encoding: FileEncoding) -> Result<StructuredTextDocument, ConfigError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StructuredTextDocument::new()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            });
        }
    };
    let doc = StructuredTextDocument::read(&encoding.decode(&bytes));
    if doc.is_bad_format() {
        tracing::warn!("{} has an option outside any section", path.display());
    }
    Ok(doc)
}

pub fn write_structured_file(
    path: &Path,
    doc: &StructuredTextDocument,
    encoding: FileEncoding,
) -> Result<(), ConfigError> {
    let bytes = encoding.encode(&doc.write())?;
    std::fs::write(path, bytes).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}
