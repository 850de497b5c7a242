//! Build tool binary resolution with caching.
//!
//! Editors launched from a desktop session don't inherit the user's shell
//! PATH, and PlatformIO installs its CLI into a private virtualenv, so `pio`
//! is usually not found by name. This module probes well-known directories
//! and caches the results for the lifetime of the process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Names the build tool answers to, in preference order.
pub const BUILD_TOOL_NAMES: [&str; 2] = ["pio", "platformio"];

/// Well-known directories where the build tool lives but that are not on
/// PATH. Computed once and cached via OnceLock.
fn extra_bin_dirs() -> &'static [PathBuf] {
    static DIRS: OnceLock<Vec<PathBuf>> = OnceLock::new();
    DIRS.get_or_init(|| {
        let home = dirs::home_dir().unwrap_or_default();
        let mut dirs = Vec::new();

        #[cfg(not(target_os = "windows"))]
        {
            dirs.push(home.join(".platformio/penv/bin"));
            dirs.push(home.join(".local/bin"));
            dirs.push(PathBuf::from("/usr/local/bin"));
            dirs.push(PathBuf::from("/usr/bin"));
        }

        #[cfg(target_os = "macos")]
        {
            dirs.push(PathBuf::from("/opt/homebrew/bin"));
        }

        #[cfg(target_os = "windows")]
        {
            dirs.push(home.join(".platformio\\penv\\Scripts"));
            if let Some(local) = dirs::data_local_dir() {
                dirs.push(local.join("Programs\\Python\\Scripts"));
            }
        }

        dirs.retain(|d| !d.as_os_str().is_empty());
        dirs
    })
}

fn executable_name(name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// Resolve a CLI binary to its full path, probing well-known directories.
/// Falls back to the bare name so the OS can still search PATH.
///
/// Results are cached per binary name; tool locations don't change at runtime.
pub fn resolve_cli(name: &str) -> String {
    static CACHE: OnceLock<parking_lot::Mutex<HashMap<String, String>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| parking_lot::Mutex::new(HashMap::new()));

    if let Some(cached) = cache.lock().get(name) {
        return cached.clone();
    }

    let resolved = resolve_cli_in(name, extra_bin_dirs());
    cache.lock().insert(name.to_string(), resolved.clone());
    resolved
}

fn resolve_cli_in(name: &str, dirs: &[PathBuf]) -> String {
    let file = executable_name(name);
    dirs.iter()
        .map(|dir| dir.join(&file))
        .find(|candidate| candidate.is_file())
        .map(|candidate| candidate.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

/// The first build tool binary found, or `pio` to let PATH decide.
pub fn resolve_build_tool() -> String {
    BUILD_TOOL_NAMES
        .iter()
        .map(|name| resolve_cli(name))
        .find(|resolved| Path::new(resolved).is_absolute())
        .unwrap_or_else(|| BUILD_TOOL_NAMES[0].to_string())
}
