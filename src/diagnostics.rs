//! Compiler diagnostic detection in console output.
//!
//! Build tools report problems as `path:line:col: message`. This module is
//! the single place that decides whether a printed line is one of those and
//! whether it is an error or a warning.

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Error,
    Warning,
}

/// One compiler message attached to a file location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub file: String,
    /// Zero-based line.
    pub line: usize,
    pub column: usize,
    pub kind: DiagnosticKind,
    /// Message with the `error: ` / `warning: ` prefix removed.
    pub text: String,
}

/// Matching rules used by the annotation tracker and the message queue.
pub trait LineClassifier: Send + Sync {
    /// Cheap check run on every message before it is printed.
    fn has_signature(&self, text: &str) -> bool;

    /// Parse a single line into a diagnostic.
    fn classify(&self, line: &str) -> Option<Diagnostic>;
}

lazy_static::lazy_static! {
    /// `path:line:col: message`, optionally behind a `HH:MM:SS ` stamp.
    static ref LOCATION_RE: Regex =
        Regex::new(r"^(?:\d{2}:\d{2}:\d{2}\s+)?(.+?):(\d+):(\d+):\s*(.+?)\s*$").unwrap();
}

const STRIPPED_PREFIXES: [&str; 3] = ["fatal error: ", "error: ", "warning: "];

/// Classifier for GCC/Clang style output.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompilerDiagnosticClassifier;

impl LineClassifier for CompilerDiagnosticClassifier {
    fn has_signature(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        lower.contains("error") || lower.contains("warning")
    }

    fn classify(&self, line: &str) -> Option<Diagnostic> {
        let caps = LOCATION_RE.captures(line)?;
        let message = &caps[4];
        let kind = classify_message(message)?;
        let line_no: usize = caps[2].parse().ok()?;
        let column: usize = caps[3].parse().ok()?;

        let text = STRIPPED_PREFIXES
            .iter()
            .find_map(|prefix| message.strip_prefix(prefix))
            .unwrap_or(message);

        Some(Diagnostic {
            file: caps[1].to_string(),
            line: line_no.saturating_sub(1),
            column,
            kind,
            text: text.to_string(),
        })
    }
}

/// Error wins over warning when a message mentions both.
pub fn classify_message(message: &str) -> Option<DiagnosticKind> {
    let lower = message.to_lowercase();
    if lower.contains("error") {
        return Some(DiagnosticKind::Error);
    }
    if lower.contains("warning") {
        return Some(DiagnosticKind::Warning);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gcc_error() {
        let d = CompilerDiagnosticClassifier
            .classify("/src/main.cpp:12:5: error: missing semicolon")
            .unwrap();
        assert_eq!(
            d,
            Diagnostic {
                file: "/src/main.cpp".into(),
                line: 11,
                column: 5,
                kind: DiagnosticKind::Error,
                text: "missing semicolon".into(),
            }
        );
    }

    #[test]
    fn parses_warning() {
        let d = CompilerDiagnosticClassifier
            .classify("src/app.c:3:14: warning: unused variable 'x' [-Wunused-variable]")
            .unwrap();
        assert_eq!(d.kind, DiagnosticKind::Warning);
        assert_eq!(d.line, 2);
        assert_eq!(d.column, 14);
        assert_eq!(d.text, "unused variable 'x' [-Wunused-variable]");
    }

    #[test]
    fn error_takes_precedence_over_warning() {
        let d = CompilerDiagnosticClassifier
            .classify("lib/x.h:1:1: warning: error-prone cast")
            .unwrap();
        assert_eq!(d.kind, DiagnosticKind::Error);
        assert_eq!(d.text, "error-prone cast");
    }

    #[test]
    fn windows_paths_keep_drive_letter() {
        let d = CompilerDiagnosticClassifier
            .classify(r"C:\proj\src\main.cpp:7:2: error: 'foo' was not declared")
            .unwrap();
        assert_eq!(d.file, r"C:\proj\src\main.cpp");
        assert_eq!(d.line, 6);
    }

    #[test]
    fn timestamped_lines_are_recognised() {
        let d = CompilerDiagnosticClassifier
            .classify("10:42:01 src/main.cpp:1:1: fatal error: Wire.h: No such file or directory")
            .unwrap();
        assert_eq!(d.file, "src/main.cpp");
        assert_eq!(d.line, 0);
        assert_eq!(d.text, "Wire.h: No such file or directory");
    }

    #[test]
    fn notes_and_plain_output_are_ignored() {
        let c = CompilerDiagnosticClassifier;
        assert!(c.classify("src/main.cpp:4:1: note: declared here").is_none());
        assert!(c.classify("Compiling .pio/build/uno/src/main.cpp.o").is_none());
        assert!(c.classify("").is_none());
    }

    #[test]
    fn signature_check() {
        let c = CompilerDiagnosticClassifier;
        assert!(c.has_signature("main.cpp:1:1: ERROR: x"));
        assert!(c.has_signature("warning: deprecated"));
        assert!(!c.has_signature("Linking .pio/build/uno/firmware.elf"));
    }
}
