//! Tolerant INI-style document used for `platformio.ini` and friends.
//!
//! Unlike a plain key/value loader, the document keeps every comment and
//! blank line in its original position so that a read/modify/write cycle
//! only touches the options that were actually changed. Options may carry
//! several values, one per indented continuation line:
//!
//! ```ini
//! [env:uno]
//! platform = atmelavr
//! lib_deps =
//!   ArduinoJson
//!   Servo
//! ```
//!
//! Malformed input never fails: an option found before any section header
//! marks the document as bad-format and parsing stops there. Callers are
//! expected to check [`StructuredTextDocument::is_bad_format`] before
//! writing the document back.

use regex::Regex;

/// Classification of a single source line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    Blank,
    Comment,
    /// Header name and the raw text after `]` when it carries a comment.
    Section { name: String, comment: Option<String> },
    Option { key: String, value: String },
    Continuation(String),
    /// Anything the classifier does not recognise. Kept verbatim.
    Unknown,
}

/// Line classification rules used by [`StructuredTextDocument::read_with`].
pub trait FormatParser: Send + Sync {
    fn classify(&self, line: &str) -> LineKind;
}

lazy_static::lazy_static! {
    static ref SECTION_RE: Regex =
        Regex::new(r"^\[\s*([^\]]+?)\s*\](\s*[#;].*)?$").unwrap();
    // Keys never start with whitespace, so indented lines fall through to
    // the continuation rule.
    static ref OPTION_RE: Regex =
        Regex::new(r"^([^\s=:#;\[][^=:]*?)\s*[=:]\s*(.*?)\s*$").unwrap();
    static ref CONTINUATION_RE: Regex = Regex::new(r"^\s+(\S.*?)\s*$").unwrap();
}

/// Default regex classifier. Rules are applied in a fixed order:
/// blank, comment, section, option, continuation.
#[derive(Debug, Default, Clone, Copy)]
pub struct IniLineClassifier;

impl FormatParser for IniLineClassifier {
    fn classify(&self, line: &str) -> LineKind {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineKind::Blank;
        }
        if trimmed.starts_with('#') || trimmed.starts_with(';') {
            return LineKind::Comment;
        }
        if let Some(caps) = SECTION_RE.captures(trimmed) {
            return LineKind::Section {
                name: caps[1].to_string(),
                comment: caps.get(2).map(|m| m.as_str().to_string()),
            };
        }
        if let Some(caps) = OPTION_RE.captures(line) {
            return LineKind::Option {
                key: caps[1].to_string(),
                value: caps[2].to_string(),
            };
        }
        if let Some(caps) = CONTINUATION_RE.captures(line) {
            return LineKind::Continuation(caps[1].to_string());
        }
        LineKind::Unknown
    }
}

/// One entry of the document, in source order.
///
/// Options belong to the closest preceding [`Entry::Section`].
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Blank,
    Comment(String),
    Section {
        name: String,
        /// Trailing `; ...` / `# ...` of the header line, spacing included.
        comment: Option<String>,
    },
    Option {
        key: String,
        values: Vec<String>,
        /// Comment lines between continuation values: `(i, line)` is
        /// written right before `values[i]`.
        comments: Vec<(usize, String)>,
    },
    Verbatim(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredTextDocument {
    entries: Vec<Entry>,
    bad_format: bool,
}

impl StructuredTextDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `source` with the default [`IniLineClassifier`].
    pub fn read(source: &str) -> Self {
        Self::read_with(source, &IniLineClassifier)
    }

    pub fn read_with(source: &str, parser: &dyn FormatParser) -> Self {
        let mut doc = Self::new();
        let mut in_section = false;
        // Index of the option currently receiving continuation lines.
        let mut open_option: Option<usize> = None;
        // Comments seen inside an open option. They become part of the
        // option only if another continuation value follows.
        let mut held_comments: Vec<String> = Vec::new();

        for line in source.lines() {
            let kind = parser.classify(line);
            match kind {
                LineKind::Comment if open_option.is_some() => {
                    held_comments.push(line.to_string());
                    continue;
                }
                LineKind::Continuation(_) => {}
                _ => doc.entries.extend(held_comments.drain(..).map(Entry::Comment)),
            }

            match kind {
                LineKind::Blank => {
                    open_option = None;
                    doc.entries.push(Entry::Blank);
                }
                LineKind::Comment => {
                    doc.entries.push(Entry::Comment(line.to_string()));
                }
                LineKind::Section { name, comment } => {
                    open_option = None;
                    in_section = true;
                    doc.entries.push(Entry::Section { name, comment });
                }
                LineKind::Option { key, value } => {
                    if !in_section {
                        doc.bad_format = true;
                        break;
                    }
                    let values = if value.is_empty() { Vec::new() } else { vec![value] };
                    doc.entries.push(Entry::Option {
                        key,
                        values,
                        comments: Vec::new(),
                    });
                    open_option = Some(doc.entries.len() - 1);
                }
                LineKind::Continuation(value) => match open_option {
                    Some(idx) => {
                        if let Entry::Option { values, comments, .. } = &mut doc.entries[idx] {
                            let at = values.len();
                            comments.extend(held_comments.drain(..).map(|c| (at, c)));
                            values.push(value);
                        }
                    }
                    None => doc.entries.push(Entry::Verbatim(line.to_string())),
                },
                LineKind::Unknown => {
                    open_option = None;
                    doc.entries.push(Entry::Verbatim(line.to_string()));
                }
            }
        }
        doc.entries.extend(held_comments.drain(..).map(Entry::Comment));

        doc
    }

    /// True when an option appeared before any section header.
    pub fn is_bad_format(&self) -> bool {
        self.bad_format
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn sections(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                Entry::Section { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.section_index(section).is_some()
    }

    pub fn has_option(&self, section: &str, option: &str) -> bool {
        self.option_index(section, option).is_some()
    }

    /// Option keys of `section`, in source order.
    pub fn options(&self, section: &str) -> Vec<&str> {
        let Some(start) = self.section_index(section) else {
            return Vec::new();
        };
        self.entries[start + 1..self.section_end(start)]
            .iter()
            .filter_map(|e| match e {
                Entry::Option { key, .. } => Some(key.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn get(&self, section: &str, option: &str) -> Option<&[String]> {
        let idx = self.option_index(section, option)?;
        match &self.entries[idx] {
            Entry::Option { values, .. } => Some(values.as_slice()),
            _ => None,
        }
    }

    /// First value of a (possibly multi-value) option.
    pub fn get_first(&self, section: &str, option: &str) -> Option<&str> {
        self.get(section, option)?.first().map(String::as_str)
    }

    /// Register a new section at the end of the document.
    /// Returns false if it already exists.
    pub fn add_section(&mut self, section: &str) -> bool {
        if self.has_section(section) {
            return false;
        }
        if !self.entries.is_empty() && !matches!(self.entries.last(), Some(Entry::Blank)) {
            self.entries.push(Entry::Blank);
        }
        self.entries.push(Entry::Section {
            name: section.to_string(),
            comment: None,
        });
        true
    }

    /// Set a single-value option. Returns false (and does nothing) when the
    /// section has not been registered.
    pub fn set(&mut self, section: &str, option: &str, value: &str) -> bool {
        self.set_values(section, option, vec![value.to_string()])
    }

    pub fn set_values(&mut self, section: &str, option: &str, new_values: Vec<String>) -> bool {
        let Some(start) = self.section_index(section) else {
            return false;
        };
        if let Some(idx) = self.option_index(section, option) {
            if let Entry::Option { values, .. } = &mut self.entries[idx] {
                *values = new_values;
            }
            return true;
        }

        // Insert after the last option of the section, or right after the
        // header when the section has none yet.
        let end = self.section_end(start);
        let insert_at = self.entries[start + 1..end]
            .iter()
            .rposition(|e| matches!(e, Entry::Option { .. }))
            .map(|pos| start + 1 + pos + 1)
            .unwrap_or(start + 1);
        self.entries.insert(
            insert_at,
            Entry::Option {
                key: option.to_string(),
                values: new_values,
                comments: Vec::new(),
            },
        );
        true
    }

    /// Remove a section together with everything up to the next header.
    pub fn remove_section(&mut self, section: &str) -> bool {
        let Some(start) = self.section_index(section) else {
            return false;
        };
        let end = self.section_end(start);
        self.entries.drain(start..end);
        true
    }

    pub fn remove_option(&mut self, section: &str, option: &str) -> bool {
        match self.option_index(section, option) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Render the document back to text.
    pub fn write(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            match entry {
                Entry::Blank => {}
                Entry::Comment(text) | Entry::Verbatim(text) => out.push_str(text),
                Entry::Section { name, comment } => {
                    out.push('[');
                    out.push_str(name);
                    out.push(']');
                    if let Some(comment) = comment {
                        out.push_str(comment);
                    }
                }
                Entry::Option { key, values, comments } => {
                    out.push_str(key);
                    match values.as_slice() {
                        [single] if comments.is_empty() => {
                            out.push_str(" = ");
                            out.push_str(single);
                        }
                        _ => {
                            out.push_str(" =");
                            for (i, value) in values.iter().enumerate() {
                                write_comments(&mut out, comments, |at| at == i);
                                out.push_str("\n  ");
                                out.push_str(value);
                            }
                            write_comments(&mut out, comments, |at| at >= values.len());
                        }
                    }
                }
            }
            out.push('\n');
        }
        out
    }

    fn section_index(&self, section: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| matches!(e, Entry::Section { name, .. } if name == section))
    }

    /// Exclusive end of the section starting at `start`.
    fn section_end(&self, start: usize) -> usize {
        self.entries[start + 1..]
            .iter()
            .position(|e| matches!(e, Entry::Section { .. }))
            .map(|pos| start + 1 + pos)
            .unwrap_or(self.entries.len())
    }

    fn option_index(&self, section: &str, option: &str) -> Option<usize> {
        let start = self.section_index(section)?;
        let end = self.section_end(start);
        self.entries[start + 1..end]
            .iter()
            .position(|e| matches!(e, Entry::Option { key, .. } if key == option))
            .map(|pos| start + 1 + pos)
    }
}

fn write_comments(out: &mut String, comments: &[(usize, String)], at: impl Fn(usize) -> bool) {
    for (_, line) in comments.iter().filter(|(pos, _)| at(*pos)) {
        out.push('\n');
        out.push_str(line);
    }
}
