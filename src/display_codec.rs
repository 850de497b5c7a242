//! Rendering of raw serial bytes as console text.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::str::FromStr;

/// Bytes per rendered row in hex and mixed modes.
const ROW_WIDTH: usize = 16;
/// A tab separates the two halves of a row.
const GROUP_WIDTH: usize = 8;

/// How raw serial bytes are shown in a monitor console.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// UTF-8 text, carriage returns and `NULL` markers removed.
    #[default]
    Plain,
    /// One char per byte, no decoding.
    Ascii,
    /// Uppercase hex pairs, 16 per row.
    Hex,
    /// Hex pairs with an ASCII gutter on the right.
    Mixed,
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(DisplayMode::Plain),
            "ascii" => Ok(DisplayMode::Ascii),
            "hex" | "hexadecimal" => Ok(DisplayMode::Hex),
            "mixed" => Ok(DisplayMode::Mixed),
            other => Err(format!("unknown display mode: {other}")),
        }
    }
}

/// Converts byte chunks into text for one display mode.
///
/// The only state is the rolling column used by hex mode, so that a row of
/// 16 bytes split across two reads still renders as a single row.
#[derive(Debug, Clone)]
pub struct DisplayCodec {
    mode: DisplayMode,
    column: usize,
}

impl DisplayCodec {
    pub fn new(mode: DisplayMode) -> Self {
        Self { mode, column: 0 }
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    /// Convert a chunk, carrying the column over from the previous chunk.
    pub fn feed(&mut self, bytes: &[u8]) -> String {
        let (text, column) = self.convert(bytes, self.column);
        self.column = column;
        text
    }

    /// Convert `bytes` starting at `offset` within the current row.
    /// Returns the text and the offset to pass with the next chunk.
    pub fn convert(&self, bytes: &[u8], offset: usize) -> (String, usize) {
        match self.mode {
            DisplayMode::Plain => (to_plain(bytes), 0),
            DisplayMode::Ascii => (to_ascii(bytes), 0),
            DisplayMode::Hex => to_hex(bytes, offset),
            DisplayMode::Mixed => (to_mixed(bytes), 0),
        }
    }
}

fn to_plain(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .replace('\r', "")
        .replace("NULL", "")
}

fn to_ascii(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn to_hex(bytes: &[u8], offset: usize) -> (String, usize) {
    let mut out = String::with_capacity(bytes.len() * 3 + bytes.len() / GROUP_WIDTH);
    let mut column = offset % ROW_WIDTH;
    for &b in bytes {
        let _ = write!(out, "{b:02X} ");
        column += 1;
        if column == ROW_WIDTH {
            out.push('\n');
            column = 0;
        } else if column == GROUP_WIDTH {
            out.push('\t');
        }
    }
    (out, column)
}

fn to_mixed(bytes: &[u8]) -> String {
    let mut out = String::new();
    for row in bytes.chunks(ROW_WIDTH) {
        render_mixed_row(row, &mut out);
    }
    out
}

/// One row: hex cells (blank-padded to full width), a tab, the gutter.
fn render_mixed_row(row: &[u8], out: &mut String) {
    let mut gutter = String::with_capacity(ROW_WIDTH);
    for i in 0..ROW_WIDTH {
        match row.get(i) {
            Some(&b) => {
                let _ = write!(out, "{b:02X} ");
                gutter.push(gutter_char(b));
            }
            None => out.push_str("   "),
        }
        if i + 1 == GROUP_WIDTH {
            out.push('\t');
        }
    }
    out.push('\t');
    out.push_str(&gutter);
    out.push('\n');
}

fn gutter_char(b: u8) -> char {
    match b {
        b'\n' => '+',
        0x20..=0x7e => b as char,
        _ => '.',
    }
}
