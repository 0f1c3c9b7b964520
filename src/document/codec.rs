//! RTF serialization for [`Document`].
//!
//! The writer emits a small, stable subset of RTF 1. The reader accepts the
//! same subset plus whatever other writers (older versions of this crate,
//! Cocoa's RTF exporter, word processors) tend to produce: destination groups
//! are skipped and unknown control words are ignored.

use std::fmt::Write as _;

use thiserror::Error;

use super::{normalize_line_breaks, Document, Run, RunAttributes, PARAGRAPH_SEPARATOR};

const HEADER: &str = "{\\rtf1\\ansi\\ansicpg1252\\deff0{\\fonttbl{\\f0\\fswiss Helvetica;}}\\f0\\fs24 ";
const MAX_GROUP_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode document: {0}")]
    Encoding(String),
    #[error("malformed rich text at byte {offset}: {reason}")]
    Decoding { offset: usize, reason: String },
}

pub fn encode(document: &Document) -> Result<Vec<u8>, CodecError> {
    let mut out = String::with_capacity(HEADER.len() + document.len() * 2);
    out.push_str(HEADER);
    let mut current = RunAttributes::empty();
    for run in document.runs() {
        write_attribute_switch(&mut out, current, run.attributes)
            .map_err(|err| CodecError::Encoding(err.to_string()))?;
        current = run.attributes;
        for ch in run.text.chars() {
            write_char(&mut out, ch).map_err(|err| CodecError::Encoding(err.to_string()))?;
        }
    }
    out.push('}');
    Ok(out.into_bytes())
}

pub fn decode(bytes: &[u8]) -> Result<Document, CodecError> {
    Reader::new(bytes)?.read()
}

/// Wraps legacy plain text as a single unstyled run.
pub fn plain_text_to_document(text: &str) -> Document {
    Document::plain(&normalize_line_breaks(text))
}

fn write_attribute_switch(
    out: &mut String,
    from: RunAttributes,
    to: RunAttributes,
) -> std::fmt::Result {
    let mut changed = false;
    if from.contains(RunAttributes::BOLD) != to.contains(RunAttributes::BOLD) {
        out.push_str(if to.contains(RunAttributes::BOLD) {
            "\\b"
        } else {
            "\\b0"
        });
        changed = true;
    }
    if from.contains(RunAttributes::ITALIC) != to.contains(RunAttributes::ITALIC) {
        out.push_str(if to.contains(RunAttributes::ITALIC) {
            "\\i"
        } else {
            "\\i0"
        });
        changed = true;
    }
    if changed {
        out.push(' ');
    }
    Ok(())
}

fn write_char(out: &mut String, ch: char) -> std::fmt::Result {
    match ch {
        PARAGRAPH_SEPARATOR => out.push_str("\\par\n"),
        '\t' => out.push_str("\\tab "),
        '\\' | '{' | '}' => {
            out.push('\\');
            out.push(ch);
        }
        ch if ch.is_ascii() && !ch.is_ascii_control() => out.push(ch),
        ch => {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(out, "\\u{}?", *unit as i16)?;
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct GroupState {
    attributes: RunAttributes,
    skip: bool,
    unicode_skip: usize,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    stack: Vec<GroupState>,
    state: GroupState,
    runs: Vec<Run>,
    pending_skip: usize,
    high_surrogate: Option<u16>,
    group_start: bool,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self, CodecError> {
        let start = bytes
            .iter()
            .position(|byte| !byte.is_ascii_whitespace())
            .unwrap_or(bytes.len());
        if !bytes[start..].starts_with(b"{\\rtf") {
            return Err(CodecError::Decoding {
                offset: start,
                reason: "missing {\\rtf header".into(),
            });
        }
        Ok(Self {
            bytes,
            pos: start,
            stack: Vec::new(),
            state: GroupState {
                attributes: RunAttributes::empty(),
                skip: false,
                unicode_skip: 1,
            },
            runs: Vec::new(),
            pending_skip: 0,
            high_surrogate: None,
            group_start: false,
        })
    }

    fn read(mut self) -> Result<Document, CodecError> {
        let mut closed_root = false;
        while self.pos < self.bytes.len() {
            let byte = self.bytes[self.pos];
            match byte {
                b'{' => {
                    if closed_root {
                        break;
                    }
                    if self.stack.len() >= MAX_GROUP_DEPTH {
                        return Err(self.error("groups nested too deeply"));
                    }
                    self.stack.push(self.state);
                    self.pos += 1;
                    self.pending_skip = 0;
                    self.group_start = true;
                    continue;
                }
                b'}' => {
                    self.state = self
                        .stack
                        .pop()
                        .ok_or_else(|| self.error("unbalanced closing brace"))?;
                    self.pos += 1;
                    self.pending_skip = 0;
                    if self.stack.is_empty() {
                        closed_root = true;
                    }
                }
                b'\\' => self.control()?,
                b'\r' | b'\n' => self.pos += 1,
                _ => {
                    if closed_root {
                        break;
                    }
                    let ch = self.next_text_char();
                    self.emit(ch);
                }
            }
            self.group_start = false;
        }
        if !self.stack.is_empty() || !closed_root {
            return Err(self.error("unexpected end of input inside a group"));
        }
        Ok(Document::from_runs(self.runs))
    }

    fn control(&mut self) -> Result<(), CodecError> {
        let group_start = self.group_start;
        self.pos += 1;
        let Some(&next) = self.bytes.get(self.pos) else {
            return Err(self.error("dangling backslash"));
        };
        if !next.is_ascii_alphabetic() {
            self.pos += 1;
            match next {
                b'\\' | b'{' | b'}' => self.emit(next as char),
                b'~' => self.emit('\u{00A0}'),
                b'-' | b'_' => {}
                b'*' => self.state.skip = true,
                b'\'' => {
                    let hex = self
                        .bytes
                        .get(self.pos..self.pos + 2)
                        .and_then(|pair| std::str::from_utf8(pair).ok())
                        .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                        .ok_or_else(|| self.error("invalid \\' escape"))?;
                    self.pos += 2;
                    self.emit(cp1252_to_char(hex));
                }
                b'\n' | b'\r' => self.emit(PARAGRAPH_SEPARATOR),
                _ => {}
            }
            return Ok(());
        }

        let word_start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|byte| byte.is_ascii_alphabetic())
        {
            self.pos += 1;
        }
        let word = std::str::from_utf8(&self.bytes[word_start..self.pos]).unwrap_or_default();
        let param_start = self.pos;
        if self.bytes.get(self.pos) == Some(&b'-') {
            self.pos += 1;
        }
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|byte| byte.is_ascii_digit())
        {
            self.pos += 1;
        }
        let param = std::str::from_utf8(&self.bytes[param_start..self.pos])
            .ok()
            .and_then(|raw| raw.parse::<i32>().ok());
        if self.bytes.get(self.pos) == Some(&b' ') {
            self.pos += 1;
        }

        if group_start && is_destination(word) {
            self.state.skip = true;
            return Ok(());
        }

        match word {
            "b" => self.set_flag(RunAttributes::BOLD, param != Some(0)),
            "i" => self.set_flag(RunAttributes::ITALIC, param != Some(0)),
            "plain" => self.state.attributes = RunAttributes::empty(),
            "par" | "line" => self.emit(PARAGRAPH_SEPARATOR),
            "tab" => self.emit('\t'),
            "bullet" => self.emit('\u{2022}'),
            "emdash" => self.emit('\u{2014}'),
            "endash" => self.emit('\u{2013}'),
            "lquote" => self.emit('\u{2018}'),
            "rquote" => self.emit('\u{2019}'),
            "ldblquote" => self.emit('\u{201C}'),
            "rdblquote" => self.emit('\u{201D}'),
            "uc" => self.state.unicode_skip = param.unwrap_or(1).max(0) as usize,
            "u" => {
                let value = param.ok_or_else(|| self.error("\\u without a value"))?;
                self.emit_utf16(value as i16 as u16);
                self.pending_skip = self.state.unicode_skip;
            }
            _ => {}
        }
        Ok(())
    }

    fn set_flag(&mut self, flag: RunAttributes, on: bool) {
        self.state.attributes.set(flag, on);
    }

    fn next_text_char(&mut self) -> char {
        let rest = &self.bytes[self.pos..];
        let lead = rest[0];
        if lead.is_ascii() {
            self.pos += 1;
            return lead as char;
        }
        // Writers are supposed to stay 7-bit, but UTF-8 shows up in the wild.
        let width = match lead {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        if let Some(ch) = rest
            .get(..width)
            .and_then(|chunk| std::str::from_utf8(chunk).ok())
            .and_then(|chunk| chunk.chars().next())
        {
            self.pos += width;
            return ch;
        }
        self.pos += 1;
        cp1252_to_char(lead)
    }

    fn emit_utf16(&mut self, unit: u16) {
        if (0xD800..0xDC00).contains(&unit) {
            self.high_surrogate = Some(unit);
            return;
        }
        let decoded = match self.high_surrogate.take() {
            Some(high) if (0xDC00..0xE000).contains(&unit) => {
                char::decode_utf16([high, unit]).next().and_then(Result::ok)
            }
            _ => char::from_u32(u32::from(unit)),
        };
        let ch = decoded.unwrap_or(char::REPLACEMENT_CHARACTER);
        self.write(ch);
    }

    fn emit(&mut self, ch: char) {
        if self.pending_skip > 0 {
            self.pending_skip -= 1;
            return;
        }
        self.write(ch);
    }

    fn write(&mut self, ch: char) {
        if self.state.skip || self.stack.is_empty() {
            return;
        }
        let attributes = self.state.attributes;
        match self.runs.last_mut() {
            Some(run) if run.attributes == attributes => run.text.push(ch),
            _ => self.runs.push(Run::new(ch, attributes)),
        }
    }

    fn error(&self, reason: &str) -> CodecError {
        CodecError::Decoding {
            offset: self.pos,
            reason: reason.to_string(),
        }
    }
}

fn is_destination(word: &str) -> bool {
    matches!(
        word,
        "fonttbl"
            | "colortbl"
            | "expandedcolortbl"
            | "stylesheet"
            | "info"
            | "listtable"
            | "listoverridetable"
            | "listtext"
            | "pict"
            | "header"
            | "footer"
            | "footnote"
            | "field"
            | "fldinst"
            | "themedata"
            | "generator"
            | "xmlnstbl"
            | "rsidtbl"
    )
}

fn cp1252_to_char(byte: u8) -> char {
    const HIGH: [char; 32] = [
        '\u{20AC}', '\u{FFFD}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}',
        '\u{2021}', '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{FFFD}',
        '\u{017D}', '\u{FFFD}', '\u{FFFD}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}',
        '\u{2022}', '\u{2013}', '\u{2014}', '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}',
        '\u{0153}', '\u{FFFD}', '\u{017E}', '\u{0178}',
    ];
    match byte {
        0x80..=0x9F => HIGH[usize::from(byte - 0x80)],
        other => char::from(other),
    }
}
