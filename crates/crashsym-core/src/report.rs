//! # Crash Report
//!
//! Line-level framing of an Apple-style crash report.
//!
//! The parser only recognises what the engine needs: header keys (exception
//! type, crashed thread), thread backtrace lines, and the binary-images
//! section. Every other line is carried through untouched, line terminators
//! (`\n` or `\r\n`) included, so the annotated report diffs cleanly against
//! the input.
//!
//! ```text
//! Exception Type:  EXC_BAD_ACCESS (SIGSEGV)
//! Crashed Thread:  0
//!
//! Thread 0 Crashed:
//! 0   MyApp                   0x0000000000001000 0x1000 + 0
//!
//! Binary Images:
//! 0x1000 - 0x4fff +MyApp arm64 <0123456789abcdef0123456789abcdef> /var/containers/Bundle/Application/X/MyApp.app/MyApp
//! ```

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{CrashsymError, Result};
use crate::hex::parse_hex_str;
use crate::symbols::ImageDescriptor;
use crate::types::{BacktraceFrame, SymbolInfo};

static HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z ]*?)\s*:\s*(.*?)\s*$").expect("valid header regex"));

static THREAD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Thread\s+(\d+)(\s+Crashed)?:").expect("valid thread regex"));

static THREAD_STATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Thread\s+\d+\s+crashed\s+with\s+.*Thread\s+State").expect("valid thread state regex"));

static FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    // Image names may contain spaces; the first hex address after them ends the name.
    Regex::new(r"^(\d+)\s+(.+?)\s+(0x[0-9a-fA-F]+)\s+(.*?)\s*$").expect("valid frame regex")
});

/// `0x1000 + 4096`: the unsymbolicated tail of a frame line.
static IMAGE_OFFSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(0x[0-9a-fA-F]+)\s+\+\s+\d+$").expect("valid image offset regex"));

static BINARY_IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^\s*
        (0x[0-9a-fA-F]+) \s* - \s* (0x[0-9a-fA-F]+) \s+
        \+?(.+?) \s+
        (\S+) \s+
        (?:\(([^)]*)\)\s+)?
        (?:<([^>]*)>\s+)?
        (/.*?)
        \s*$
    ",
    )
    .expect("valid binary image regex")
});

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section
{
    Header,
    Thread,
    ThreadState,
    BinaryImages,
}

/// One backtrace line and where it sits in the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLine
{
    /// Zero-based line index in the report.
    pub line: usize,
    /// Image name as printed on the line.
    pub identifier: String,
    pub frame: BacktraceFrame,
    /// Byte offset of the `image_address + offset` tail, if the line is
    /// still unsymbolicated.
    tail_start: Option<usize>,
}

/// One thread's backtrace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadBacktrace
{
    /// Thread number as printed in the report.
    pub index: usize,
    /// `Thread N Crashed:` marker.
    pub crashed: bool,
    pub frames: Vec<FrameLine>,
}

/// A crash report split into the parts the engine works on.
#[derive(Debug, Clone)]
pub struct CrashReport<'a>
{
    // Report lines with their original terminators.
    lines: Vec<&'a str>,
    /// Value of the `Exception Type:` header.
    pub exception_type: Option<String>,
    /// Value of the `Crashed Thread:` header.
    pub crashed_thread: Option<usize>,
    pub threads: Vec<ThreadBacktrace>,
    /// Binary images in report order.
    pub images: Vec<ImageDescriptor>,
}

impl<'a> CrashReport<'a>
{
    /// Split `content` into header values, backtraces, and binary images.
    ///
    /// ## Errors
    ///
    /// Returns [`CrashsymError::MalformedReport`] if there is no
    /// `Binary Images:` section.
    pub fn parse(content: &'a str) -> Result<Self>
    {
        let mut report = Self {
            lines: content.split_inclusive('\n').collect(),
            exception_type: None,
            crashed_thread: None,
            threads: Vec::new(),
            images: Vec::new(),
        };

        let mut section = Section::Header;
        let mut saw_images = false;
        for (index, line) in report.lines.iter().copied().map(line_body).enumerate() {
            if let Some(caps) = THREAD_RE.captures(line) {
                report.threads.push(ThreadBacktrace {
                    index: caps[1].parse().unwrap_or_default(),
                    crashed: caps.get(2).is_some(),
                    frames: Vec::new(),
                });
                section = Section::Thread;
                continue;
            }
            if THREAD_STATE_RE.is_match(line) {
                section = Section::ThreadState;
                continue;
            }
            if line.trim_end() == "Binary Images:" {
                section = Section::BinaryImages;
                saw_images = true;
                continue;
            }

            match section {
                Section::Header => {
                    if let Some(caps) = HEADER_RE.captures(line) {
                        match &caps[1] {
                            "Exception Type" => report.exception_type = Some(caps[2].to_string()),
                            "Crashed Thread" => {
                                report.crashed_thread = caps[2].split_whitespace().next().and_then(|n| n.parse().ok());
                            }
                            _ => {}
                        }
                    }
                }
                Section::Thread => {
                    if let (Some(frame), Some(thread)) = (parse_frame_line(index, line), report.threads.last_mut()) {
                        thread.frames.push(frame);
                    }
                }
                Section::BinaryImages => {
                    if let Some(mut image) = parse_binary_image_line(line) {
                        image.report_order = report.images.len();
                        report.images.push(image);
                    }
                }
                Section::ThreadState => {}
            }
        }

        if !saw_images {
            return Err(CrashsymError::MalformedReport("missing Binary Images section".to_string()));
        }

        debug!(
            threads = report.threads.len(),
            images = report.images.len(),
            exception_type = report.exception_type.as_deref().unwrap_or(""),
            "parsed crash report"
        );
        Ok(report)
    }

    /// The thread that crashed, by marker or by the `Crashed Thread:` header.
    pub fn crashed(&self) -> Option<&ThreadBacktrace>
    {
        self.threads.iter().find(|thread| thread.crashed).or_else(|| {
            let index = self.crashed_thread?;
            self.threads.iter().find(|thread| thread.index == index)
        })
    }

    /// Total number of backtrace frames across all threads.
    pub fn frame_count(&self) -> usize
    {
        self.threads.iter().map(|thread| thread.frames.len()).sum()
    }

    /// Reassemble the report, rewriting resolved frame lines.
    ///
    /// `resolved` maps line indices to their symbol. Lines without an entry,
    /// or already carrying a symbol, are emitted unchanged.
    pub fn render(&self, resolved: &HashMap<usize, SymbolInfo>) -> String
    {
        let tails: HashMap<usize, usize> = self
            .threads
            .iter()
            .flat_map(|thread| thread.frames.iter())
            .filter_map(|frame| Some((frame.line, frame.tail_start?)))
            .collect();

        let mut output = String::with_capacity(self.lines.iter().map(|line| line.len()).sum());
        for (index, line) in self.lines.iter().enumerate() {
            match (resolved.get(&index), tails.get(&index)) {
                (Some(info), Some(&tail)) => {
                    let body = line_body(line);
                    output.push_str(&body[..tail]);
                    output.push_str(&info.to_string());
                    output.push_str(&line[body.len()..]);
                }
                _ => output.push_str(line),
            }
        }
        output
    }
}

/// `line` without its `\n` or `\r\n` terminator.
fn line_body(line: &str) -> &str
{
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

fn parse_frame_line(index: usize, line: &str) -> Option<FrameLine>
{
    let caps = FRAME_RE.captures(line)?;
    let tail = caps.get(4)?;
    let (image_address, tail_start) = match IMAGE_OFFSET_RE.captures(tail.as_str()) {
        Some(tail_caps) => (parse_hex_str(&tail_caps[1]), Some(tail.start())),
        None => (0, None),
    };

    Some(FrameLine {
        line: index,
        identifier: caps[2].to_string(),
        frame: BacktraceFrame::new(
            caps[1].parse().unwrap_or_default(),
            image_address,
            parse_hex_str(&caps[3]),
        ),
        tail_start,
    })
}

fn parse_binary_image_line(line: &str) -> Option<ImageDescriptor>
{
    let caps = BINARY_IMAGE_RE.captures(line)?;
    Some(ImageDescriptor {
        load_address: parse_hex_str(&caps[1]),
        end_address: parse_hex_str(&caps[2]),
        identifier: caps[3].trim().to_string(),
        arch: caps[4].to_string(),
        uuid: caps.get(6).map(|uuid| uuid.as_str().to_string()),
        path: caps[7].to_string(),
        report_order: 0,
    })
}
