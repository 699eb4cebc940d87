//! Transcoding of color-coded module output into report markup.
//!
//! Remediation modules decorate their progress text with SGR escape codes
//! (bold, blink and the eight basic foreground colors). The report needs the
//! same emphasis as HTML, so each captured line is rewritten: an opening code
//! becomes a start tag, the reset code becomes the end tag of whatever style
//! was last opened.
//!
//! Only one style is tracked at a time. A second opening code before a reset
//! replaces the tracked style without closing the first one, so the eventual
//! reset closes only the later style. Reports produced so far rely on this,
//! so it is kept as is. A style still open when the input ends stays open.
//!
//! License: MIT OR Apache-2.0

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Matches a single-parameter SGR sequence such as `ESC[31m` or `ESC[0m`.
static SGR_SEQUENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[(\d*)m").expect("SGR pattern is valid"));

const RESET_CODE: u32 = 0;

/// The styles of the fixed palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SgrStyle {
    Bold,
    Blink,
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl SgrStyle {
    pub fn from_code(code: u32) -> Option<Self> {
        let style = match code {
            1 => SgrStyle::Bold,
            5 => SgrStyle::Blink,
            30 => SgrStyle::Black,
            31 => SgrStyle::Red,
            32 => SgrStyle::Green,
            33 => SgrStyle::Yellow,
            34 => SgrStyle::Blue,
            35 => SgrStyle::Magenta,
            36 => SgrStyle::Cyan,
            37 => SgrStyle::White,
            _ => return None,
        };
        Some(style)
    }

    pub fn start_tag(&self) -> &'static str {
        match self {
            // Browsers no longer blink; blink is rendered as bold.
            SgrStyle::Bold | SgrStyle::Blink => "<b>",
            SgrStyle::Black => r#"<font color="black">"#,
            SgrStyle::Red => r#"<font color="red">"#,
            SgrStyle::Green => r#"<font color="green">"#,
            SgrStyle::Yellow => r#"<font color="yellow">"#,
            SgrStyle::Blue => r#"<font color="blue">"#,
            SgrStyle::Magenta => r#"<font color="magenta">"#,
            SgrStyle::Cyan => r#"<font color="cyan">"#,
            SgrStyle::White => r#"<font color="white">"#,
        }
    }

    pub fn end_tag(&self) -> &'static str {
        match self {
            SgrStyle::Bold | SgrStyle::Blink => "</b>",
            _ => "</font>",
        }
    }
}

/// Holds the one style that is currently open, if any.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StyleSlot {
    open: Option<SgrStyle>,
}

impl StyleSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<SgrStyle> {
        self.open
    }

    /// Records `style` as open, returning the style it displaced.
    fn open(&mut self, style: SgrStyle) -> Option<SgrStyle> {
        self.open.replace(style)
    }

    fn close(&mut self) -> Option<SgrStyle> {
        self.open.take()
    }
}

/// Rewrites one line, threading the open style through `slot`.
///
/// Escape sequences outside the palette are left untouched. A reset with no
/// open style produces no markup.
pub fn transcode_line(line: &str, slot: &mut StyleSlot) -> String {
    if !line.contains('\x1b') {
        return line.to_string();
    }

    SGR_SEQUENCE
        .replace_all(line, |caps: &Captures| {
            let code = match caps[1].parse::<u32>() {
                Ok(code) => code,
                Err(_) if caps[1].is_empty() => RESET_CODE,
                Err(_) => return caps[0].to_string(),
            };

            if code == RESET_CODE {
                return slot.close().map(|s| s.end_tag()).unwrap_or_default().to_string();
            }

            match SgrStyle::from_code(code) {
                Some(style) => {
                    slot.open(style);
                    style.start_tag().to_string()
                }
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Stateful transcoder over a whole transcript.
#[derive(Debug, Default)]
pub struct Transcoder {
    slot: StyleSlot,
}

impl Transcoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, line: &str) -> String {
        transcode_line(line, &mut self.slot)
    }

    /// Style left open after the last processed line.
    pub fn open_style(&self) -> Option<SgrStyle> {
        self.slot.current()
    }
}

/// Transcodes a sequence of lines with a fresh style slot.
pub fn transcode_lines<I, S>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut transcoder = Transcoder::new();
    lines.into_iter().map(|l| transcoder.line(l.as_ref())).collect()
}
