//! Console message formatting for `harden`.
//!
//! Messages are colored only when the target stream is a terminal, so
//! redirected output and test captures stay plain.

use owo_colors::{OwoColorize, Style};
use std::io::{self, Write};

/// Category of a console message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Success,
    Warn,
    Error,
}

impl MessageKind {
    fn style(&self) -> Style {
        match self {
            MessageKind::Info => Style::new().cyan(),
            MessageKind::Success => Style::new().green(),
            MessageKind::Warn => Style::new().yellow(),
            MessageKind::Error => Style::new().red().bold(),
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            MessageKind::Warn => "Warning: ",
            MessageKind::Error => "Error: ",
            _ => "",
        }
    }
}

/// Writes one message line to `writer`, styled when `supports_color`.
pub fn print_message<W: Write>(
    writer: &mut W,
    kind: MessageKind,
    msg: &str,
    supports_color: bool,
) -> io::Result<()> {
    let text = format!("{}{}", kind.prefix(), msg);
    if supports_color {
        writeln!(writer, "{}", text.style(kind.style()))
    } else {
        writeln!(writer, "{}", text)
    }
}

pub fn print_info_message<W: Write>(writer: &mut W, msg: &str, supports_color: bool) -> io::Result<()> {
    print_message(writer, MessageKind::Info, msg, supports_color)
}

pub fn print_success_message<W: Write>(writer: &mut W, msg: &str, supports_color: bool) -> io::Result<()> {
    print_message(writer, MessageKind::Success, msg, supports_color)
}

pub fn print_warn_message<W: Write>(writer: &mut W, msg: &str, supports_color: bool) -> io::Result<()> {
    print_message(writer, MessageKind::Warn, msg, supports_color)
}

pub fn print_error_message<W: Write>(writer: &mut W, msg: &str, supports_color: bool) -> io::Result<()> {
    print_message(writer, MessageKind::Error, msg, supports_color)
}
