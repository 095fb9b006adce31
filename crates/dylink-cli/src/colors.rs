//! Styling for progress output.
//!
//! Output stays plain when stdout is not a terminal or `NO_COLOR` is set,
//! so piped build logs carry no escape codes.

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::sync::OnceLock;

/// Role of a piece of output text.
#[derive(Debug, Clone, Copy)]
pub enum Tone {
    Title,
    Worker,
    Step,
    Done,
    Muted,
}

impl Tone {
    fn code(self) -> &'static str {
        match self {
            Tone::Title => "\x1b[1m",
            Tone::Worker => "\x1b[36m",
            Tone::Step => "\x1b[34m",
            Tone::Done => "\x1b[32m",
            Tone::Muted => "\x1b[2m",
        }
    }
}

fn color_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| std::env::var_os("NO_COLOR").is_none() && io::stdout().is_terminal())
}

fn styled(tone: Tone, text: impl Display, color: bool) -> String {
    if color {
        format!("{}{text}\x1b[0m", tone.code())
    } else {
        text.to_string()
    }
}

/// Render `text` in `tone` for stdout.
pub fn paint(tone: Tone, text: impl Display) -> String {
    styled(tone, text, color_enabled())
}

/// Flush stdout so a progress line without a newline shows up immediately.
pub fn flush_stdout() {
    io::stdout().flush().ok();
}
