//! Logging utilities for sanitizing multi-line room and player text so logs stay single-line.
//! Escapes control characters that otherwise break log readability.

use std::fmt::Write;

const MAX_PREVIEW: usize = 300;

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///
/// Long strings are truncated at [`MAX_PREVIEW`] characters with an ellipsis.
pub fn escape_log(s: &str) -> String {
    preview(s, MAX_PREVIEW)
}

/// Like [`escape_log`] with a caller-chosen character limit.
pub fn preview(s: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_chars) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= max_chars {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
