//! Parameter marker rewriting.
//!
//! Queries may use positional `?` markers or named `:name` markers. Providers
//! only understand positional ones, so named markers are rewritten to `?`
//! and their names kept in marker order. Quoted strings, quoted identifiers
//! and comments are copied untouched.

use crate::error::{Diagnostic, Error, Result};
use crate::protocol::constants::SQLSTATE_BAD_PARAMETER;
use crate::protocol::status::HResult;
use std::borrow::Cow;

/// A query with positional markers only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery<'a> {
    pub text: Cow<'a, str>,
    /// One entry per marker; the name for named markers.
    pub markers: Vec<Option<String>>,
}

impl ParsedQuery<'_> {
    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// 1-based ordinals of every marker carrying `name`.
    pub fn ordinals_of(&self, name: &str) -> Vec<usize> {
        let name = name.trim_start_matches(':');
        self.markers
            .iter()
            .enumerate()
            .filter(|(_, marker)| marker.as_deref() == Some(name))
            .map(|(idx, _)| idx + 1)
            .collect()
    }

    pub fn is_named(&self) -> bool {
        self.markers.iter().any(Option::is_some)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    Bracketed,
    LineComment,
    BlockComment,
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Rewrite named markers into positional ones.
///
/// Returns a borrowed query when nothing changed. Mixing named and
/// positional markers is rejected.
pub fn rewrite_placeholders(sql: &str) -> Result<ParsedQuery<'_>> {
    let bytes = sql.as_bytes();
    let mut out: Option<String> = None;
    let mut copied = 0;
    let mut markers = Vec::new();
    let mut state = State::Normal;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        let next = bytes.get(idx + 1).copied();
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                b'[' => state = State::Bracketed,
                b'-' if next == Some(b'-') => state = State::LineComment,
                b'/' if next == Some(b'*') => {
                    state = State::BlockComment;
                    idx += 1;
                }
                b'?' => markers.push(None),
                b':' if next == Some(b':') => idx += 1,
                b':' if next.is_some_and(is_name_byte) => {
                    let end = bytes[idx + 1..]
                        .iter()
                        .position(|b| !is_name_byte(*b))
                        .map_or(bytes.len(), |len| idx + 1 + len);
                    let buf = out.get_or_insert_with(String::new);
                    buf.push_str(&sql[copied..idx]);
                    buf.push('?');
                    markers.push(Some(sql[idx + 1..end].to_string()));
                    copied = end;
                    idx = end;
                    continue;
                }
                _ => {}
            },
            State::SingleQuoted if b == b'\'' => {
                if next == Some(b'\'') {
                    idx += 1;
                } else {
                    state = State::Normal;
                }
            }
            State::DoubleQuoted if b == b'"' => {
                if next == Some(b'"') {
                    idx += 1;
                } else {
                    state = State::Normal;
                }
            }
            State::Bracketed if b == b']' => state = State::Normal,
            State::LineComment if b == b'\n' => state = State::Normal,
            State::BlockComment if b == b'*' && next == Some(b'/') => {
                state = State::Normal;
                idx += 1;
            }
            _ => {}
        }
        idx += 1;
    }

    let named = markers.iter().filter(|m| m.is_some()).count();
    if named > 0 && named < markers.len() {
        return Err(Error::Prepare(Diagnostic::new(
            HResult::E_FAIL,
            SQLSTATE_BAD_PARAMETER,
            "Invalid parameter number: mixed named and positional parameters",
        )));
    }

    let text = match out {
        Some(mut buf) => {
            buf.push_str(&sql[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(sql),
    };
    Ok(ParsedQuery { text, markers })
}
