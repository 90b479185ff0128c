//! Human-readable messages for query compilation errors.
//!
//! The engine reports a failed query as a byte offset into the pattern plus an
//! error category. This module turns that pair into a message anchored at a
//! line and column, without touching the guest.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_-]*").expect("identifier pattern is valid")
});

/// Query error category, as encoded by the engine's `TSQueryError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryErrorKind {
    /// No error
    None,
    /// Malformed pattern
    Syntax,
    /// Unknown node type
    NodeType,
    /// Unknown field name
    Field,
    /// Unknown capture name
    Capture,
    /// Impossible pattern structure
    Structure,
    /// Language mismatch
    Language,
    /// A code this binding does not know about
    Unknown(u32),
}

impl QueryErrorKind {
    /// Map the engine's numeric code.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => QueryErrorKind::None,
            1 => QueryErrorKind::Syntax,
            2 => QueryErrorKind::NodeType,
            3 => QueryErrorKind::Field,
            4 => QueryErrorKind::Capture,
            5 => QueryErrorKind::Structure,
            6 => QueryErrorKind::Language,
            other => QueryErrorKind::Unknown(other),
        }
    }

    /// Name used in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryErrorKind::None => "none",
            QueryErrorKind::Syntax => "syntax",
            QueryErrorKind::NodeType => "node type",
            QueryErrorKind::Field => "field",
            QueryErrorKind::Capture => "capture",
            QueryErrorKind::Structure => "structure",
            QueryErrorKind::Language => "language",
            QueryErrorKind::Unknown(_) => "unknown",
        }
    }

    /// Errors that point at a single identifier rather than a position.
    pub fn names_identifier(&self) -> bool {
        matches!(
            self,
            QueryErrorKind::NodeType | QueryErrorKind::Field | QueryErrorKind::Capture
        )
    }
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved error position. Line is 1-based, column is a 0-based byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    /// 1-based line number
    pub line: usize,
    /// Byte distance from the start of the line
    pub column: usize,
    /// Byte offset where the line starts
    pub line_start: usize,
}

/// Locate a byte offset in `source`. Offsets past the end clamp to the end.
pub fn locate(source: &str, offset: usize) -> SourcePosition {
    let offset = offset.min(source.len());
    let mut line = 1;
    let mut line_start = 0;
    for (i, byte) in source.as_bytes()[..offset].iter().enumerate() {
        if *byte == b'\n' {
            line += 1;
            line_start = i + 1;
        }
    }
    SourcePosition {
        line,
        column: offset - line_start,
        line_start,
    }
}

/// Build the message for a query that failed to compile.
pub fn describe_query_error(pattern: &str, offset: u32, kind: QueryErrorKind) -> String {
    let offset = (offset as usize).min(pattern.len());
    let position = locate(pattern, offset);
    let (line, column) = (position.line, position.column);

    if kind.names_identifier() {
        let token = pattern
            .get(offset..)
            .and_then(|rest| IDENTIFIER.find(rest))
            .map(|m| m.as_str());
        return match token {
            Some(token) => format!(
                "invalid {} '{}' at line {} column {}",
                kind, token, line, column
            ),
            None => format!("invalid {} at line {} column {}", kind, line, column),
        };
    }

    let rest = &pattern[position.line_start..];
    let source_line = rest.split('\n').next().unwrap_or(rest);
    format!(
        "invalid {} at line {} column {}\n{}\n{}^",
        kind,
        line,
        column,
        source_line,
        " ".repeat(column)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unclosed_paren_points_past_input() {
        let message = describe_query_error("(a (b)", 6, QueryErrorKind::Syntax);
        assert!(message.contains("at line 1 column 6"));

        let caret_line = message.lines().last().unwrap();
        assert_eq!(caret_line, "      ^");
        assert_eq!(caret_line.len() - caret_line.trim_start().len(), 6);
        assert_eq!(message, "invalid syntax at line 1 column 6\n(a (b)\n      ^");
    }

    #[test]
    fn test_node_type_names_identifier() {
        let message =
            describe_query_error("(identifier)\n(bogus_node) @x", 14, QueryErrorKind::NodeType);
        assert_eq!(message, "invalid node type 'bogus_node' at line 2 column 1");
    }

    #[test]
    fn test_identifier_allows_dashes() {
        let message = describe_query_error("(call @fn-name)", 7, QueryErrorKind::Capture);
        assert_eq!(message, "invalid capture 'fn-name' at line 1 column 7");
    }

    #[test]
    fn test_identifier_kind_without_token() {
        let message = describe_query_error("(call field: )", 12, QueryErrorKind::Field);
        assert_eq!(message, "invalid field at line 1 column 12");
    }

    #[test]
    fn test_position_error_on_later_line() {
        let pattern = "(a)\n(b\n  (c)";
        let message = describe_query_error(pattern, 9, QueryErrorKind::Structure);
        assert_eq!(message, "invalid structure at line 3 column 2\n  (c)\n  ^");
    }

    #[test]
    fn test_unknown_code_formats_as_position() {
        let kind = QueryErrorKind::from_code(42);
        assert_eq!(kind, QueryErrorKind::Unknown(42));
        let message = describe_query_error("(a)", 1, kind);
        assert!(message.starts_with("invalid unknown at line 1 column 1\n(a)\n"));
        assert!(message.ends_with("\n ^"));
    }

    #[test]
    fn test_offset_clamped_to_pattern() {
        let message = describe_query_error("(a", 99, QueryErrorKind::Syntax);
        assert!(message.starts_with("invalid syntax at line 1 column 2"));
    }

    #[test]
    fn test_offset_inside_multibyte_char() {
        // offset 2 lands inside 'é'; no identifier can start there
        let message = describe_query_error("(é)", 2, QueryErrorKind::NodeType);
        assert_eq!(message, "invalid node type at line 1 column 2");
    }

    #[test]
    fn test_locate_tracks_line_start() {
        let position = locate("ab\ncd\nef", 7);
        assert_eq!(
            position,
            SourcePosition {
                line: 3,
                column: 1,
                line_start: 6,
            }
        );
    }

    #[test]
    fn test_kind_codes_round_trip_names() {
        let names: Vec<&str> = (0..7)
            .map(|code| QueryErrorKind::from_code(code).as_str())
            .collect();
        assert_eq!(
            names,
            ["none", "syntax", "node type", "field", "capture", "structure", "language"]
        );
    }
}
