// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Input sanitization for metric names, tag keys, tag values and sources.
//!
//! The line protocol carries two flavours of quoted strings: identifiers
//! (metric names, point-tag keys) where only a restricted character set is
//! allowed, and values (point-tag values, sources) where arbitrary text is
//! escaped instead of replaced.

use crate::constants::{DELTA_PREFIX, DELTA_PREFIX_2};

/// Sanitize a metric name or point-tag key into a quoted identifier.
///
/// Characters in `[-,./0-9A-Za-z_]` pass through. A leading `~` (internal
/// metric marker) or delta prefix is preserved, and a `~` in second position
/// is kept only when it follows a delta prefix. Everything else becomes `-`.
pub fn sanitize_name(s: &str) -> String {
    let delta_prefixed = s.starts_with(DELTA_PREFIX) || s.starts_with(DELTA_PREFIX_2);
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for (i, c) in s.chars().enumerate() {
        let legal = matches!(c, '-' | ',' | '.' | '/' | '_' | '0'..='9' | 'A'..='Z' | 'a'..='z')
            || (i == 0 && (c == '~' || c == DELTA_PREFIX || c == DELTA_PREFIX_2))
            || (i == 1 && c == '~' && delta_prefixed);
        out.push(if legal { c } else { '-' });
    }
    out.push('"');
    out
}

/// Sanitize a point-tag value or source: trim outer whitespace, escape
/// embedded quotes and newlines, and wrap in double quotes.
pub fn sanitize_value(s: &str) -> String {
    let trimmed = s.trim();
    let mut out = String::with_capacity(trimmed.len() + 2);
    out.push('"');
    for c in trimmed.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// True when a string is empty or contains only whitespace.
pub fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_keeps_legal_characters() {
        assert_eq!(sanitize_name("hello"), "\"hello\"");
        assert_eq!(sanitize_name("hello-world"), "\"hello-world\"");
        assert_eq!(sanitize_name("hello.world"), "\"hello.world\"");
        assert_eq!(sanitize_name("hello_world"), "\"hello_world\"");
        assert_eq!(sanitize_name("hello,world"), "\"hello,world\"");
        assert_eq!(sanitize_name("a/b"), "\"a/b\"");
    }

    #[test]
    fn name_replaces_illegal_characters() {
        assert_eq!(sanitize_name("hello world"), "\"hello-world\"");
        assert_eq!(sanitize_name("hello\"world"), "\"hello-world\"");
        assert_eq!(sanitize_name("hello'world"), "\"hello-world\"");
    }

    #[test]
    fn name_keeps_internal_marker_only_at_front() {
        assert_eq!(sanitize_name("~metric"), "\"~metric\"");
        assert_eq!(sanitize_name("met~ric"), "\"met-ric\"");
    }

    #[test]
    fn name_keeps_delta_prefixes() {
        assert_eq!(sanitize_name("\u{2206}delta"), "\"\u{2206}delta\"");
        assert_eq!(sanitize_name("\u{0394}delta"), "\"\u{0394}delta\"");
        assert_eq!(sanitize_name("\u{2206}~delta"), "\"\u{2206}~delta\"");
        // A tilde in second position without a delta prefix is illegal.
        assert_eq!(sanitize_name("a~delta"), "\"a-delta\"");
        // A delta anywhere but position zero is illegal.
        assert_eq!(sanitize_name("a\u{2206}b"), "\"a-b\"");
    }

    #[test]
    fn name_is_stable_on_already_legal_input() {
        let once = sanitize_name("new-york.power.usage");
        assert_eq!(once, "\"new-york.power.usage\"");
    }

    #[test]
    fn value_trims_and_escapes() {
        assert_eq!(sanitize_value(" hello "), "\"hello\"");
        assert_eq!(sanitize_value("hello world"), "\"hello world\"");
        assert_eq!(sanitize_value("hello\"world"), "\"hello\\\"world\"");
        assert_eq!(sanitize_value("hello\nworld"), "\"hello\\nworld\"");
    }

    #[test]
    fn blank_detection() {
        assert!(is_blank(""));
        assert!(is_blank("   "));
        assert!(is_blank("\t\n"));
        assert!(!is_blank("a"));
    }
}
