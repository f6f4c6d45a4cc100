//! Byte-budgeted, UTF-8-safe truncation for dumped bodies.
//!
//! Captured payloads can be arbitrarily large; these helpers cut them down
//! for log output without ever splitting a multi-byte character.

use std::borrow::Cow;

use crate::RequestLoggerConfig;

/// Marker appended to a body that was cut short.
const ELLIPSIS: &str = "...";

/// Budgets at or below this size are cut without a marker.
const MIN_ELLIPSIS_BUDGET: usize = 10;

/// Returns the longest prefix of `s` that fits in `max` bytes and ends on a
/// character boundary. Input that already fits comes back unchanged; a
/// budget of zero yields the empty string.
pub(crate) fn limit_string(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Like [`limit_string`], but appends `...` when the input was actually
/// cut. The marker is plain ASCII placed after an already-valid prefix of
/// `max - 3` bytes, so it never needs boundary adjustment itself.
pub(crate) fn limit_string_with_ellipsis(s: &str, max: usize) -> Cow<'_, str> {
    if max <= MIN_ELLIPSIS_BUDGET {
        return Cow::Borrowed(limit_string(s, max));
    }

    let cut = limit_string(s, max - ELLIPSIS.len());
    if cut.len() == s.len() {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(cut.len() + ELLIPSIS.len());
    out.push_str(cut);
    out.push_str(ELLIPSIS);
    Cow::Owned(out)
}

/// Applies the configured truncation policy: identity when limiting is off
/// or the budget is zero, otherwise [`limit_string_with_ellipsis`].
pub(crate) fn limit_body<'a>(config: &RequestLoggerConfig, s: &'a str) -> Cow<'a, str> {
    if !config.limit_body || config.body_limit == 0 {
        return Cow::Borrowed(s);
    }
    limit_string_with_ellipsis(s, config.body_limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_unchanged() {
        assert_eq!(limit_string("hello", 10), "hello");
    }

    #[test]
    fn exact_fit_unchanged() {
        assert_eq!(limit_string("hello", 5), "hello");
    }

    #[test]
    fn zero_budget_yields_empty() {
        assert_eq!(limit_string("hello", 0), "");
    }

    #[test]
    fn never_splits_two_byte_char() {
        // "Hé" is [72, 0xC3, 0xA9]; a budget of 2 lands inside the é
        assert_eq!(limit_string("Hé world", 2), "H");
        assert_eq!(limit_string("Hé world", 3), "Hé");
    }

    #[test]
    fn never_splits_three_byte_char() {
        // € is three bytes, starting at offset 2
        let s = "ab€cd";
        assert_eq!(limit_string(s, 3), "ab");
        assert_eq!(limit_string(s, 4), "ab");
        assert_eq!(limit_string(s, 5), "ab€");
    }

    #[test]
    fn never_splits_four_byte_char() {
        // 𝄞 is four bytes, starting at offset 2
        let s = "AB𝄞CD";
        assert_eq!(limit_string(s, 3), "AB");
        assert_eq!(limit_string(s, 5), "AB");
        assert_eq!(limit_string(s, 6), "AB𝄞");
    }

    #[test]
    fn small_budget_gets_no_marker() {
        assert_eq!(limit_string_with_ellipsis("0123456789ABC", 10), "0123456789");
    }

    #[test]
    fn truncation_appends_marker() {
        assert_eq!(
            limit_string_with_ellipsis("0123456789ABCDEF", 12),
            "012345678..."
        );
    }

    #[test]
    fn no_truncation_keeps_original() {
        let out = limit_string_with_ellipsis("short", 20);
        assert_eq!(out, "short");
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn marker_prefix_respects_char_boundary() {
        // budget 12 leaves nine bytes for the prefix, landing inside the €
        let s = "01234567€ABCDEF";
        assert_eq!(limit_string_with_ellipsis(s, 12), "01234567...");
    }

    #[test]
    fn disabled_policy_is_identity() {
        let config = RequestLoggerConfig {
            limit_body: false,
            body_limit: 12,
            ..Default::default()
        };
        assert_eq!(limit_body(&config, "0123456789ABCDEF"), "0123456789ABCDEF");
    }

    #[test]
    fn zero_budget_policy_is_identity() {
        let config = RequestLoggerConfig {
            limit_body: true,
            body_limit: 0,
            ..Default::default()
        };
        assert_eq!(limit_body(&config, "0123456789ABCDEF"), "0123456789ABCDEF");
    }

    #[test]
    fn enabled_policy_truncates() {
        let config = RequestLoggerConfig {
            limit_body: true,
            body_limit: 12,
            ..Default::default()
        };
        assert_eq!(limit_body(&config, "0123456789ABCDEF"), "012345678...");
    }
}
