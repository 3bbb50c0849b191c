//! Normalization of external capability names into filter identifiers.
//!
//! Capability names come from the host as free-form display text
//! ("Word Count", "Date & Time"). Filter names inside template
//! expressions are identifiers, so every capability name is pushed
//! through `sanitize_filter_name` before it lands in the registry.
//! Resolver names are exempt: they are registered raw (see the bridge).

/// Normalizes a capability name into a filter identifier.
///
/// Rules, applied in one pass: lowercase; `-` and whitespace become `_`;
/// every other character outside `[a-z0-9_]` is dropped; runs of `_`
/// collapse into one. The result always matches `^[a-z0-9_]*$` and the
/// function is idempotent.
pub fn sanitize_filter_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        let c = if c == '-' || c.is_whitespace() { '_' } else { c };
        if !matches!(c, 'a'..='z' | '0'..='9' | '_') {
            continue;
        }
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases() {
        assert_eq!(sanitize_filter_name("WordCount"), "wordcount");
        assert_eq!(sanitize_filter_name("UPPER"), "upper");
    }

    #[test]
    fn test_spaces_become_underscores() {
        assert_eq!(sanitize_filter_name("Word Count"), "word_count");
    }

    #[test]
    fn test_dashes_become_underscores() {
        assert_eq!(sanitize_filter_name("date-time"), "date_time");
        assert_eq!(sanitize_filter_name("a-b-c"), "a_b_c");
    }

    #[test]
    fn test_strips_punctuation() {
        assert_eq!(sanitize_filter_name("Date & Time"), "date_time");
        assert_eq!(sanitize_filter_name("née #1!"), "ne_1");
        assert_eq!(sanitize_filter_name("[beta] size?"), "beta_size");
    }

    #[test]
    fn test_collapses_underscore_runs() {
        assert_eq!(sanitize_filter_name("a__b___c"), "a_b_c");
        assert_eq!(sanitize_filter_name("a -- b"), "a_b");
    }

    #[test]
    fn test_keeps_digits() {
        assert_eq!(sanitize_filter_name("base64 Encode"), "base64_encode");
    }

    #[test]
    fn test_already_clean_is_untouched() {
        assert_eq!(sanitize_filter_name("word_count"), "word_count");
    }

    #[test]
    fn test_empty_and_unsalvageable() {
        assert_eq!(sanitize_filter_name(""), "");
        assert_eq!(sanitize_filter_name("&&&"), "");
        assert_eq!(sanitize_filter_name("日本語"), "");
    }

    #[test]
    fn test_leading_trailing_underscores_survive() {
        // Collapsing never trims; "_x_" is a valid identifier here.
        assert_eq!(sanitize_filter_name("_x_"), "_x_");
        assert_eq!(sanitize_filter_name(" x "), "_x_");
    }

    #[test]
    fn test_idempotent() {
        for raw in ["Word Count", "Date & Time", "a--b", "", "_x_", "HTTP GET 2"] {
            let once = sanitize_filter_name(raw);
            assert_eq!(sanitize_filter_name(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_output_alphabet() {
        for raw in ["Mixed CASE-42 & more", "  lots   of   space  ", "émoji 🎉 name"] {
            let out = sanitize_filter_name(raw);
            assert!(
                out.chars().all(|c| matches!(c, 'a'..='z' | '0'..='9' | '_')),
                "bad char in {out:?}"
            );
            assert!(!out.contains("__"), "consecutive underscores in {out:?}");
        }
    }
}
