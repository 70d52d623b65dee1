//! Canonical-URL derivation: strip query parameters matching the
//! configured glob exclude list from the post-redirect final URL.

use regex::Regex;
use url::Url;

/// Strip query parameters whose name matches any pattern in `exclude`
/// (shell-glob, single `*` wildcard, e.g. `"utm_*"`).
pub fn canonicalize(final_url: &str, exclude: &[String]) -> String {
    let Ok(mut parsed) = Url::parse(final_url) else {
        return final_url.to_string();
    };

    let patterns: Vec<Regex> = exclude.iter().map(|p| glob_to_regex(p)).collect();
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(name, _)| !patterns.iter().any(|re| re.is_match(name)))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let mut pairs = parsed.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        drop(pairs);
    }

    parsed.to_string()
}

/// Compile a shell-glob pattern (single `*` wildcard, e.g. `"utm_*"`) into
/// an anchored regex matching the whole query-parameter name.
fn glob_to_regex(pattern: &str) -> Regex {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    let body = escaped.join(".*");
    Regex::new(&format!("^{body}$")).expect("glob-derived pattern is always valid regex")
}

/// Exposed for callers that just want a one-off glob test without paying
/// for a `Regex` compile on every query parameter.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    glob_to_regex(pattern).is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_matching_query_params() {
        let out = canonicalize(
            "https://example.org/a?utm_source=x&id=1",
            &["utm_*".to_string()],
        );
        assert_eq!(out, "https://example.org/a?id=1");
    }

    #[test]
    fn strips_all_query_params() {
        let out = canonicalize("https://example.org/a?utm_source=x", &["utm_*".to_string()]);
        assert_eq!(out, "https://example.org/a");
    }

    #[test]
    fn leaves_non_matching_params_untouched() {
        let out = canonicalize("https://example.org/a?id=1", &["utm_*".to_string()]);
        assert_eq!(out, "https://example.org/a?id=1");
    }

    #[test]
    fn glob_prefix_and_suffix() {
        assert!(glob_match("utm_*", "utm_source"));
        assert!(!glob_match("utm_*", "other"));
        assert!(glob_match("*_id", "article_id"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }
}
