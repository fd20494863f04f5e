//! URL-safe slug generation.

use once_cell::sync::Lazy;
use regex_lite::Regex;

/// Longest slug we generate; longer titles are cut at a word boundary.
pub const MAX_SLUG_LEN: usize = 80;

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Turn a title into a lowercase, hyphen-separated slug.
///
/// Returns `None` when nothing slug-worthy is left (e.g. a title made of
/// punctuation only), so callers never persist an empty slug.
pub fn slugify(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    let replaced = NON_ALNUM.replace_all(&lowered, "-");
    let trimmed = replaced.trim_matches('-');
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.len() <= MAX_SLUG_LEN {
        return Some(trimmed.to_string());
    }

    let cut = &trimmed[..MAX_SLUG_LEN];
    let cut = match cut.rfind('-') {
        Some(pos) if pos > 0 => &cut[..pos],
        _ => cut,
    };
    Some(cut.trim_end_matches('-').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Hello, World!").as_deref(), Some("hello-world"));
        assert_eq!(
            slugify("  Episode 42: The Answer  ").as_deref(),
            Some("episode-42-the-answer")
        );
    }

    #[test]
    fn test_slugify_drops_non_ascii() {
        assert_eq!(slugify("Café Society").as_deref(), Some("caf-society"));
    }

    #[test]
    fn test_slugify_empty() {
        assert_eq!(slugify("!!!"), None);
        assert_eq!(slugify(""), None);
    }

    #[test]
    fn test_slugify_truncates_on_word_boundary() {
        let title = "word ".repeat(40);
        let slug = slugify(&title).unwrap();
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
        assert!(slug.starts_with("word-word"));
    }
}
