//! `$` reference expansion.
//!
//! `$1`..`$9` are positional arguments, `$name` and `$(name)` named values.
//! `$$` is a literal dollar sign. The caller decides what each reference
//! resolves to; unresolved references expand to nothing.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference<'a> {
    /// 1-based argument position.
    Positional(usize),
    Named(&'a str),
}

static REFERENCE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\$(?:(\$)|\(([A-Za-z_][A-Za-z0-9_]*)\)|([0-9])|([A-Za-z_][A-Za-z0-9_]*))").ok()
});

/// Whether the text contains anything to expand.
pub fn has_references(text: &str) -> bool {
    text.contains('$')
}

/// Expand every reference in `text` through `resolve`. Text without
/// references is returned borrowed.
pub fn expand<F>(text: &str, mut resolve: F) -> Cow<'_, str>
where
    F: FnMut(Reference<'_>) -> Option<String>,
{
    let Some(re) = REFERENCE_RE.as_ref().filter(|_| has_references(text)) else {
        return Cow::Borrowed(text);
    };
    re.replace_all(text, |caps: &Captures<'_>| {
        if caps.get(1).is_some() {
            return "$".to_string();
        }
        let reference = if let Some(digit) = caps.get(3) {
            Reference::Positional(digit.as_str().parse().unwrap_or(0))
        } else if let Some(name) = caps.get(2).or_else(|| caps.get(4)) {
            Reference::Named(name.as_str())
        } else {
            return String::new();
        };
        resolve(reference).unwrap_or_else(|| {
            log::warn!(target: "scripts", "unresolved reference {}", &caps[0]);
            String::new()
        })
    })
}

/// The nth (1-based) whitespace-separated word of an argument string.
pub fn positional(args: &str, n: usize) -> Option<&str> {
    if n == 0 {
        return None;
    }
    args.split_whitespace().nth(n - 1)
}

/// Whether a token can name a variable.
pub fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(r: Reference<'_>) -> Option<String> {
        match r {
            Reference::Positional(n) => positional("alpha beta", n).map(str::to_string),
            Reference::Named("count") => Some("3".into()),
            Reference::Named(_) => None,
        }
    }

    #[test]
    fn test_positional() {
        assert_eq!(expand("$1-$2", resolve), "alpha-beta");
        assert_eq!(expand("$3", resolve), "");
    }

    #[test]
    fn test_named_forms() {
        assert_eq!(expand("n=$count", resolve), "n=3");
        assert_eq!(expand("$(count)x", resolve), "3x");
        assert_eq!(expand("$missing!", resolve), "!");
    }

    #[test]
    fn test_literal_dollar() {
        assert_eq!(expand("$$5", resolve), "$5");
        assert_eq!(expand("cost $", resolve), "cost $");
        assert_eq!(expand("plain", resolve), "plain");
    }

    #[test]
    fn test_text_without_references_is_borrowed() {
        assert!(matches!(expand("Record 2", resolve), Cow::Borrowed("Record 2")));
        assert!(matches!(expand("$$", resolve), Cow::Owned(_)));
    }

    #[test]
    fn test_identifier() {
        assert!(is_identifier("sustainCount"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }
}
