//! Character-length token estimation. Exactness is not the goal: only
//! relative ordering and a safety margin matter to the Context Builder
//! and Memory Pruner that consume this.

/// Roughly one token per four bytes of UTF-8 content (byte length, not
/// grapheme count — cheap and stable regardless of script).
pub fn estimate(text: &str) -> usize {
    (text.len() + 3) / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero_tokens() {
        assert_eq!(estimate(""), 0);
    }

    #[test]
    fn rounds_up() {
        assert_eq!(estimate("a"), 1);
        assert_eq!(estimate("abcd"), 1);
        assert_eq!(estimate("abcde"), 2);
    }

    #[test]
    fn scales_with_length() {
        let short = estimate("hello");
        let long = estimate(&"hello world ".repeat(20));
        assert!(long > short);
    }
}
