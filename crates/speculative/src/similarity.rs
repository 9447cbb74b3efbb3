use similar::TextDiff;

/// Character-level longest-common-subsequence ratio in `[0, 1]`:
/// `2 * matched / (len(a) + len(b))`. Two empty strings are identical.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    f64::from(TextDiff::from_chars(a, b).ratio())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_is_one() {
        assert_eq!(similarity_ratio("I miss my cat", "I miss my cat"), 1.0);
        assert_eq!(similarity_ratio("", ""), 1.0);
    }

    #[test]
    fn test_unrelated_is_low() {
        assert!(similarity_ratio("hello world", "completely different") < 0.7);
        assert_eq!(similarity_ratio("", "anything"), 0.0);
    }

    #[test]
    fn test_extension_of_partial_text() {
        let ratio = similarity_ratio("I am very hungry now", "I am very hungry now please feed me");
        // 2 * 20 / 55
        assert!((ratio - 40.0 / 55.0).abs() < 1e-6);
        assert!(ratio >= 0.7);
    }

    #[test]
    fn test_symmetric_and_order_sensitive() {
        let pairs = [("kitten", "sitting"), ("feed me", "me feed"), ("猫咪饿了", "猫饿")];
        for (a, b) in pairs {
            assert!((similarity_ratio(a, b) - similarity_ratio(b, a)).abs() < 1e-6);
        }
        assert!(similarity_ratio("ab", "ba") < 1.0);
    }
}
