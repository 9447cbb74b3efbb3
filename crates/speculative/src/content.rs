/// Rough amount of speech in a transcript: every CJK ideograph counts as one
/// word, and so does every whitespace-separated run.
pub fn content_units(text: &str) -> usize {
    let ideographs = text.chars().filter(|c| is_cjk_ideograph(*c)).count();
    ideographs + text.split_whitespace().count()
}

fn is_cjk_ideograph(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin_words() {
        assert_eq!(content_units("I am very hungry now"), 5);
        assert_eq!(content_units("  spaced   out  "), 2);
        assert_eq!(content_units(""), 0);
    }

    #[test]
    fn test_mixed_cjk() {
        // four ideographs plus one whitespace run
        assert_eq!(content_units("我好想你"), 5);
        assert_eq!(content_units("喵 meow"), 3);
    }
}
