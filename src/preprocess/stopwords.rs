//! English stopwords (the NLTK corpus list shipped by `stop_words`).

use std::collections::HashSet;
use std::sync::OnceLock;

use stop_words::{get, LANGUAGE};

static STOPWORDS: OnceLock<HashSet<String>> = OnceLock::new();

fn stopwords() -> &'static HashSet<String> {
    STOPWORDS.get_or_init(|| get(LANGUAGE::English).into_iter().collect())
}

/// Whether `word` is an English stopword. Expects lowercase input.
pub fn is_stopword(word: &str) -> bool {
    stopwords().contains(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_is_loaded() {
        assert!(stopwords().len() > 100);
    }

    #[test]
    fn test_lookup() {
        assert!(is_stopword("the"));
        assert!(is_stopword("yourselves"));
        assert!(is_stopword("against"));
        assert!(!is_stopword("microgravity"));
        assert!(!is_stopword("The"));
    }
}
