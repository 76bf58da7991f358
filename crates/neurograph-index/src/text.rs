//! Word tokenization and hashing for the text-token index.

/// Lowercases, strips punctuation, drops words shorter than two characters
/// and dedupes while preserving first-seen order.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2)
    {
        if seen.insert(word.to_string()) {
            out.push(word.to_string());
        }
    }
    out
}

/// Stable 32-bit word hash (the classic multiply-by-31 rolling hash).
pub fn hash_word(word: &str) -> i32 {
    word.bytes()
        .fold(0i32, |h, b| h.wrapping_mul(31).wrapping_add(b as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_dedupes() {
        let tokens = tokenize("The Quantum, the QUANTUM leap! a");
        assert_eq!(tokens, vec!["the", "quantum", "leap"]);
    }

    #[test]
    fn short_words_are_dropped() {
        assert!(tokenize("a I x").is_empty());
        assert_eq!(tokenize("ab"), vec!["ab"]);
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(hash_word("quantum"), hash_word("quantum"));
        assert_ne!(hash_word("quantum"), hash_word("quantun"));
    }
}
