//! The embedded English word list: 2048 words, alphabetically ordered,
//! each unique in its first four letters.

use std::collections::HashMap;

lazy_static::lazy_static! {
    /// The words, in index order.
    pub static ref WORDS: Vec<&'static str> = {
        let words: Vec<&'static str> = include_str!("english.txt")
            .split_whitespace()
            .collect();
        assert_eq!(words.len(), 2048, "embedded word list must be complete");
        words
    };

    static ref INDEX: HashMap<&'static str, usize> = WORDS
        .iter()
        .enumerate()
        .map(|(index, &word)| (word, index))
        .collect();
}

/// The index of `word`, if it is in the list.
pub fn index_of(word: &str) -> Option<usize> {
    INDEX.get(word).copied()
}
