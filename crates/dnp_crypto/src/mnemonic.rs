//! Recovery phrase: 12 words drawn uniformly from a fixed 256-word dictionary.
//!
//! Each word carries one random byte, so a phrase carries 96 bits of entropy
//! before it goes through Argon2id. Input is normalized (trimmed, lowercased,
//! whitespace collapsed) before validation.

use thiserror::Error;
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const PHRASE_WORDS: usize = 12;

const WORDLIST: &str = include_str!("wordlist.txt");

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhraseError {
    /// Wrong word count or a word outside the dictionary. Detected before any KDF work.
    #[error("Malformed recovery phrase: {0}")]
    Malformed(String),

    /// Well-formed, but it does not unlock this credential.
    #[error("Recovery phrase does not match this account")]
    Mismatch,
}

pub fn wordlist() -> impl Iterator<Item = &'static str> {
    WORDLIST.lines().map(str::trim).filter(|w| !w.is_empty())
}

fn word_at(index: u8) -> Option<&'static str> {
    wordlist().nth(index as usize)
}

fn is_word(candidate: &str) -> bool {
    wordlist().any(|w| w == candidate)
}

/// A validated, normalized recovery phrase. Zeroized on drop.
#[derive(Clone)]
pub struct RecoveryPhrase(Zeroizing<String>);

impl RecoveryPhrase {
    pub fn generate() -> Result<Self, CryptoError> {
        let picks = Zeroizing::new(crate::random::bytes::<PHRASE_WORDS>()?);
        let mut words = Vec::with_capacity(PHRASE_WORDS);
        for b in picks.iter() {
            let w = word_at(*b)
                .ok_or_else(|| CryptoError::InvalidKey("recovery dictionary is incomplete".into()))?;
            words.push(w);
        }
        Ok(Self(Zeroizing::new(words.join(" "))))
    }

    /// Normalize and validate user input.
    pub fn parse(input: &str) -> Result<Self, PhraseError> {
        let normalized = Zeroizing::new(normalize(input));
        let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
        if words.len() != PHRASE_WORDS {
            return Err(PhraseError::Malformed(format!(
                "expected {PHRASE_WORDS} words, got {}",
                words.len()
            )));
        }
        if let Some(pos) = words.iter().position(|w| !is_word(w)) {
            return Err(PhraseError::Malformed(format!(
                "word {} is not in the recovery dictionary",
                pos + 1
            )));
        }
        Ok(Self(Zeroizing::new(words.join(" "))))
    }

    /// The normalized phrase. Show it to the user once; never log it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.0.split(' ')
    }
}

impl std::fmt::Debug for RecoveryPhrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RecoveryPhrase").field(&"[REDACTED]").finish()
    }
}

/// Trim, lowercase, and collapse internal whitespace to single spaces.
pub fn normalize(input: &str) -> String {
    input
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn dictionary_has_256_unique_lowercase_words() {
        let words: Vec<&str> = wordlist().collect();
        assert_eq!(words.len(), 256);
        let unique: HashSet<&str> = words.iter().copied().collect();
        assert_eq!(unique.len(), 256);
        assert!(words.iter().all(|w| w.chars().all(|c| c.is_ascii_lowercase())));
    }

    #[test]
    fn generated_phrase_parses() {
        let phrase = RecoveryPhrase::generate().unwrap();
        assert_eq!(phrase.words().count(), PHRASE_WORDS);
        let parsed = RecoveryPhrase::parse(phrase.expose()).unwrap();
        assert_eq!(parsed.expose(), phrase.expose());
    }

    #[test]
    fn parse_normalizes_case_and_spacing() {
        let phrase = RecoveryPhrase::generate().unwrap();
        let messy = format!("  {}  ", phrase.expose().to_uppercase().replace(' ', " \t\n "));
        let parsed = RecoveryPhrase::parse(&messy).unwrap();
        assert_eq!(parsed.expose(), phrase.expose());
    }

    #[test]
    fn wrong_word_count_is_malformed() {
        let err = RecoveryPhrase::parse("able acid aged").unwrap_err();
        assert!(matches!(err, PhraseError::Malformed(_)));
        assert!(matches!(RecoveryPhrase::parse(""), Err(PhraseError::Malformed(_))));
    }

    #[test]
    fn unknown_word_is_malformed() {
        let input = "able acid aged also area army away baby back ball band notaword";
        let err = RecoveryPhrase::parse(input).unwrap_err();
        assert_eq!(
            err,
            PhraseError::Malformed("word 12 is not in the recovery dictionary".into())
        );
    }

    #[test]
    fn debug_redacts() {
        let phrase = RecoveryPhrase::generate().unwrap();
        let out = format!("{phrase:?}");
        assert!(out.contains("REDACTED"));
        assert!(!out.contains(phrase.words().next().unwrap()));
    }
}
