// src/moderation/strategies.rs - Profanity detection strategies
//
// Three strategies share one capability: decide whether a text is bad (`flag`)
// and redact the offending tokens (`censor`). Redaction always swaps a whole
// token for filler of the same length.

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::debug;
use std::collections::HashSet;
use std::sync::Arc;

use super::classifier::Classifier;
use super::distance::levenshtein_chars;
use super::tokenizer::{mark_word_neighbors, render, tokenize};
use super::wordlists::WordLists;
use crate::types::CheckKind;

/// Characters of slack allowed between a token and a banned word before the
/// embedded-substring search is skipped.
pub const WINDOW_SLACK: usize = 5;

/// Caller-supplied lists replacing a strategy's defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOverride<'a> {
    pub words: Option<&'a [String]>,
    pub allowed: Option<&'a HashSet<String>>,
}

impl<'a> ListOverride<'a> {
    pub fn new(words: &'a [String], allowed: &'a HashSet<String>) -> Self {
        Self {
            words: Some(words),
            allowed: Some(allowed),
        }
    }
}

#[async_trait]
pub trait DetectionStrategy: Send + Sync {
    fn kind(&self) -> CheckKind;

    /// Whether `text` contains anything this strategy considers bad.
    async fn flag(&self, text: &str, lists: ListOverride<'_>) -> Result<bool>;

    /// Redact offending tokens plus `neighbors` surrounding tokens.
    async fn censor(&self, text: &str, replacement: char, neighbors: usize, lists: ListOverride<'_>) -> Result<String>;
}

/// Plain substring containment against the long-list.
///
/// Deliberately catches misspellings and concatenations that contain a banned
/// root, so it takes no allowlist.
pub struct ExactSubstringList {
    lists: Arc<WordLists>,
}

impl ExactSubstringList {
    pub fn new(lists: Arc<WordLists>) -> Self {
        Self { lists }
    }

    fn words<'a>(&'a self, lists: &ListOverride<'a>) -> &'a [String] {
        lists.words.unwrap_or(self.lists.longlist.as_slice())
    }

    fn first_match<'w>(token: &str, words: &'w [String]) -> Option<&'w str> {
        words
            .iter()
            .filter(|w| !w.is_empty())
            .find(|w| token.contains(w.as_str()))
            .map(|w| w.as_str())
    }
}

#[async_trait]
impl DetectionStrategy for ExactSubstringList {
    fn kind(&self) -> CheckKind {
        CheckKind::ExactSubstring
    }

    async fn flag(&self, text: &str, lists: ListOverride<'_>) -> Result<bool> {
        let words = self.words(&lists);
        Ok(tokenize(text)
            .iter()
            .any(|t| Self::first_match(&t.lowercase(), words).is_some()))
    }

    /// `neighbors` counts the matched token itself, so 1 redacts only the match.
    async fn censor(&self, text: &str, replacement: char, neighbors: usize, lists: ListOverride<'_>) -> Result<String> {
        let words = self.words(&lists);
        let tokens = tokenize(text);
        let mut marks = vec![false; tokens.len()];

        for (i, token) in tokens.iter().enumerate() {
            if let Some(hit) = Self::first_match(&token.lowercase(), words) {
                debug!("Long-list hit '{}' in token '{}'", hit, token.text);
                marks[i] = true;
                mark_word_neighbors(&tokens, &mut marks, i, neighbors.saturating_sub(1));
            }
        }

        Ok(render(&tokens, replacement, |i, t| marks[i] && t.is_word))
    }
}

/// Edit-distance matching against the blacklist.
///
/// Cost per token is O(token_len * blacklist_len * window_count) with no
/// caching, which is fine for chat-sized messages and lists of a few hundred
/// words.
pub struct FuzzyList {
    lists: Arc<WordLists>,
}

impl FuzzyList {
    pub fn new(lists: Arc<WordLists>) -> Self {
        Self { lists }
    }

    /// Whole-token tolerance: max(1, floor(len / 1.3)).
    pub fn whole_token_tolerance(word_len: usize) -> usize {
        (word_len * 10 / 13).max(1)
    }

    /// Embedded-window tolerance: max(1, floor(len / 2)).
    pub fn window_tolerance(word_len: usize) -> usize {
        (word_len / 2).max(1)
    }

    fn is_exempt(&self, token: &str, allowed: &HashSet<String>) -> bool {
        allowed.contains(token) || self.lists.common_words.contains(token)
    }

    /// Decide a single lowercase word token.
    pub fn token_is_bad(&self, token: &str, words: &[String], allowed: &HashSet<String>) -> bool {
        if self.is_exempt(token, allowed) {
            return false;
        }

        let token_chars: Vec<char> = token.chars().collect();
        for bad in words {
            let bad_chars: Vec<char> = bad.chars().collect();
            if bad_chars.is_empty() {
                continue;
            }

            if levenshtein_chars(&token_chars, &bad_chars) <= Self::whole_token_tolerance(bad_chars.len()) {
                debug!("Fuzzy match: '{}' ~ '{}'", token, bad);
                return true;
            }

            if token_chars.len().abs_diff(bad_chars.len()) <= WINDOW_SLACK {
                let tolerance = Self::window_tolerance(bad_chars.len());
                // windows() yields nothing when the token is shorter than the word
                if token_chars
                    .windows(bad_chars.len())
                    .any(|window| levenshtein_chars(window, &bad_chars) <= tolerance)
                {
                    debug!("Fuzzy embedded match: '{}' contains ~'{}'", token, bad);
                    return true;
                }
            }
        }
        false
    }

    fn resolve<'a>(&'a self, lists: &ListOverride<'a>) -> (&'a [String], &'a HashSet<String>) {
        (
            lists.words.unwrap_or(self.lists.blacklist.as_slice()),
            lists.allowed.unwrap_or(&self.lists.allowlist),
        )
    }
}

#[async_trait]
impl DetectionStrategy for FuzzyList {
    fn kind(&self) -> CheckKind {
        CheckKind::Fuzzy
    }

    async fn flag(&self, text: &str, lists: ListOverride<'_>) -> Result<bool> {
        let (words, allowed) = self.resolve(&lists);
        Ok(tokenize(text)
            .iter()
            .filter(|t| t.is_word)
            .any(|t| self.token_is_bad(&t.lowercase(), words, allowed)))
    }

    async fn censor(&self, text: &str, replacement: char, neighbors: usize, lists: ListOverride<'_>) -> Result<String> {
        let (words, allowed) = self.resolve(&lists);
        let tokens = tokenize(text);
        let mut marks = vec![false; tokens.len()];

        for (i, token) in tokens.iter().enumerate() {
            if token.is_word && self.token_is_bad(&token.lowercase(), words, allowed) {
                marks[i] = true;
                mark_word_neighbors(&tokens, &mut marks, i, neighbors);
            }
        }

        Ok(render(&tokens, replacement, |i, t| marks[i] && t.is_word))
    }
}

/// Delegates the verdict to an external statistical classifier.
pub struct ClassifierStrategy {
    classifier: Arc<dyn Classifier>,
    window_size: usize,
    threshold: f32,
}

impl ClassifierStrategy {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier,
            window_size: 1,
            threshold: 0.5,
        }
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size.max(1);
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    async fn predict_checked(&self, texts: &[String]) -> Result<Vec<f32>> {
        let probs = self.classifier.predict(texts).await?;
        if probs.len() != texts.len() {
            bail!(
                "classifier '{}' returned {} scores for {} inputs",
                self.classifier.name(),
                probs.len(),
                texts.len()
            );
        }
        Ok(probs)
    }
}

#[async_trait]
impl DetectionStrategy for ClassifierStrategy {
    fn kind(&self) -> CheckKind {
        CheckKind::Classifier
    }

    async fn flag(&self, text: &str, _lists: ListOverride<'_>) -> Result<bool> {
        if text.is_empty() {
            return Ok(false);
        }
        let probs = self.predict_checked(&[text.to_string()]).await?;
        Ok(probs[0] >= self.threshold)
    }

    /// Slides a `window_size` token window over the text, classifies every
    /// window in one batch, and redacts each positive window padded by
    /// `neighbors` raw tokens on either side. Whitespace runs stay intact.
    async fn censor(&self, text: &str, replacement: char, neighbors: usize, _lists: ListOverride<'_>) -> Result<String> {
        let tokens = tokenize(text);
        let n = tokens.len();
        if n == 0 {
            return Ok(String::new());
        }

        let lowered: Vec<String> = tokens.iter().map(|t| t.lowercase()).collect();
        let windows: Vec<String> = (0..n)
            .map(|i| lowered[i..(i + self.window_size).min(n)].join(" "))
            .collect();
        let probs = self.predict_checked(&windows).await?;

        let mut marks = vec![false; n];
        for (i, p) in probs.iter().enumerate() {
            if *p >= self.threshold {
                let start = i.saturating_sub(neighbors);
                let end = (i + self.window_size + neighbors).min(n);
                marks[start..end].iter_mut().for_each(|m| *m = true);
            }
        }

        Ok(render(&tokens, replacement, |i, t| marks[i] && !t.is_blank()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::classifier::LexiconClassifier;
    use std::collections::HashMap;

    fn lists() -> Arc<WordLists> {
        Arc::new(WordLists::custom(
            ["badword"],
            ["bedward"],
            ["badword", "bad"],
            ["this", "is", "a", "here", "bad", "word", "that"],
        ))
    }

    #[test]
    fn test_tolerances() {
        assert_eq!(FuzzyList::whole_token_tolerance(7), 5);
        assert_eq!(FuzzyList::whole_token_tolerance(1), 1);
        assert_eq!(FuzzyList::whole_token_tolerance(4), 3);
        assert_eq!(FuzzyList::window_tolerance(7), 3);
        assert_eq!(FuzzyList::window_tolerance(1), 1);
    }

    #[tokio::test]
    async fn test_fuzzy_flags_near_misses() {
        let fuzzy = FuzzyList::new(lists());
        assert!(fuzzy.flag("you badwrd", ListOverride::default()).await.unwrap());
        assert!(fuzzy.flag("BADWORD", ListOverride::default()).await.unwrap());
        // embedded in extra characters
        assert!(fuzzy.flag("xxbadwordxx", ListOverride::default()).await.unwrap());
        assert!(!fuzzy.flag("this is a word", ListOverride::default()).await.unwrap());
    }

    #[tokio::test]
    async fn test_fuzzy_exempts_allowlist_and_common_words() {
        let fuzzy = FuzzyList::new(lists());
        // one edit away from the banned word, but allowlisted
        assert!(!fuzzy.flag("bedward", ListOverride::default()).await.unwrap());
        // "word" is common even though it sits near the banned word
        assert!(!fuzzy.flag("word", ListOverride::default()).await.unwrap());
    }

    #[tokio::test]
    async fn test_fuzzy_censor_masks_neighbors() {
        let fuzzy = FuzzyList::new(lists());
        let out = fuzzy
            .censor("this is a badword here", '#', 2, ListOverride::default())
            .await
            .unwrap();
        assert_eq!(out, "this ## # ####### ####");
    }

    #[tokio::test]
    async fn test_fuzzy_censor_with_override_lists() {
        let fuzzy = FuzzyList::new(lists());
        let words = vec!["zonk".to_string()];
        let allowed = HashSet::new();
        let out = fuzzy
            .censor("hey zonk badword", '*', 0, ListOverride::new(&words, &allowed))
            .await
            .unwrap();
        assert_eq!(out, "hey **** badword");
    }

    #[tokio::test]
    async fn test_exact_first_match_wins() {
        let exact = ExactSubstringList::new(lists());
        assert!(exact.flag("megabadwordz", ListOverride::default()).await.unwrap());
        let out = exact
            .censor("megabadwordz and more", '#', 1, ListOverride::default())
            .await
            .unwrap();
        assert_eq!(out, "############ and more");
    }

    #[tokio::test]
    async fn test_exact_neighbors_count_includes_match() {
        let exact = ExactSubstringList::new(lists());
        let out = exact
            .censor("one two bad three four", '#', 2, ListOverride::default())
            .await
            .unwrap();
        assert_eq!(out, "one ### ### ##### four");
    }

    #[tokio::test]
    async fn test_censor_preserves_token_lengths() {
        let exact = ExactSubstringList::new(lists());
        let fuzzy = FuzzyList::new(lists());
        let text = "ok, so this BADWORD... is bad!";
        let a = exact.censor(text, '#', 1, ListOverride::default()).await.unwrap();
        let b = fuzzy.censor(text, '#', 2, ListOverride::default()).await.unwrap();
        for censored in [a, b] {
            assert_eq!(censored.chars().count(), text.chars().count());
            // every character is either untouched or filler
            assert!(censored.chars().zip(text.chars()).all(|(c, o)| c == o || c == '#'));
        }
    }

    #[tokio::test]
    async fn test_censor_is_idempotent_on_redacted_text() {
        let exact = ExactSubstringList::new(lists());
        let fuzzy = FuzzyList::new(lists());
        let redacted = "#### ## # ####### ####";
        assert_eq!(exact.censor(redacted, '#', 1, ListOverride::default()).await.unwrap(), redacted);
        assert_eq!(fuzzy.censor(redacted, '#', 2, ListOverride::default()).await.unwrap(), redacted);
    }

    #[tokio::test]
    async fn test_classifier_windows() {
        let mut weights = HashMap::new();
        weights.insert("zap".to_string(), 5.0);
        let strategy = ClassifierStrategy::new(Arc::new(LexiconClassifier::new(weights, -1.0)));

        assert!(strategy.flag("please zap it", ListOverride::default()).await.unwrap());
        assert!(!strategy.flag("please do", ListOverride::default()).await.unwrap());

        // padding of 2 raw tokens covers "please " and " it", whitespace kept
        let out = strategy
            .censor("well please zap it now", '#', 2, ListOverride::default())
            .await
            .unwrap();
        assert_eq!(out, "well ###### ### ## now");
    }

    struct ShortClassifier;

    #[async_trait]
    impl Classifier for ShortClassifier {
        async fn predict(&self, _texts: &[String]) -> Result<Vec<f32>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_classifier_length_mismatch_is_error() {
        let strategy = ClassifierStrategy::new(Arc::new(ShortClassifier));
        assert!(strategy.flag("anything", ListOverride::default()).await.is_err());
        assert!(strategy.censor("anything", '#', 1, ListOverride::default()).await.is_err());
    }
}
