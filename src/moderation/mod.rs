// src/moderation/mod.rs - Text moderation engine

use anyhow::Result;
use futures_util::FutureExt;
use log::{debug, warn};
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::error::{panic_message, ModerationFault};
use crate::types::{CheckKind, EnabledChecks};

pub mod classifier;
pub mod distance;
pub mod strategies;
pub mod tokenizer;
pub mod wordlists;

use classifier::{Classifier, LexiconClassifier};
use strategies::{ClassifierStrategy, DetectionStrategy, ExactSubstringList, FuzzyList, ListOverride};
use wordlists::WordLists;

/// Filler used when the caller does not pick one.
pub const DEFAULT_REPLACEMENT: char = '#';

const CLASSIFIER_NEIGHBORS: usize = 2;
const FUZZY_NEIGHBORS: usize = 2;
const EXACT_NEIGHBORS: usize = 1;
const CUSTOM_LIST_NEIGHBORS: usize = 1;

/// Result of running the strategy chain over one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CensorReport {
    pub finished_message: String,
    pub is_bad: bool,
    pub caught: Vec<CheckKind>,
}

/// Orchestrates the detection strategies and composes the censored output.
pub struct ModerationEngine {
    lists: Arc<WordLists>,
    classifier: ClassifierStrategy,
    fuzzy: FuzzyList,
    exact: ExactSubstringList,
    replacement: char,
}

impl ModerationEngine {
    pub fn new(lists: Arc<WordLists>, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier: ClassifierStrategy::new(classifier),
            fuzzy: FuzzyList::new(Arc::clone(&lists)),
            exact: ExactSubstringList::new(Arc::clone(&lists)),
            lists,
            replacement: DEFAULT_REPLACEMENT,
        }
    }

    /// Engine over the embedded word lists and lexicon model.
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(
            Arc::new(WordLists::builtin()?),
            Arc::new(LexiconClassifier::builtin()?),
        ))
    }

    pub fn with_replacement(mut self, replacement: char) -> Self {
        self.replacement = replacement;
        self
    }

    /// Window size and decision threshold for the classifier strategy.
    pub fn with_classifier_tuning(mut self, window_size: usize, threshold: f32) -> Self {
        self.classifier = self.classifier.with_window_size(window_size).with_threshold(threshold);
        self
    }

    pub fn replacement(&self) -> char {
        self.replacement
    }

    pub fn word_lists(&self) -> &WordLists {
        &self.lists
    }

    fn strategy(&self, kind: CheckKind) -> (&dyn DetectionStrategy, usize) {
        match kind {
            CheckKind::Classifier => (&self.classifier, CLASSIFIER_NEIGHBORS),
            CheckKind::Fuzzy => (&self.fuzzy, FUZZY_NEIGHBORS),
            CheckKind::ExactSubstring => (&self.exact, EXACT_NEIGHBORS),
        }
    }

    /// Run every enabled strategy in fixed order.
    ///
    /// Each strategy decides against the original text; a strategy that fires
    /// censors the running output, so redactions accumulate. A strategy that
    /// errors or panics is skipped and the rest still run.
    pub async fn check_and_censor(&self, text: &str, checks: &EnabledChecks) -> CensorReport {
        let mut finished = text.to_string();
        let mut is_bad = false;
        let mut caught = Vec::new();

        for kind in CheckKind::ORDER {
            if !checks.is_enabled(kind) {
                continue;
            }
            let (strategy, neighbors) = self.strategy(kind);

            match guarded(kind, strategy.flag(text, ListOverride::default())).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(fault) => {
                    warn!("{}, continuing with remaining strategies", fault);
                    continue;
                }
            }

            is_bad = true;
            caught.push(kind);
            debug!("Strategy {} flagged message", kind);

            match guarded(kind, strategy.censor(&finished, self.replacement, neighbors, ListOverride::default())).await {
                Ok(censored) => finished = censored,
                Err(fault) => warn!("{}, message left uncensored by this strategy", fault),
            }
        }

        CensorReport {
            finished_message: finished,
            is_bad,
            caught,
        }
    }

    /// List-based detection only, against caller-supplied lists.
    ///
    /// Runs the fuzzy check then the substring check with `word_list` standing
    /// in for both the blacklist and the long-list. Meant for extensions that
    /// want their own rules without the default pipeline.
    pub async fn censor_with_word_list(
        &self,
        text: &str,
        word_list: &[String],
        allowed_words: &HashSet<String>,
        replacement: char,
    ) -> (String, bool) {
        let lists = ListOverride::new(word_list, allowed_words);
        let mut finished = text.to_string();
        let mut is_bad = false;

        for kind in [CheckKind::Fuzzy, CheckKind::ExactSubstring] {
            let (strategy, _) = self.strategy(kind);
            if let Ok(true) = guarded(kind, strategy.flag(text, lists)).await {
                is_bad = true;
                match guarded(kind, strategy.censor(&finished, replacement, CUSTOM_LIST_NEIGHBORS, lists)).await {
                    Ok(censored) => finished = censored,
                    Err(fault) => warn!("{}", fault),
                }
            }
        }

        (finished, is_bad)
    }
}

/// Await a strategy call, turning errors and panics into a strategy fault.
async fn guarded<T, F>(kind: CheckKind, fut: F) -> Result<T, ModerationFault>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ModerationFault::strategy(kind.name(), e)),
        Err(payload) => Err(ModerationFault::strategy(kind.name(), panic_message(payload.as_ref()))),
    }
}
