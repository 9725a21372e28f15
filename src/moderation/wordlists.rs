// src/moderation/wordlists.rs - Word lists loaded once at startup

use anyhow::{Context, Result};
use base64::engine::{general_purpose, Engine};
use log::{debug, info};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;

use crate::config::WordListPaths;

const BUILTIN_BLACKLIST: &str = include_str!("../../resources/blacklist.txt");
const BUILTIN_ALLOWLIST: &str = include_str!("../../resources/allowlist.txt");
const BUILTIN_LONGLIST: &str = include_str!("../../resources/longlist.b64");
const BUILTIN_COMMON_WORDS: &str = include_str!("../../resources/common_words.txt");

/// Immutable word lists shared by the list-based strategies.
///
/// `blacklist` and `longlist` keep file order because censoring tests entries
/// in order and stops at the first hit.
#[derive(Debug, Clone, Default)]
pub struct WordLists {
    pub blacklist: Vec<String>,
    pub allowlist: HashSet<String>,
    pub longlist: Vec<String>,
    pub common_words: HashSet<String>,
}

impl WordLists {
    /// Lists embedded in the binary.
    pub fn builtin() -> Result<Self> {
        let lists = Self {
            blacklist: parse_word_list(BUILTIN_BLACKLIST),
            allowlist: parse_word_list(BUILTIN_ALLOWLIST).into_iter().collect(),
            longlist: decode_longlist(BUILTIN_LONGLIST).context("built-in long-list is corrupt")?,
            common_words: parse_word_list(BUILTIN_COMMON_WORDS).into_iter().collect(),
        };
        debug!(
            "Built-in word lists: {} blacklist, {} allowlist, {} long-list, {} common",
            lists.blacklist.len(),
            lists.allowlist.len(),
            lists.longlist.len(),
            lists.common_words.len()
        );
        Ok(lists)
    }

    /// Built-in lists with any configured override files swapped in.
    ///
    /// Relative override paths are resolved against `base_dir`.
    pub async fn load(paths: &WordListPaths, base_dir: &Path) -> Result<Self> {
        let mut lists = Self::builtin()?;

        if let Some(path) = &paths.blacklist {
            let path = base_dir.join(path);
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading blacklist {}", path.display()))?;
            lists.blacklist = parse_word_list(&content);
            info!("Loaded {} blacklist words from {}", lists.blacklist.len(), path.display());
        }

        if let Some(path) = &paths.allowlist {
            let path = base_dir.join(path);
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading allowlist {}", path.display()))?;
            lists.allowlist = parse_word_list(&content).into_iter().collect();
            info!("Loaded {} allowlist words from {}", lists.allowlist.len(), path.display());
        }

        if let Some(path) = &paths.longlist {
            let path = base_dir.join(path);
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading long-list {}", path.display()))?;
            lists.longlist = decode_longlist(&content)
                .with_context(|| format!("decoding long-list {}", path.display()))?;
            info!("Loaded {} long-list words from {}", lists.longlist.len(), path.display());
        }

        Ok(lists)
    }

    /// Explicit lists, mainly for tests and embedders with their own vocabulary.
    pub fn custom<B, A, L, C>(blacklist: B, allowlist: A, longlist: L, common_words: C) -> Self
    where
        B: IntoIterator,
        B::Item: AsRef<str>,
        A: IntoIterator,
        A::Item: AsRef<str>,
        L: IntoIterator,
        L::Item: AsRef<str>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        Self {
            blacklist: normalize(blacklist),
            allowlist: normalize(allowlist).into_iter().collect(),
            longlist: normalize(longlist),
            common_words: normalize(common_words).into_iter().collect(),
        }
    }
}

fn normalize<I>(words: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut seen = HashSet::new();
    words
        .into_iter()
        .map(|w| w.as_ref().trim().to_lowercase())
        .filter(|w| !w.is_empty() && !w.starts_with('#'))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Newline-delimited words, lowercased, blank lines and `#` comments dropped,
/// duplicates removed keeping first occurrence.
pub fn parse_word_list(content: &str) -> Vec<String> {
    normalize(content.lines())
}

/// Decode the packed long-list: base64 text wrapping a newline-delimited list.
pub fn decode_longlist(encoded: &str) -> Result<Vec<String>> {
    let compact: String = encoded.split_whitespace().collect();
    let bytes = general_purpose::STANDARD
        .decode(compact.as_bytes())
        .context("long-list is not valid base64")?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(parse_word_list(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_word_list() {
        let words = parse_word_list("Foo\n\n  bar  \n# comment\nfoo\n");
        assert_eq!(words, vec!["foo".to_string(), "bar".to_string()]);
    }

    #[test]
    fn test_decode_longlist() {
        let encoded = general_purpose::STANDARD.encode("Alpha\nbeta\n\ngamma\n");
        let words = decode_longlist(&format!("{}\n", encoded)).unwrap();
        assert_eq!(words, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_decode_longlist_rejects_garbage() {
        assert!(decode_longlist("not base64 at all!!").is_err());
    }

    #[test]
    fn test_builtin_lists_load() {
        let lists = WordLists::builtin().unwrap();
        assert!(!lists.blacklist.is_empty());
        assert!(!lists.longlist.is_empty());
        assert!(lists.common_words.contains("the"));
        assert!(lists.allowlist.contains("duck"));
    }

    #[tokio::test]
    async fn test_override_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("black.txt"), "zonk\nblarg\n").await.unwrap();

        let paths = WordListPaths {
            blacklist: Some("black.txt".into()),
            ..WordListPaths::default()
        };
        let lists = WordLists::load(&paths, dir.path()).await.unwrap();
        assert_eq!(lists.blacklist, vec!["zonk", "blarg"]);
        // untouched lists stay built-in
        assert!(!lists.longlist.is_empty());
    }

    #[tokio::test]
    async fn test_missing_override_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WordListPaths {
            allowlist: Some("nope.txt".into()),
            ..WordListPaths::default()
        };
        assert!(WordLists::load(&paths, dir.path()).await.is_err());
    }
}
