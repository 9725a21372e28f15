//! Lossless splitting of chat text into word and separator runs.
//!
//! Every censoring routine works on this token sequence: a redaction only ever
//! replaces a whole token with filler of the same length, so the censored text
//! keeps the shape of the original message.

/// A maximal run of either alphanumeric (word) or non-alphanumeric (separator)
/// characters, borrowed from the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub is_word: bool,
}

impl<'a> Token<'a> {
    /// Length in characters, which is what redaction preserves.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn lowercase(&self) -> String {
        self.text.to_lowercase()
    }

    /// True when the token is made only of whitespace.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Split `text` into alternating word/separator runs in a single pass.
///
/// Concatenating the returned tokens reproduces `text` exactly and no token is
/// ever empty.
pub fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut current: Option<bool> = None;

    for (idx, ch) in text.char_indices() {
        let is_word = ch.is_alphanumeric();
        match current {
            Some(kind) if kind == is_word => {}
            Some(kind) => {
                tokens.push(Token { text: &text[start..idx], is_word: kind });
                start = idx;
                current = Some(is_word);
            }
            None => current = Some(is_word),
        }
    }

    if let Some(kind) = current {
        tokens.push(Token { text: &text[start..], is_word: kind });
    }

    tokens
}

/// Filler string with the same character count as `token`.
pub fn mask(token: &str, filler: char) -> String {
    std::iter::repeat(filler).take(token.chars().count()).collect()
}

/// Rebuild the text, replacing every token for which `redact` returns true.
pub fn render<F>(tokens: &[Token<'_>], filler: char, mut redact: F) -> String
where
    F: FnMut(usize, &Token<'_>) -> bool,
{
    let mut out = String::with_capacity(tokens.iter().map(|t| t.text.len()).sum());
    for (i, token) in tokens.iter().enumerate() {
        if redact(i, token) {
            out.push_str(&mask(token.text, filler));
        } else {
            out.push_str(token.text);
        }
    }
    out
}

/// Mark up to `count` word tokens on each side of `index`, skipping separators.
pub fn mark_word_neighbors(tokens: &[Token<'_>], marks: &mut [bool], index: usize, count: usize) {
    let mut seen = 0;
    let mut j = index;
    while j > 0 && seen < count {
        j -= 1;
        if tokens[j].is_word {
            marks[j] = true;
            seen += 1;
        }
    }

    seen = 0;
    j = index;
    while j + 1 < tokens.len() && seen < count {
        j += 1;
        if tokens[j].is_word {
            marks[j] = true;
            seen += 1;
        }
    }
}
