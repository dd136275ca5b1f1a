//! # Template Engine
//!
//! Substitutes `<# #>` tokens in a script template. An empty token (`<##>`, or the short
//! `<#>` form where the two markers share their `#`) is filled positionally; a token
//! wrapping an identifier (`<#name#>`) is filled from a keyed map.
//!
//! Saturation never mutates the template: every call starts again from the original
//! text, so the same template can be filled any number of times.

use crate::constants::{
    OPTIONS_TOKEN_END_KEY, OPTIONS_TOKEN_START_KEY, TEMPLATE_TOKEN_END, TEMPLATE_TOKEN_START,
};
use lazy_static::lazy_static;
use regex::Regex;
use std::{borrow::Cow, collections::HashMap, ops::Range};
use thiserror::Error;

lazy_static! {
    // The interior of a keyed token. Anything else between the markers is plain script text.
    static ref TOKEN_KEY_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").unwrap();
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template expects {expected} argument(s) but only {supplied} were supplied.")]
    ArgumentsMissing { expected: usize, supplied: usize },
}

/// Start and end markers of a template token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenDelimiters {
    pub start: String,
    pub end: String,
}

impl TokenDelimiters {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

impl Default for TokenDelimiters {
    fn default() -> Self {
        Self::new(TEMPLATE_TOKEN_START, TEMPLATE_TOKEN_END)
    }
}

/// One token occurrence, located by byte range in the template text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub range: Range<usize>,
    /// `None` for an empty (positional) token.
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    text: String,
    delimiters: TokenDelimiters,
}

impl Template {
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_delimiters(text, TokenDelimiters::default())
    }

    pub fn with_delimiters(text: impl Into<String>, delimiters: TokenDelimiters) -> Self {
        Self {
            text: text.into(),
            delimiters,
        }
    }

    /// The original, unsaturated text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn delimiters(&self) -> &TokenDelimiters {
        &self.delimiters
    }

    /// All token occurrences in left-to-right order.
    pub fn tokens(&self) -> Vec<Token> {
        scan(&self.text, &self.delimiters)
    }

    pub fn token_count(&self) -> usize {
        self.tokens().len()
    }

    /// Replaces the Nth token occurrence with the Nth value.
    ///
    /// Every token counts, keyed or not. Supplying fewer values than there are tokens is
    /// an error; values beyond the last token are ignored.
    pub fn saturate<S: AsRef<str>>(&self, values: &[S]) -> Result<String, TemplateError> {
        let tokens = self.tokens();
        if values.len() < tokens.len() {
            return Err(TemplateError::ArgumentsMissing {
                expected: tokens.len(),
                supplied: values.len(),
            });
        }
        if values.len() > tokens.len() {
            log::warn!(
                "Template has {} token(s); ignoring {} extra argument(s).",
                tokens.len(),
                values.len() - tokens.len()
            );
        }
        Ok(splice(&self.text, &tokens, |position, _| {
            values.get(position).map(|v| Cow::Borrowed(v.as_ref()))
        }))
    }

    /// Replaces every keyed token whose key is present in `values`.
    ///
    /// Tokens without a matching entry (and empty tokens) stay in the text as written.
    /// The map may carry `templateTokenStart` / `templateTokenEnd` entries that override
    /// the delimiters for this call only.
    pub fn saturate_with_map(&self, values: &HashMap<String, String>) -> String {
        let delimiters = TokenDelimiters {
            start: values
                .get(OPTIONS_TOKEN_START_KEY)
                .cloned()
                .unwrap_or_else(|| self.delimiters.start.clone()),
            end: values
                .get(OPTIONS_TOKEN_END_KEY)
                .cloned()
                .unwrap_or_else(|| self.delimiters.end.clone()),
        };
        let tokens = scan(&self.text, &delimiters);

        let mut unresolved = Vec::new();
        let saturated = splice(&self.text, &tokens, |_, token| {
            let key = token.key.as_deref()?;
            match values.get(key) {
                Some(value) => Some(Cow::Borrowed(value.as_str())),
                None => {
                    unresolved.push(key.to_string());
                    None
                }
            }
        });
        if !unresolved.is_empty() {
            log::warn!(
                "Template keys without a value were left in place: {}",
                unresolved.join(", ")
            );
        }
        saturated
    }
}

// --- Scanning ---

/// Length of the longest proper prefix of `end` that is also a suffix of `start`.
/// `<#` and `#>` share one byte, which is what makes `<#>` a complete token.
fn delimiter_overlap(start: &str, end: &str) -> usize {
    (1..end.len())
        .rev()
        .filter(|&k| end.is_char_boundary(k))
        .find(|&k| end.get(..k).is_some_and(|prefix| start.ends_with(prefix)))
        .unwrap_or(0)
}

fn scan(text: &str, delimiters: &TokenDelimiters) -> Vec<Token> {
    let (start, end) = (delimiters.start.as_str(), delimiters.end.as_str());
    if start.is_empty() || end.is_empty() {
        return Vec::new();
    }
    let overlap = delimiter_overlap(start, end);

    let mut tokens = Vec::new();
    let mut cursor = 0;
    while let Some(found) = text.get(cursor..).and_then(|rest| rest.find(start)) {
        let open = cursor + found;
        let interior_start = open + start.len();
        let compact_at = interior_start - overlap;
        let starts_with_end = |at: usize| text.get(at..).is_some_and(|rest| rest.starts_with(end));

        // Empty token first (`<##>`), then the compact form (`<#>`), then a keyed token.
        let end_at = if starts_with_end(interior_start) {
            Some(interior_start)
        } else if overlap > 0 && starts_with_end(compact_at) {
            Some(compact_at)
        } else {
            text.get(interior_start..)
                .and_then(|rest| rest.find(end))
                .map(|i| interior_start + i)
        };
        let Some(end_at) = end_at else {
            break; // Unterminated start marker: the rest is plain text.
        };
        let close = end_at + end.len();

        let interior = if end_at > interior_start {
            text.get(interior_start..end_at).unwrap_or("")
        } else {
            ""
        };
        let key = interior.trim();

        if key.is_empty() {
            tokens.push(Token {
                range: open..close,
                key: None,
            });
            cursor = close;
        } else if TOKEN_KEY_RE.is_match(key) {
            tokens.push(Token {
                range: open..close,
                key: Some(key.to_string()),
            });
            cursor = close;
        } else {
            cursor = interior_start;
        }
    }
    tokens
}

/// Rebuilds `text` with each token replaced by `replacement(position, token)`.
/// A `None` replacement keeps the token text unchanged.
fn splice<'v, F>(text: &str, tokens: &[Token], mut replacement: F) -> String
where
    F: FnMut(usize, &Token) -> Option<Cow<'v, str>>,
{
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (position, token) in tokens.iter().enumerate() {
        out.push_str(text.get(cursor..token.range.start).unwrap_or(""));
        match replacement(position, token) {
            Some(value) => out.push_str(&value),
            None => out.push_str(text.get(token.range.clone()).unwrap_or("")),
        }
        cursor = token.range.end;
    }
    out.push_str(text.get(cursor..).unwrap_or(""));
    out
}
