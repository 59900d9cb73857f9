//! Layout template tokenizer.
//!
//! Placeholders:
//! - `#name` binds an attribute or component of the bound concept.
//! - `#[name]` embeds the projection of a component.
//! - `##` is a literal `#`.
//!
//! Newlines become line breaks; everything else is static text.

use once_cell::sync::Lazy;
use regex::Regex;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"##|#\[([A-Za-z_][A-Za-z0-9_]*)\]|#([A-Za-z_][A-Za-z0-9_]*)")
        .expect("placeholder regex must compile")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutToken {
    Text(String),
    LineBreak,
    /// `#name`
    Placeholder(String),
    /// `#[name]`
    Nested(String),
}

/// Splits a text layout into tokens; adjacent static text is merged.
pub fn tokenize(layout: &str) -> Vec<LayoutToken> {
    let mut tokens = Vec::new();
    for (index, line) in layout.split('\n').enumerate() {
        if index > 0 {
            tokens.push(LayoutToken::LineBreak);
        }
        tokenize_line(line, &mut tokens);
    }
    tokens
}

/// Splits a table layout into rows of cell layouts.
///
/// Rows are separated by newlines and cells by `|`; blank rows are skipped.
pub fn table_rows(layout: &str) -> Vec<Vec<String>> {
    layout
        .lines()
        .filter(|row| !row.trim().is_empty())
        .map(|row| row.split('|').map(|cell| cell.trim().to_string()).collect())
        .collect()
}

fn tokenize_line(line: &str, tokens: &mut Vec<LayoutToken>) {
    let mut cursor = 0;
    for captures in PLACEHOLDER.captures_iter(line) {
        let Some(matched) = captures.get(0) else {
            continue;
        };
        push_text(tokens, &line[cursor..matched.start()]);
        cursor = matched.end();

        if let Some(name) = captures.get(1) {
            tokens.push(LayoutToken::Nested(name.as_str().to_string()));
        } else if let Some(name) = captures.get(2) {
            tokens.push(LayoutToken::Placeholder(name.as_str().to_string()));
        } else {
            push_text(tokens, "#");
        }
    }
    push_text(tokens, &line[cursor..]);
}

fn push_text(tokens: &mut Vec<LayoutToken>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(LayoutToken::Text(previous)) = tokens.last_mut() {
        previous.push_str(text);
    } else {
        tokens.push(LayoutToken::Text(text.to_string()));
    }
}
