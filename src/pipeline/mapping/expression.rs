//! Bracket-path expressions: `identifier['key']["key"]...`.

use std::sync::LazyLock;

use regex::Regex;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)").unwrap());

static ACCESSOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*\[\s*(?:'([^']*)'|"([^"]*)")\s*\]"#).unwrap());

/// Canonical form for case/punctuation-insensitive matching: ASCII
/// alphanumerics only, lowercased.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Remove one layer of matching surrounding quotes, if present.
pub fn strip_quotes(text: &str) -> &str {
    let trimmed = text.trim();
    for quote in ['\'', '"'] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].trim();
        }
    }
    trimmed
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub identifier: String,
    pub path: Vec<String>,
}

impl Expression {
    /// Strict parse: the whole text must be one identifier followed by zero or
    /// more accessors.
    pub fn parse(text: &str) -> Option<Self> {
        let head = IDENTIFIER.captures(text)?;
        let identifier = head.get(1)?.as_str().to_string();
        let mut rest = &text[head.get(0)?.end()..];

        let mut path = Vec::new();
        while let Some(accessor) = ACCESSOR.captures(rest) {
            let key = accessor.get(1).or_else(|| accessor.get(2))?;
            path.push(key.as_str().to_string());
            rest = &rest[accessor.get(0)?.end()..];
        }

        rest.trim().is_empty().then_some(Self { identifier, path })
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.identifier)?;
        for key in &self.path {
            write!(f, "['{key}']")?;
        }
        Ok(())
    }
}
