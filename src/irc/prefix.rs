//! ISUPPORT `PREFIX` handling.
//!
//! Maps channel status modes to their display symbols and keeps a member's
//! status string ordered by the server-declared precedence.

use serde::{Deserialize, Serialize};

/// Prefix table used until the server advertises its own.
pub const DEFAULT_PREFIX: &str = "(qaohv)~&@%+";

/// Parsed `PREFIX=(modes)symbols` table. Entries are in precedence order,
/// highest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixTable {
    raw: String,
    entries: Vec<(char, char)>,
}

impl Default for PrefixTable {
    fn default() -> Self {
        Self::parse(DEFAULT_PREFIX)
    }
}

impl PrefixTable {
    /// Parse a `PREFIX` value. Malformed input yields an empty table.
    pub fn parse(value: &str) -> Self {
        Self {
            raw: value.to_string(),
            entries: parse_prefix(value),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn symbol_for(&self, mode: char) -> Option<char> {
        self.entries.iter().find(|(m, _)| *m == mode).map(|(_, s)| *s)
    }

    pub fn mode_for(&self, symbol: char) -> Option<char> {
        self.entries.iter().find(|(_, s)| *s == symbol).map(|(m, _)| *m)
    }

    pub fn is_symbol(&self, c: char) -> bool {
        self.entries.iter().any(|(_, s)| *s == c)
    }

    /// All status symbols in precedence order.
    pub fn symbols(&self) -> String {
        self.entries.iter().map(|(_, s)| *s).collect()
    }

    /// Add `symbol` to `current`, keeping precedence order.
    pub fn insert(&self, current: &str, symbol: char) -> String {
        insert_symbol(current, symbol, &self.symbols())
    }

    /// Remove every occurrence of `symbol` from `current`.
    pub fn remove(&self, current: &str, symbol: char) -> String {
        current.chars().filter(|c| *c != symbol).collect()
    }

    /// Split leading status symbols off a name, e.g. `@+alice`.
    pub fn split_symbols<'a>(&self, name: &'a str) -> (String, &'a str) {
        let idx = name
            .char_indices()
            .find(|(_, c)| !self.is_symbol(*c))
            .map(|(i, _)| i)
            .unwrap_or(name.len());
        let symbols: String = name[..idx].chars().collect();
        (self.sort(&symbols), &name[idx..])
    }

    /// Reorder an arbitrary symbol string by precedence.
    pub fn sort(&self, symbols: &str) -> String {
        symbols.chars().fold(String::new(), |acc, c| self.insert(&acc, c))
    }
}

/// Parse `(modes)symbols` into positional `(mode, symbol)` pairs.
pub fn parse_prefix(value: &str) -> Vec<(char, char)> {
    let Some(rest) = value.strip_prefix('(') else {
        return Vec::new();
    };
    let Some(close) = rest.find(')') else {
        return Vec::new();
    };
    let modes = &rest[..close];
    let symbols = &rest[close + 1..];
    modes.chars().zip(symbols.chars()).collect()
}

/// Insert `new_symbol` into `current` by precedence.
///
/// Any existing occurrence of `new_symbol` is removed first. The symbol goes
/// right before the first existing symbol with a lower precedence (a larger
/// index in `prefix_symbols`). Unknown symbols are appended.
pub fn insert_symbol(current: &str, new_symbol: char, prefix_symbols: &str) -> String {
    let rank = |c: char| prefix_symbols.chars().position(|s| s == c);
    let mut out: Vec<char> = current.chars().filter(|c| *c != new_symbol).collect();

    let Some(new_rank) = rank(new_symbol) else {
        out.push(new_symbol);
        return out.into_iter().collect();
    };

    let pos = out
        .iter()
        .position(|c| matches!(rank(*c), Some(r) if r > new_rank))
        .unwrap_or(out.len());
    out.insert(pos, new_symbol);
    out.into_iter().collect()
}

/// Same as [`insert_symbol`] but takes a full `PREFIX` value.
pub fn insert_prefix_in_order(current: &str, new_symbol: char, prefix: &str) -> String {
    let symbols: String = parse_prefix(prefix).into_iter().map(|(_, s)| s).collect();
    insert_symbol(current, new_symbol, &symbols)
}
