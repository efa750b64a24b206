//! Symbol watchlists shared between the consumer and the feed server.
//!
//! A watchlist is plain text: symbols separated by commas, whitespace or new lines.
//! Symbols are normalised to upper case and duplicates are dropped while keeping the
//! first-seen order.

use std::collections::HashSet;
use std::io::BufRead;

use crate::error::FeedError;
use crate::result::Result;

/// Parses a watchlist from a buffered reader.
pub fn parse_symbols<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    for line_result in reader.lines() {
        let line = line_result.map_err(FeedError::Io)?;
        for raw in line.split(|c: char| c == ',' || c.is_whitespace()) {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let symbol = normalize_symbol(trimmed)?;
            if seen.insert(symbol.clone()) {
                symbols.push(symbol);
            }
        }
    }
    Ok(symbols)
}

/// Parses a comma separated list, as accepted on the command line.
pub fn parse_symbol_list(raw: &str) -> Result<Vec<String>> {
    parse_symbols(raw.as_bytes())
}

/// Upper-cases `raw` and checks it only holds characters found in exchange symbols.
pub fn normalize_symbol(raw: &str) -> Result<String> {
    let valid = raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=' | '_'));
    if raw.is_empty() || !valid {
        return Err(FeedError::ParseSymbols(format!("invalid symbol '{}'", raw)));
    }
    Ok(raw.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn mixed_separators_and_duplicates() {
        let input = Cursor::new("aapl, msft\n\nTSLA googl\nAAPL\n");
        let symbols = parse_symbols(input).unwrap();
        assert_eq!(symbols, vec!["AAPL", "MSFT", "TSLA", "GOOGL"]);
    }

    #[test]
    fn index_and_class_symbols_are_accepted() {
        let symbols = parse_symbol_list("^GSPC,BRK.B,EURUSD=X").unwrap();
        assert_eq!(symbols, vec!["^GSPC", "BRK.B", "EURUSD=X"]);
    }

    #[test]
    fn invalid_symbol_fails() {
        assert!(matches!(
            parse_symbol_list("AAPL,M$FT"),
            Err(FeedError::ParseSymbols(_))
        ));
    }
}
