//! Index-page token scan.

use regex::Regex;
use std::collections::HashSet;

/// Pulls 48-hex identifiers out of an index-page body, deduplicated, in
/// document order.
pub(crate) fn extract_tokens(pattern: &Regex, body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();
    for found in pattern.find_iter(body) {
        let token = found.as_str().to_string();
        if seen.insert(token.clone()) {
            tokens.push(token);
        }
    }
    tokens
}
