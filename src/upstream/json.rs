//! JSON decoding for upstream responses with path-aware error messages.
//!
//! Universalis and XIVAPI both occasionally return `null` where a value is
//! documented, so a failure names the JSON path and shows the offending
//! fragment instead of only serde's line/column.

use anyhow::{Result, anyhow};
use serde::de::DeserializeOwned;

/// Characters of context shown on each side of the error position.
const SNIPPET_RADIUS: usize = 24;

/// Decode `body`, describing the failing path and a snippet on error.
pub fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let path = err.path().to_string();
        let inner = err.into_inner();
        let (line, column) = (inner.line(), inner.column());

        let message = inner.to_string();
        let message = message
            .strip_suffix(&format!(" at line {line} column {column}"))
            .unwrap_or(&message);

        let location = if path.is_empty() || path == "." {
            String::new()
        } else {
            format!("at '{path}': ")
        };
        anyhow!(
            "{location}{} (line {line} col {column}) near `{}`",
            describe_mismatch(message),
            snippet(body, line, column)
        )
    })
}

/// Reword "invalid type: null, expected u32" as "expected u32, got null".
fn describe_mismatch(message: &str) -> String {
    message
        .strip_prefix("invalid type: ")
        .and_then(|rest| rest.split_once(", expected "))
        .map(|(actual, expected)| format!("expected {expected}, got {actual}"))
        .unwrap_or_else(|| message.to_owned())
}

fn snippet(body: &str, line: usize, column: usize) -> String {
    let Some(text) = body.lines().nth(line.saturating_sub(1)) else {
        return String::new();
    };
    let chars: Vec<char> = text.chars().collect();
    let at = column.saturating_sub(1).min(chars.len());
    let start = at.saturating_sub(SNIPPET_RADIUS);
    let end = (at + SNIPPET_RADIUS).min(chars.len());
    chars[start..end].iter().collect::<String>().trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Listing {
        #[serde(rename = "pricePerUnit")]
        price_per_unit: u32,
    }

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Market {
        listings: Vec<Listing>,
    }

    #[test]
    fn reports_path_and_mismatch() {
        let body = r#"{"listings": [{"pricePerUnit": 120}, {"pricePerUnit": null}]}"#;
        let err = decode::<Market>(body).unwrap_err().to_string();
        assert!(err.contains("listings[1].pricePerUnit"), "{err}");
        assert!(err.contains("expected u32, got null"), "{err}");
        assert!(err.contains("null"), "{err}");
    }

    #[test]
    fn root_errors_have_no_path_prefix() {
        let err = decode::<Market>("not json").unwrap_err().to_string();
        assert!(!err.starts_with("at '"), "{err}");
    }

    #[test]
    fn decodes_valid_bodies() {
        let market: Market = decode(r#"{"listings": [{"pricePerUnit": 7}]}"#).unwrap();
        assert_eq!(market.listings.len(), 1);
    }

    #[test]
    fn mismatch_without_expected_is_unchanged() {
        assert_eq!(describe_mismatch("trailing characters"), "trailing characters");
    }
}
