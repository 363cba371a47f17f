use std::collections::HashSet;
use std::sync::RwLock;

use core_types::ChatMessage;
use regex::Regex;

use crate::error::SignalError;

/// A symbol pulled out of one chat message, before any exchange lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignal {
    /// Normalized exchange symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    /// The token as it appeared in the message.
    pub raw_token: String,
}

struct ExtractorState {
    pattern: Regex,
    blacklist: HashSet<String>,
}

/// Extracts trading signals from free-form chat text.
///
/// The pattern and blacklist come from settings and can be swapped at
/// runtime; the swap happens under a lock so in-flight messages see either
/// the old configuration or the new one, never a mix. The lock is a std
/// `RwLock` because nothing async happens while it is held.
pub struct SignalExtractor {
    state: RwLock<ExtractorState>,
}

impl SignalExtractor {
    /// Builds an extractor. A pattern that fails to compile is a fatal
    /// configuration error.
    pub fn new(pattern: &str, ignored_symbols: &str) -> Result<Self, SignalError> {
        Ok(Self {
            state: RwLock::new(ExtractorState {
                pattern: Regex::new(pattern)?,
                blacklist: parse_blacklist(ignored_symbols),
            }),
        })
    }

    /// Applies the pattern to the message text and returns the normalized
    /// symbol, if any.
    ///
    /// A message that does not match is not an error; neither is a matched
    /// symbol that fails validation or sits on the blacklist. Both return
    /// `None` and the message is forgotten.
    pub fn parse(&self, message: &ChatMessage) -> Option<ParsedSignal> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());

        let raw_token = state
            .pattern
            .captures(&message.text)?
            .get(1)?
            .as_str()
            .to_string();
        let symbol = normalize_symbol(&raw_token);

        if !is_valid_symbol(&symbol) {
            tracing::debug!(token = %raw_token, "Matched token is not a valid symbol.");
            return None;
        }
        if state.blacklist.contains(&symbol) {
            tracing::debug!(%symbol, "Symbol is on the ignore list.");
            return None;
        }

        Some(ParsedSignal { symbol, raw_token })
    }

    /// Swaps in a new pattern atomically. On a compile error the previous
    /// pattern stays in effect and the error is returned to the caller.
    pub fn update_pattern(&self, pattern: &str) -> Result<(), SignalError> {
        let compiled = Regex::new(pattern)?;
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.pattern = compiled;
        Ok(())
    }

    pub fn update_blacklist(&self, ignored_symbols: &str) {
        let parsed = parse_blacklist(ignored_symbols);
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.blacklist = parsed;
    }
}

/// Normalizes a raw token into exchange form: trim, uppercase, strip a
/// leading `$`/`#` and a trailing `/USDT`, `-USDT` or `_USDT` spelling,
/// then append `USDT` when missing. Idempotent.
pub fn normalize_symbol(raw: &str) -> String {
    let mut symbol = raw.trim().to_uppercase();

    if let Some(stripped) = symbol.strip_prefix(|c: char| c == '$' || c == '#') {
        symbol = stripped.to_string();
    }
    for suffix in ["/USDT", "-USDT", "_USDT"] {
        if let Some(stripped) = symbol.strip_suffix(suffix) {
            symbol = stripped.to_string();
            break;
        }
    }
    if !symbol.ends_with("USDT") {
        symbol.push_str("USDT");
    }
    symbol
}

/// A plausible exchange symbol: 4 to 20 characters, `[A-Z0-9]` only,
/// quoted in USDT.
pub fn is_valid_symbol(symbol: &str) -> bool {
    (4..=20).contains(&symbol.len())
        && symbol.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        && symbol.ends_with("USDT")
}

/// Splits the comma-separated ignore list; entries may be bare (`BTC`) or
/// already suffixed (`BTCUSDT`), so each entry is normalized before use.
fn parse_blacklist(ignored_symbols: &str) -> HashSet<String> {
    ignored_symbols
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(normalize_symbol)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const PATTERN: &str = r"(?i)\$([A-Z]{2,10})\b";

    fn message(text: &str) -> ChatMessage {
        ChatMessage {
            channel_id: 42,
            message_id: 1,
            sender: "caller".to_string(),
            text: text.to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn normalization_handles_common_spellings() {
        assert_eq!(normalize_symbol("$BTC"), "BTCUSDT");
        assert_eq!(normalize_symbol("#BTC"), "BTCUSDT");
        assert_eq!(normalize_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(normalize_symbol("BTC-USDT"), "BTCUSDT");
        assert_eq!(normalize_symbol("BTC_USDT"), "BTCUSDT");
        assert_eq!(normalize_symbol("btc"), "BTCUSDT");
        assert_eq!(normalize_symbol(" eth "), "ETHUSDT");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["$BTC", "BTC/USDT", "btc", "1000PEPEUSDT"] {
            let once = normalize_symbol(raw);
            assert_eq!(normalize_symbol(&once), once);
        }
    }

    #[test]
    fn symbol_shape_validation() {
        assert!(is_valid_symbol("BTCUSDT"));
        assert!(is_valid_symbol("1000PEPEUSDT"));
        assert!(is_valid_symbol("USDT")); // 4 chars, technically shaped
        assert!(!is_valid_symbol("BTC")); // no suffix
        assert!(!is_valid_symbol("BTC-USDT")); // bad character
        assert!(!is_valid_symbol("AVERYLONGSYMBOLNAMEUSDT")); // too long
        assert!(!is_valid_symbol(""));
    }

    #[test]
    fn parse_extracts_first_capture() {
        let extractor = SignalExtractor::new(PATTERN, "").unwrap();
        let signal = extractor.parse(&message("Long $btc now, target 52k")).unwrap();
        assert_eq!(signal.symbol, "BTCUSDT");
        assert_eq!(signal.raw_token, "btc");
    }

    #[test]
    fn non_matching_message_yields_nothing() {
        let extractor = SignalExtractor::new(PATTERN, "").unwrap();
        assert_eq!(extractor.parse(&message("good morning traders")), None);
    }

    #[test]
    fn blacklisted_symbols_are_filtered() {
        let extractor = SignalExtractor::new(PATTERN, "BTC, DOGEUSDT").unwrap();
        assert_eq!(extractor.parse(&message("buy $BTC")), None);
        assert_eq!(extractor.parse(&message("buy $DOGE")), None);
        assert!(extractor.parse(&message("buy $ETH")).is_some());
    }

    #[test]
    fn invalid_pattern_is_rejected_and_previous_kept() {
        assert!(SignalExtractor::new("(unclosed", "").is_err());

        let extractor = SignalExtractor::new(PATTERN, "").unwrap();
        assert!(extractor.update_pattern("(also unclosed").is_err());
        // The original pattern still applies.
        assert!(extractor.parse(&message("$SOL pump")).is_some());
    }

    #[test]
    fn pattern_swap_takes_effect() {
        let extractor = SignalExtractor::new(PATTERN, "").unwrap();
        extractor.update_pattern(r"#([A-Z]{2,10})\b").unwrap();
        assert_eq!(extractor.parse(&message("$BTC")), None);
        assert_eq!(
            extractor.parse(&message("#ETH")).unwrap().symbol,
            "ETHUSDT"
        );
    }
}
