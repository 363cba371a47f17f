pub mod error;
pub mod extractor;

// Re-export the key components to provide a clean, public-facing API.
pub use error::SignalError;
pub use extractor::{is_valid_symbol, normalize_symbol, ParsedSignal, SignalExtractor};

/// Checks that a signal pattern compiles, without building an extractor.
/// Used by the dashboard to reject bad patterns before they reach the store.
pub fn validate_pattern(pattern: &str) -> Result<(), SignalError> {
    regex::Regex::new(pattern)?;
    Ok(())
}
