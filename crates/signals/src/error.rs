use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignalError {
    /// The configured signal pattern does not compile. Fatal at startup;
    /// on a live settings change the previous pattern stays in effect.
    #[error("Invalid signal pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}
