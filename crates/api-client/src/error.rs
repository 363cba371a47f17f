use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Binance rejected the request (code {code}): {msg}")]
    Binance { code: i64, msg: String },

    #[error("Failed to deserialize the API response: {0}")]
    Deserialization(String),

    #[error("Invalid data format from API: {0}")]
    InvalidData(String),

    #[error("Invalid API credentials: {0}")]
    InvalidCredentials(String),

    #[error("WebSocket failure: {0}")]
    WebSocket(String),

    #[error("Symbol {0} is not listed in exchange info")]
    SymbolUnknown(String),
}
