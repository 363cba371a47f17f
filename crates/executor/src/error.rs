use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Account {0} is misconfigured: {1}")]
    AccountMisconfigured(i64, String),

    #[error("No gateway client registered for account {0}")]
    NoClient(i64),

    #[error("Price for {0} is unavailable: {1}")]
    PriceUnavailable(String, String),

    #[error("Symbol {0} is not tradable on the exchange")]
    SymbolUnknown(String),

    #[error("Entry order for {symbol} was rejected: {reason}")]
    EntryFailed { symbol: String, reason: String },

    #[error("Exchange error: {0}")]
    Api(#[from] api_client::ApiError),

    #[error("Store error: {0}")]
    Store(#[from] database::DbError),
}
