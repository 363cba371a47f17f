use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Failed to cancel order {order_id} on {symbol}: {source}")]
    CancelFailed {
        symbol: String,
        order_id: i64,
        source: api_client::ApiError,
    },

    #[error("Failed to force-close {symbol}: {source}")]
    CloseFailed {
        symbol: String,
        source: api_client::ApiError,
    },

    #[error("No gateway client registered for account {0}")]
    MissingClient(i64),

    #[error("Store error: {0}")]
    Store(#[from] database::DbError),
}
