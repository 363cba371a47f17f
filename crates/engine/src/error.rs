use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// No active account is flagged default; the signal is dropped.
    #[error("No default account is configured")]
    NoDefaultAccount,

    #[error("Store error: {0}")]
    Store(#[from] database::DbError),

    #[error("Exchange error: {0}")]
    Api(#[from] api_client::ApiError),

    #[error("Signal configuration error: {0}")]
    Signal(#[from] signals::SignalError),

    #[error("Execution failed: {0}")]
    Execution(#[from] executor::ExecutorError),
}
