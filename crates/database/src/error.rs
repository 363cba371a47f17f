use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to talk to the database: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("The requested data was not found in the database.")]
    NotFound,

    #[error("Account {0} still has open positions and cannot be deleted.")]
    AccountInUse(i64),

    #[error("Invalid account data: {0}")]
    InvalidAccount(String),

    #[error("Stored value could not be decoded: {0}")]
    Corrupt(String),
}
