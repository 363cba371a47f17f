pub mod enums;
pub mod error;
pub mod settings_keys;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{
    MarginType, OrderPurpose, OrderSide, OrderStatus, OrderType, PositionStatus, SignalStatus,
};
pub use error::CoreError;
pub use structs::{
    mask_secret, Account, AccountDraft, ChatMessage, Order, OrderRequest, Position, Signal,
};
