use thiserror::Error;

/// Rejections for submitted orders.
///
/// A rejected command assigns no id, emits no trades and leaves the book
/// untouched. A cancel targeting an unknown id is not an error; it is
/// reported through `cancel_order`'s boolean result.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderError {
    #[error("order quantity must be greater than zero")]
    InvalidQuantity,
    #[error("limit order price must be greater than zero")]
    InvalidPrice,
}
