pub type InventoryResult<T> = Result<T, InventoryError>;

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    /// The item has never been synced into the inventory store.
    #[error("item '{0}' not tracked in inventory")]
    UnknownItem(String),

    /// Reservation rejected; `available` is the stock left at decision time.
    #[error("insufficient stock for '{item_id}': {available} available")]
    OutOfStock { item_id: String, available: u32 },

    #[error("inventory store error: {0}")]
    Store(String),
}

impl InventoryError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        InventoryError::Store(err.to_string())
    }
}
