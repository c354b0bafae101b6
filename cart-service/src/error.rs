use inventory_service::InventoryError;

pub type CartResult<T> = Result<T, CartError>;

#[derive(Debug, thiserror::Error)]
pub enum CartError {
    #[error("item '{0}' not found on the menu")]
    NotFound(String),

    #[error("'{name}' is currently unavailable")]
    Unavailable { name: String },

    #[error("quantity must be between 1 and 50")]
    InvalidQuantity,

    #[error("cart is empty")]
    EmptyCart,

    /// Reservation rejected; carries the live count and up to two
    /// alternative item names so the caller can compose a suggestion.
    #[error("'{name}' is out of stock: {available} available")]
    OutOfStock {
        name: String,
        available: u32,
        alternatives: Vec<String>,
    },

    #[error("cart store error: {0}")]
    Store(String),
}

impl CartError {
    /// Inventory failures that are not out-of-stock collapse into store
    /// errors; unknown items read as "not found" to the user.
    pub fn from_inventory(err: InventoryError, item_key: &str) -> Self {
        match err {
            InventoryError::UnknownItem(_) => CartError::NotFound(item_key.to_string()),
            InventoryError::OutOfStock { available, .. } => CartError::OutOfStock {
                name: item_key.to_string(),
                available,
                alternatives: Vec::new(),
            },
            InventoryError::Store(message) => CartError::Store(message),
        }
    }
}
