//! Menu & category cache: a hot in-memory snapshot of the menu with
//! category and meal-period indices, multi-stage name resolution, and
//! similarity-based alternatives.

pub mod cache;
pub mod model;
pub mod source;

pub use cache::{MenuCache, MenuCacheStats};
pub use model::{MealPeriod, MenuCategory, MenuItem};
pub use source::{MenuError, MenuResult, MenuSource, SimilarityIndex, StaticMenuSource};
