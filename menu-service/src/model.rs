use chrono::{DateTime, Timelike, Utc};
use common_money::Money;
use serde::{Deserialize, Serialize};

/// Service windows derived from local time. Items with no explicit periods,
/// or tagged `AllDay`, pass every period filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealPeriod {
    Breakfast,
    Lunch,
    Dinner,
    AllDay,
}

impl MealPeriod {
    /// 05:00–11:00 breakfast, 11:00–16:00 lunch, 16:00–22:00 dinner,
    /// otherwise all-day.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=10 => MealPeriod::Breakfast,
            11..=15 => MealPeriod::Lunch,
            16..=21 => MealPeriod::Dinner,
            _ => MealPeriod::AllDay,
        }
    }

    pub fn current(now_local: DateTime<chrono::Local>) -> Self {
        Self::from_hour(now_local.hour())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MealPeriod::Breakfast => "breakfast",
            MealPeriod::Lunch => "lunch",
            MealPeriod::Dinner => "dinner",
            MealPeriod::AllDay => "all_day",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    pub price: Money,
    pub category_id: Option<String>,
    pub category_name: String,
    pub description: String,
    pub is_available: bool,
    pub is_popular: bool,
    pub spice_level: Option<String>,
    pub calories: Option<u32>,
    pub prep_minutes: Option<u32>,
    /// Empty means no restriction.
    pub availability_periods: Vec<MealPeriod>,
    pub cached_at: DateTime<Utc>,
}

impl MenuItem {
    pub fn available_during(&self, period: MealPeriod) -> bool {
        self.availability_periods.is_empty()
            || self.availability_periods.contains(&MealPeriod::AllDay)
            || self.availability_periods.contains(&period)
    }

    /// Items must carry a positive price to appear in any search or find
    /// path.
    pub fn is_sellable(&self) -> bool {
        self.is_available && self.price.is_positive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuCategory {
    pub id: String,
    pub name: String,
    pub description: String,
    pub display_order: i32,
}
