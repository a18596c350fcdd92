//! Record types of the lookup tables.
//!
//! Rows are validated into these types when they leave the store, so a missing
//! required column or relation fails the query instead of surfacing later.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: i64,
    pub name: String,
}

/// A contact, optionally linked to one [`Region`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub region_id: Option<i64>,
    /// Joined region, `None` when the contact has none.
    #[serde(default)]
    pub regions: Option<Region>,
}

/// A prison unit. The region relation is required.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrisonUnit {
    pub id: i64,
    pub name: String,
    pub region_id: i64,
    pub regions: Region,
}
