//! Domain model for emission measurements

use serde::{Deserialize, Serialize};

/// Computed emission figures for a single inventory item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmissionsBreakdown {
    /// Total emissions in grams
    pub total_grams: f64,
    /// How much of the inventory the figure covers (e.g. "full", "partial")
    pub coverage: String,
    /// Whether the item meets the climate-risk compliance bar
    pub climate_risk_compliant: bool,
}

/// An inventory item with its client-supplied priority and, once computed,
/// its emissions breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub inventory_id: String,
    pub priority: u32,
    pub emissions_breakdown: EmissionsBreakdown,
}

impl Row {
    /// Input-only skeleton: carries the identifier and priority downstream
    /// before any breakdown has been computed.
    pub fn pending(inventory_id: impl Into<String>, priority: u32) -> Self {
        Self {
            inventory_id: inventory_id.into(),
            priority,
            emissions_breakdown: EmissionsBreakdown::default(),
        }
    }
}
