// Material coverage inputs and results

use serde::{Deserialize, Serialize};

use super::status::Priority;

/// Quantity of one material a job needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialRequirement {
    pub material_id: String,
    pub required_quantity: f64,
    #[serde(default)]
    pub priority: Priority,
}

impl MaterialRequirement {
    pub fn new<S: Into<String>>(material_id: S, required_quantity: f64) -> Self {
        MaterialRequirement {
            material_id: material_id.into(),
            required_quantity,
            priority: Priority::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Stock on hand for one material. Read-only input, the ledger lives elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialAvailability {
    pub material_id: String,
    pub available_stock: f64,
}

impl MaterialAvailability {
    pub fn new<S: Into<String>>(material_id: S, available_stock: f64) -> Self {
        MaterialAvailability {
            material_id: material_id.into(),
            available_stock,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    FullyAllocated,
    PartiallyAllocated,
    Insufficient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoverageStatus {
    FullyAvailable,
    PartiallyAvailable,
    Insufficient,
}

/// Allocation outcome for a single requirement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialAllocation {
    pub material_id: String,
    pub required: f64,
    /// Stock that was still free for this requirement when it was allocated
    pub available: f64,
    pub allocated: f64,
    pub shortage: f64,
    pub status: AllocationStatus,
}

/// Computed coverage for a job. Not persisted by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialCoverageResult {
    pub overall_status: CoverageStatus,
    /// 0..=100
    pub coverage_percentage: u8,
    pub can_proceed: bool,
    pub threshold: u8,
    pub total_required: f64,
    pub total_allocated: f64,
    pub per_material: Vec<MaterialAllocation>,
    pub recommendation: String,
}

impl MaterialCoverageResult {
    /// Materials that are not fully covered
    pub fn shortages(&self) -> impl Iterator<Item = &MaterialAllocation> {
        self.per_material.iter().filter(|m| m.shortage > 0.0)
    }
}
