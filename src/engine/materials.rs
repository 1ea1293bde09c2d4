// Material coverage analysis for the acceptance step

//! # Material Coverage
//!
//! Before a job leaves acceptance, the caller checks whether stock covers what the job needs.
//! The analyzer is pure: it reads requirements and availability snapshots and computes
//! per-material allocations, an overall coverage percentage and a go/no-go decision. It never
//! reserves stock; the inventory ledger is someone else's.
//!
//! ```text
//! coverage = round(100 * sum(allocated) / sum(required))     (100 when nothing is required)
//! can_proceed = coverage >= threshold
//! ```

use std::collections::HashMap;

use crate::models::{
    AllocationStatus, CoverageStatus, MaterialAllocation, MaterialAvailability,
    MaterialCoverageResult, MaterialRequirement,
};
use crate::{JobCardError, Result};

/// Threshold used when none is configured: every unit must be covered
pub const DEFAULT_COVERAGE_THRESHOLD: u8 = 100;

#[derive(Debug, Clone, Copy)]
pub struct MaterialCoverageAnalyzer {
    threshold: u8,
}

impl MaterialCoverageAnalyzer {
    /// `threshold` is a percentage; values above 100 are clamped
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold: threshold.min(100),
        }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn analyze(
        &self,
        requirements: &[MaterialRequirement],
        availability: &[MaterialAvailability],
    ) -> Result<MaterialCoverageResult> {
        for requirement in requirements {
            check_quantity(&requirement.material_id, "required quantity", requirement.required_quantity)?;
        }

        let mut stock: HashMap<&str, f64> = HashMap::new();
        for row in availability {
            check_quantity(&row.material_id, "available stock", row.available_stock)?;
            *stock.entry(row.material_id.as_str()).or_insert(0.0) += row.available_stock;
        }

        // Urgent work draws from shared stock first; stable sort keeps input order within a priority
        let mut order: Vec<usize> = (0..requirements.len()).collect();
        order.sort_by(|a, b| requirements[*b].priority.cmp(&requirements[*a].priority));

        let mut allocations: Vec<Option<MaterialAllocation>> = vec![None; requirements.len()];
        for index in order {
            let requirement = &requirements[index];
            let remaining = stock.entry(requirement.material_id.as_str()).or_insert(0.0);

            let available = *remaining;
            let allocated = requirement.required_quantity.min(available);
            *remaining -= allocated;

            allocations[index] = Some(allocate(requirement, available, allocated));
        }
        let per_material: Vec<MaterialAllocation> = allocations.into_iter().flatten().collect();

        let total_required: f64 = per_material.iter().map(|m| m.required).sum();
        let total_allocated: f64 = per_material.iter().map(|m| m.allocated).sum();

        let coverage_percentage = if total_required > 0.0 {
            (100.0 * total_allocated / total_required).round().clamp(0.0, 100.0) as u8
        } else {
            100
        };

        // Overall status follows the rounded percentage, not the raw totals
        let overall_status = match coverage_percentage {
            100 => CoverageStatus::FullyAvailable,
            0 => CoverageStatus::Insufficient,
            _ => CoverageStatus::PartiallyAvailable,
        };

        let can_proceed = coverage_percentage >= self.threshold;
        let recommendation = recommend(overall_status, coverage_percentage, can_proceed, &per_material);

        Ok(MaterialCoverageResult {
            overall_status,
            coverage_percentage,
            can_proceed,
            threshold: self.threshold,
            total_required,
            total_allocated,
            per_material,
            recommendation,
        })
    }
}

impl Default for MaterialCoverageAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_COVERAGE_THRESHOLD)
    }
}

fn check_quantity(material_id: &str, what: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(JobCardError::Validation(format!(
            "{} for material {} must be a non-negative number, got {}",
            what, material_id, value
        )));
    }
    Ok(())
}

fn allocate(requirement: &MaterialRequirement, available: f64, allocated: f64) -> MaterialAllocation {
    let required = requirement.required_quantity;
    let shortage = (required - allocated).max(0.0);

    let status = if shortage <= 0.0 {
        AllocationStatus::FullyAllocated
    } else if allocated > 0.0 {
        AllocationStatus::PartiallyAllocated
    } else {
        AllocationStatus::Insufficient
    };

    MaterialAllocation {
        material_id: requirement.material_id.clone(),
        required,
        available,
        allocated,
        shortage,
        status,
    }
}

fn recommend(
    status: CoverageStatus,
    coverage: u8,
    can_proceed: bool,
    per_material: &[MaterialAllocation],
) -> String {
    let short: Vec<&str> = per_material
        .iter()
        .filter(|m| m.shortage > 0.0)
        .map(|m| m.material_id.as_str())
        .collect();

    match (status, can_proceed) {
        (CoverageStatus::FullyAvailable, _) if short.is_empty() => {
            "All materials available; job can proceed to production planning".to_string()
        }
        (CoverageStatus::FullyAvailable, _) => format!(
            "Coverage rounds to 100%; job can proceed, but {} still short",
            short.join(", ")
        ),
        (_, true) => format!(
            "Coverage {}% meets the threshold; proceed and procure shortages for {}",
            coverage,
            short.join(", ")
        ),
        (CoverageStatus::PartiallyAvailable, false) => format!(
            "Coverage {}% is below the threshold; procure {} before proceeding",
            coverage,
            short.join(", ")
        ),
        (CoverageStatus::Insufficient, false) => format!(
            "No required material is in stock; procure {} before proceeding",
            short.join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;

    #[test]
    fn partial_coverage_rounds_to_nearest_percent() {
        let requirements = vec![
            MaterialRequirement::new("A", 1000.0),
            MaterialRequirement::new("B", 500.0),
        ];
        let availability = vec![
            MaterialAvailability::new("A", 600.0),
            MaterialAvailability::new("B", 500.0),
        ];

        let result = MaterialCoverageAnalyzer::default()
            .analyze(&requirements, &availability)
            .unwrap();

        // 1100 / 1500 = 73.3%
        assert_eq!(result.coverage_percentage, 73);
        assert_eq!(result.overall_status, CoverageStatus::PartiallyAvailable);
        assert!(!result.can_proceed);

        assert_eq!(result.per_material[0].allocated, 600.0);
        assert_eq!(result.per_material[0].shortage, 400.0);
        assert_eq!(result.per_material[0].status, AllocationStatus::PartiallyAllocated);
        assert_eq!(result.per_material[1].status, AllocationStatus::FullyAllocated);

        let short: Vec<&str> = result.shortages().map(|m| m.material_id.as_str()).collect();
        assert_eq!(short, vec!["A"]);
        assert!(result.recommendation.contains("procure A"));
    }

    #[test]
    fn no_requirements_means_full_coverage() {
        let result = MaterialCoverageAnalyzer::default().analyze(&[], &[]).unwrap();

        assert_eq!(result.coverage_percentage, 100);
        assert_eq!(result.overall_status, CoverageStatus::FullyAvailable);
        assert!(result.can_proceed);
        assert!(result.recommendation.starts_with("All materials available"));
    }

    #[test]
    fn threshold_decides_can_proceed() {
        let requirements = vec![MaterialRequirement::new("PAPER", 100.0)];
        let availability = vec![MaterialAvailability::new("PAPER", 80.0)];

        let strict = MaterialCoverageAnalyzer::new(100)
            .analyze(&requirements, &availability)
            .unwrap();
        let lenient = MaterialCoverageAnalyzer::new(80)
            .analyze(&requirements, &availability)
            .unwrap();

        assert!(!strict.can_proceed);
        assert!(lenient.can_proceed);
        assert_eq!(lenient.coverage_percentage, 80);
        assert_eq!(MaterialCoverageAnalyzer::new(150).threshold(), 100);
    }

    #[test]
    fn overall_status_uses_rounded_coverage() {
        let requirements = vec![MaterialRequirement::new("FOIL", 1000.0)];
        let availability = vec![MaterialAvailability::new("FOIL", 999.6)];

        let result = MaterialCoverageAnalyzer::default()
            .analyze(&requirements, &availability)
            .unwrap();

        assert_eq!(result.coverage_percentage, 100);
        assert_eq!(result.overall_status, CoverageStatus::FullyAvailable);
        assert!(result.can_proceed);
        // the material itself is still short
        assert_eq!(result.per_material[0].status, AllocationStatus::PartiallyAllocated);
        assert_eq!(result.shortages().count(), 1);
        assert!(result.recommendation.contains("FOIL still short"));
    }

    #[test]
    fn nothing_in_stock_is_insufficient() {
        let requirements = vec![MaterialRequirement::new("INK", 5.0)];

        let result = MaterialCoverageAnalyzer::default()
            .analyze(&requirements, &[])
            .unwrap();

        assert_eq!(result.coverage_percentage, 0);
        assert_eq!(result.overall_status, CoverageStatus::Insufficient);
        assert_eq!(result.per_material[0].status, AllocationStatus::Insufficient);
    }

    #[test]
    fn shared_stock_goes_to_urgent_work_first() {
        let requirements = vec![
            MaterialRequirement::new("BOARD", 60.0),
            MaterialRequirement::new("BOARD", 60.0).with_priority(Priority::Urgent),
        ];
        // two rows for the same material are summed
        let availability = vec![
            MaterialAvailability::new("BOARD", 50.0),
            MaterialAvailability::new("BOARD", 30.0),
        ];

        let result = MaterialCoverageAnalyzer::default()
            .analyze(&requirements, &availability)
            .unwrap();

        // output keeps input order
        assert_eq!(result.per_material[1].allocated, 60.0);
        assert_eq!(result.per_material[1].status, AllocationStatus::FullyAllocated);
        assert_eq!(result.per_material[0].allocated, 20.0);
        assert_eq!(result.per_material[0].available, 20.0);
        assert_eq!(result.total_allocated, 80.0);
        assert_eq!(result.coverage_percentage, 67);
    }

    #[test]
    fn negative_or_nan_quantities_are_rejected() {
        let analyzer = MaterialCoverageAnalyzer::default();

        let negative = analyzer.analyze(&[MaterialRequirement::new("A", -1.0)], &[]);
        assert!(matches!(negative, Err(JobCardError::Validation(_))));

        let nan = analyzer.analyze(
            &[MaterialRequirement::new("A", 1.0)],
            &[MaterialAvailability::new("A", f64::NAN)],
        );
        assert!(matches!(nan, Err(JobCardError::Validation(_))));
    }
}
