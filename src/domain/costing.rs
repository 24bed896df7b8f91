//! Approximate construction cost from element counts.
//!
//! Counts carry no geometry, so each category assumes a typical quantity per
//! element (10 m² per wall, 50 m² per slab, 5 m per beam, 100 m² per roof).

use serde::{Deserialize, Serialize};

use super::building::ElementCounts;

pub const CURRENCY: &str = "INR";
pub const CONTINGENCY_RATE: f64 = 0.20;
const MATERIAL_ALLOWANCE: u64 = 50_000;

const WALL_AREA_SQM: u64 = 10;
const SLAB_AREA_SQM: u64 = 50;
const BEAM_LENGTH_M: u64 = 5;
const ROOF_AREA_SQM: u64 = 100;

const NOTE: &str = "This is an approximate costing. Actual cost depends on area, quality and location.";

/// Unit rates in INR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rates {
    pub wall_per_sqm: u64,
    pub door_per_unit: u64,
    pub window_per_unit: u64,
    pub slab_per_sqm: u64,
    pub column_per_unit: u64,
    pub beam_per_meter: u64,
    pub stair_per_unit: u64,
    pub roof_per_sqm: u64,
}

pub const STANDARD_RATES: Rates = Rates {
    wall_per_sqm: 1_500,
    door_per_unit: 8_000,
    window_per_unit: 5_000,
    slab_per_sqm: 2_000,
    column_per_unit: 15_000,
    beam_per_meter: 3_000,
    stair_per_unit: 50_000,
    roof_per_sqm: 1_800,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub walls: u64,
    pub doors: u64,
    pub windows: u64,
    pub slabs: u64,
    pub columns: u64,
    pub beams: u64,
    pub stairs: u64,
    pub roofs: u64,
    pub materials: u64,
}

impl CostBreakdown {
    pub fn sum(&self) -> u64 {
        self.walls
            + self.doors
            + self.windows
            + self.slabs
            + self.columns
            + self.beams
            + self.stairs
            + self.roofs
            + self.materials
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub breakdown: CostBreakdown,
    pub subtotal: u64,
    pub contingency: f64,
    pub total_cost: f64,
    pub currency: String,
    pub note: String,
    pub rates_used: Rates,
}

pub fn estimate(counts: &ElementCounts, material_count: usize) -> CostEstimate {
    estimate_with(&STANDARD_RATES, counts, material_count)
}

pub fn estimate_with(rates: &Rates, counts: &ElementCounts, material_count: usize) -> CostEstimate {
    let breakdown = CostBreakdown {
        walls: counts.walls * rates.wall_per_sqm * WALL_AREA_SQM,
        doors: counts.doors * rates.door_per_unit,
        windows: counts.windows * rates.window_per_unit,
        slabs: counts.slabs * rates.slab_per_sqm * SLAB_AREA_SQM,
        columns: counts.columns * rates.column_per_unit,
        beams: counts.beams * rates.beam_per_meter * BEAM_LENGTH_M,
        stairs: counts.stairs * rates.stair_per_unit,
        roofs: counts.roofs * rates.roof_per_sqm * ROOF_AREA_SQM,
        materials: material_count as u64 * MATERIAL_ALLOWANCE,
    };

    let subtotal = breakdown.sum();
    let contingency = subtotal as f64 * CONTINGENCY_RATE;

    CostEstimate {
        breakdown,
        subtotal,
        contingency,
        total_cost: subtotal as f64 + contingency,
        currency: CURRENCY.to_string(),
        note: NOTE.to_string(),
        rates_used: *rates,
    }
}

#[cfg(test)]
mod tests {
    use super::super::building::ElementKind;
    use super::*;

    #[test]
    fn every_category_uses_its_rate() {
        let counts = ElementCounts::default()
            .with(ElementKind::Wall, 1)
            .with(ElementKind::Door, 1)
            .with(ElementKind::Window, 1)
            .with(ElementKind::Slab, 1)
            .with(ElementKind::Column, 1)
            .with(ElementKind::Beam, 1)
            .with(ElementKind::Stair, 1)
            .with(ElementKind::Roof, 1);
        let estimate = estimate(&counts, 2);

        assert_eq!(estimate.breakdown.walls, 15_000);
        assert_eq!(estimate.breakdown.slabs, 100_000);
        assert_eq!(estimate.breakdown.beams, 15_000);
        assert_eq!(estimate.breakdown.roofs, 180_000);
        assert_eq!(estimate.breakdown.materials, 100_000);
        assert_eq!(estimate.subtotal, 488_000);
        assert_eq!(estimate.contingency, 97_600.0);
        assert_eq!(estimate.total_cost, 585_600.0);
        assert_eq!(estimate.currency, "INR");
    }

    #[test]
    fn empty_model_costs_nothing() {
        let estimate = estimate(&ElementCounts::default(), 0);
        assert_eq!(estimate.subtotal, 0);
        assert_eq!(estimate.total_cost, 0.0);
    }
}
