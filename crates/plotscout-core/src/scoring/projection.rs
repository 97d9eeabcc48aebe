//! Forward ROI projection and risk estimate.

use crate::types::RoiProjection;

/// Project appreciation from trailing growth and normalized infrastructure.
///
/// Historical growth carries most of the weight; infrastructure adds up to
/// ten points of annual growth.
pub fn project_roi(growth_rate: f64, infrastructure_normalized: f64) -> RoiProjection {
    let annual = growth_rate * 0.7 + infrastructure_normalized * 0.1;
    let roi = |years: i32| ((1.0 + annual).powi(years) - 1.0) * 100.0;

    RoiProjection {
        projected_annual_growth: annual,
        roi_3y_percent: roi(3),
        roi_5y_percent: roi(5),
        roi_10y_percent: roi(10),
    }
}

/// Risk on a 1 (low) to 10 (high) scale.
///
/// Expensive areas with weak growth are riskier than cheap areas with
/// strong growth.
pub fn risk_score(latest_price: Option<f64>, growth_rate: f64) -> f64 {
    let Some(price) = latest_price else {
        return 5.0;
    };
    let denominator = growth_rate * 10.0 + 0.5;
    if denominator <= 0.0 {
        return 10.0;
    }
    let raw = (price / 10_000.0) / denominator;
    (raw * 5.0).clamp(1.0, 10.0)
}
