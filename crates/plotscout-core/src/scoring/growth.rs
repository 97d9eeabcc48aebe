//! Price-history features: trailing growth and historical ROI.

use chrono::Months;

use crate::types::PricePoint;

const DAYS_PER_YEAR: f64 = 365.25;

/// Annualized compound growth over the trailing window ending at the most
/// recent observation.
///
/// `points` must be sorted by date. Spans shorter than a year are not
/// extrapolated: the observed change is taken as the annual rate. Returns
/// `None` when fewer than two observations fall in the window, they share a
/// single date, or the rate is not finite.
pub fn trailing_growth(points: &[&PricePoint], window_months: u32) -> Option<f64> {
    let latest = points.last()?;
    let window_start = latest
        .observed_on
        .checked_sub_months(Months::new(window_months))
        .unwrap_or(chrono::NaiveDate::MIN);

    let first = points.iter().find(|p| p.observed_on >= window_start)?;
    let days = (latest.observed_on - first.observed_on).num_days();
    if days <= 0 || first.price_per_sqft <= 0.0 {
        return None;
    }

    let ratio = latest.price_per_sqft / first.price_per_sqft;
    let years = (days as f64 / DAYS_PER_YEAR).max(1.0);
    let rate = ratio.powf(1.0 / years) - 1.0;
    rate.is_finite().then_some(rate)
}

/// Total appreciation across the full history: `last / first - 1`.
pub fn historical_roi(points: &[&PricePoint]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let first = points.first()?;
    let last = points.last()?;
    if first.price_per_sqft <= 0.0 {
        return None;
    }
    let roi = last.price_per_sqft / first.price_per_sqft - 1.0;
    roi.is_finite().then_some(roi)
}

/// Min-max normalization across a set of raw values.
///
/// A degenerate range maps every value to the midpoint.
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    values
        .iter()
        .map(|v| {
            if range.abs() < f64::EPSILON {
                0.5
            } else {
                (v - min) / range
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn point(y: i32, m: u32, price: f64) -> PricePoint {
        PricePoint {
            area_id: "a".to_string(),
            observed_on: NaiveDate::from_ymd_opt(y, m, 1).unwrap(),
            price_per_sqft: price,
            source: "test".to_string(),
        }
    }

    #[test]
    fn test_one_year_growth() {
        let points = [point(2023, 1, 100.0), point(2024, 1, 110.0)];
        let refs: Vec<&PricePoint> = points.iter().collect();
        let growth = trailing_growth(&refs, 60).unwrap();
        assert!((growth - 0.10).abs() < 0.001);
    }

    #[test]
    fn test_window_excludes_old_points() {
        // The 2015 point is outside a 24-month window ending in 2024.
        let points = [
            point(2015, 1, 10.0),
            point(2022, 1, 100.0),
            point(2024, 1, 121.0),
        ];
        let refs: Vec<&PricePoint> = points.iter().collect();
        let growth = trailing_growth(&refs, 24).unwrap();
        assert!((growth - 0.10).abs() < 0.001);
    }

    #[test]
    fn test_short_span_is_not_extrapolated() {
        let mut next_day = point(2024, 1, 10_000.0);
        next_day.observed_on = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let points = [point(2024, 1, 100.0), next_day];
        let refs: Vec<&PricePoint> = points.iter().collect();
        let growth = trailing_growth(&refs, 60).unwrap();
        assert!((growth - 99.0).abs() < 1e-9);

        let overflow = [point(2023, 1, 1e-300), point(2024, 1, 1e300)];
        let refs: Vec<&PricePoint> = overflow.iter().collect();
        assert!(trailing_growth(&refs, 60).is_none());
        assert!(historical_roi(&refs).is_none());
    }

    #[test]
    fn test_single_point_has_no_growth() {
        let points = [point(2024, 1, 100.0)];
        let refs: Vec<&PricePoint> = points.iter().collect();
        assert!(trailing_growth(&refs, 60).is_none());
        assert!(historical_roi(&refs).is_none());
    }

    #[test]
    fn test_historical_roi() {
        let points = [point(2020, 1, 100.0), point(2022, 1, 90.0), point(2024, 1, 150.0)];
        let refs: Vec<&PricePoint> = points.iter().collect();
        assert!((historical_roi(&refs).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_min_max_normalize() {
        assert_eq!(min_max_normalize(&[2.0, 4.0, 3.0]), vec![0.0, 1.0, 0.5]);
        assert_eq!(min_max_normalize(&[7.0, 7.0]), vec![0.5, 0.5]);
        assert!(min_max_normalize(&[]).is_empty());
    }
}
