//! Percentile of historical ROI within each city cohort.

use std::collections::BTreeMap;

/// Mid-rank percentile of each value among its cohort.
///
/// `entries` pairs a cohort key (the city) with a value. The result is
/// aligned with the input: `(below + 0.5 * (equal - 1)) / (n - 1)`, so the
/// lowest value maps to 0, the highest to 1 and ties share a rank. A cohort
/// of one maps to 0.5.
pub fn cohort_percentiles(entries: &[(&str, f64)]) -> Vec<f64> {
    let mut cohorts: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for (city, value) in entries {
        cohorts.entry(city).or_default().push(*value);
    }

    entries
        .iter()
        .map(|(city, value)| {
            let members = &cohorts[city];
            let n = members.len();
            if n < 2 {
                return 0.5;
            }
            let below = members.iter().filter(|v| **v < *value).count() as f64;
            let equal = members.iter().filter(|v| **v == *value).count() as f64;
            (below + 0.5 * (equal - 1.0)) / (n - 1) as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles_per_city() {
        let entries = [
            ("Pune", 0.10),
            ("Pune", 0.30),
            ("Pune", 0.20),
            ("Mumbai", 0.50),
        ];
        let result = cohort_percentiles(&entries);
        assert_eq!(result, vec![0.0, 1.0, 0.5, 0.5]);
    }

    #[test]
    fn test_ties_share_rank() {
        let entries = [("Pune", 0.1), ("Pune", 0.1), ("Pune", 0.3)];
        let result = cohort_percentiles(&entries);
        assert_eq!(result[0], result[1]);
        assert_eq!(result[0], 0.25);
        assert_eq!(result[2], 1.0);
    }
}
