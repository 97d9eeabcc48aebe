//! Infrastructure-proximity impact.
//!
//! Each project contributes its impact weight, scaled by category and
//! delivery status, divided by distance and decayed linearly over the
//! completion horizon. Projects at or beyond the decay horizon contribute
//! nothing.

use super::ScoringConfig;
use crate::types::{InfrastructureProject, ProjectStatus};

/// Linear decay over the completion horizon.
pub fn horizon_decay(horizon_months: u32, decay_horizon_months: u32) -> f64 {
    if horizon_months == 0 {
        return 1.0;
    }
    if horizon_months >= decay_horizon_months {
        return 0.0;
    }
    1.0 - horizon_months as f64 / decay_horizon_months as f64
}

/// Impact of a single project on its area.
pub fn project_impact(project: &InfrastructureProject, config: &ScoringConfig) -> f64 {
    let decay = horizon_decay(project.completion_horizon_months, config.decay_horizon_months);
    if decay == 0.0 {
        return 0.0;
    }

    let category = config.category_multipliers.for_category(project.category);
    let status = match project.status {
        Some(ProjectStatus::Announced) => config.status_multipliers.announced,
        Some(ProjectStatus::InProgress) => config.status_multipliers.in_progress,
        Some(ProjectStatus::Completed) => config.status_multipliers.completed,
        None => 1.0,
    };
    let proximity = 1.0 / (1.0 + project.distance_km / config.distance_scale_km);

    project.impact_weight * category * status * proximity * decay
}

/// Summed impact of every project near an area.
pub fn infrastructure_impact(projects: &[InfrastructureProject], config: &ScoringConfig) -> f64 {
    projects.iter().map(|p| project_impact(p, config)).sum()
}

/// Normalize impacts by the snapshot maximum; all zeros stay zero.
pub fn normalize_by_max(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(0.0_f64, f64::max);
    values
        .iter()
        .map(|v| if max > 0.0 { v / max } else { 0.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProjectCategory;

    fn project(distance_km: f64, horizon: u32) -> InfrastructureProject {
        InfrastructureProject {
            area_id: "a".to_string(),
            name: "Metro".to_string(),
            category: ProjectCategory::Civic,
            status: None,
            distance_km,
            completion_horizon_months: horizon,
            impact_weight: 1.0,
        }
    }

    #[test]
    fn test_decay() {
        assert_eq!(horizon_decay(0, 60), 1.0);
        assert_eq!(horizon_decay(30, 60), 0.5);
        assert_eq!(horizon_decay(60, 60), 0.0);
        assert_eq!(horizon_decay(90, 60), 0.0);
    }

    #[test]
    fn test_beyond_horizon_contributes_zero() {
        let config = ScoringConfig::default();
        let far_future = project(0.5, config.decay_horizon_months + 1);
        assert_eq!(project_impact(&far_future, &config), 0.0);
    }

    #[test]
    fn test_closer_projects_weigh_more() {
        let config = ScoringConfig::default();
        let near = project_impact(&project(0.5, 12), &config);
        let far = project_impact(&project(5.0, 12), &config);
        assert!(near > far);
    }

    #[test]
    fn test_status_and_category_multipliers() {
        let config = ScoringConfig::default();
        let mut transit = project(1.0, 0);
        transit.category = ProjectCategory::Transit;
        let civic = project(1.0, 0);
        assert!(project_impact(&transit, &config) > project_impact(&civic, &config));

        let mut announced = project(1.0, 0);
        announced.status = Some(ProjectStatus::Announced);
        assert!(project_impact(&announced, &config) < project_impact(&civic, &config));
    }

    #[test]
    fn test_normalize_by_max() {
        assert_eq!(normalize_by_max(&[0.0, 2.0, 1.0]), vec![0.0, 1.0, 0.5]);
        assert_eq!(normalize_by_max(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
