//! Maintenance advisories derived from component health.
//!
//! The advisor is a pure function of the bike tree, the current time and the
//! thresholds in [`AdvisorConfig`]. Its output always replaces the previous
//! advisory list wholesale.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AdvisorConfig;
use crate::model::{Bike, BikeId, Component};

/// A component that needs attention.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceAdvisory {
    /// Bike carrying the component.
    pub bike_id: BikeId,
    /// Name of that bike for display.
    pub bike_name: String,
    /// Position of the component on the bike.
    pub component_index: usize,
    /// Component type.
    #[serde(rename = "type")]
    pub component_type: String,
    /// Component brand.
    pub brand: String,
    /// Mileage at evaluation time.
    pub current_mileage: f64,
    /// Lifespan of the component.
    pub max_lifespan: f64,
    /// Rounded remaining health; negative when overdue.
    pub health_percentage: i64,
}

/// Evaluates components against the advisory rules.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceAdvisor {
    config: AdvisorConfig,
}

impl MaintenanceAdvisor {
    /// Create an advisor with the given thresholds.
    #[must_use]
    pub fn new(config: AdvisorConfig) -> Self {
        Self { config }
    }

    /// Build the full advisory list, in bike order then component index.
    #[must_use]
    pub fn evaluate(&self, bikes: &[Bike], now: DateTime<Utc>) -> Vec<MaintenanceAdvisory> {
        bikes
            .iter()
            .flat_map(|bike| {
                bike.components
                    .iter()
                    .enumerate()
                    .filter(move |(_, component)| self.needs_maintenance(component, now))
                    .map(move |(index, component)| MaintenanceAdvisory {
                        bike_id: bike.id.clone(),
                        bike_name: bike.display_name(),
                        component_index: index,
                        component_type: component.kind.clone(),
                        brand: component.brand.clone(),
                        current_mileage: component.health.mileage,
                        max_lifespan: component.health.lifespan,
                        health_percentage: component.health.percentage(),
                    })
            })
            .collect()
    }

    /// Whether a single component should be advised.
    #[must_use]
    pub fn needs_maintenance(&self, component: &Component, now: DateTime<Utc>) -> bool {
        component.in_use
            && component.health.percentage() < self.config.health_threshold_percent
            && !self.recently_maintained(component, now)
    }

    /// Whether the latest maintenance record suppresses advice right now.
    ///
    /// It must be younger than the recent window and have restored at least
    /// the configured minimum.
    #[must_use]
    pub fn recently_maintained(&self, component: &Component, now: DateTime<Utc>) -> bool {
        component.latest_maintenance().is_some_and(|record| {
            now.signed_duration_since(record.date) < self.config.recent_window()
                && record.health_restored >= self.config.min_restored_percent
        })
    }
}
