//! Library of common component types and their expected lifespans.

use crate::model::{BikeDraft, Component};

/// A known kind of bike component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentType {
    /// Stable identifier.
    pub id: &'static str,
    /// Display name, also used as the component's `type`.
    pub name: &'static str,
    /// Typical distance before replacement.
    pub default_lifespan: f64,
    /// Distance between routine checks.
    pub maintenance_interval: f64,
}

/// Lifespan returned for names not in the catalog.
pub const FALLBACK_LIFESPAN: f64 = 5000.0;

const fn kind(
    id: &'static str,
    name: &'static str,
    default_lifespan: f64,
    maintenance_interval: f64,
) -> ComponentType {
    ComponentType {
        id,
        name,
        default_lifespan,
        maintenance_interval,
    }
}

/// Every component type a generic bike is built from.
pub const COMPONENT_TYPES: &[ComponentType] = &[
    kind("chain", "Chain", 2500.0, 500.0),
    kind("tires", "Tires", 4500.0, 300.0),
    kind("brake-pads-rim", "Brake Pads (Rim)", 2000.0, 500.0),
    kind("brake-pads-disc", "Brake Pads (Disc)", 3500.0, 500.0),
    kind("cassette", "Cassette", 8000.0, 1000.0),
    kind("chainrings", "Chainrings", 15000.0, 2000.0),
    kind("cables-housing", "Cables & Housing", 4000.0, 1000.0),
    kind("bottom-bracket", "Bottom Bracket Bearings", 7500.0, 2000.0),
    kind("front-derailleur", "Front Derailleur", 10000.0, 1000.0),
    kind("rear-derailleur", "Rear Derailleur", 10000.0, 1000.0),
    kind("suspension-fork", "Suspension Fork", 10000.0, 1000.0),
    kind("hub-bearings", "Hub Bearings", 10000.0, 2000.0),
    kind("headset-bearings", "Headset Bearings", 10000.0, 2000.0),
];

/// Look up a type by id.
#[must_use]
pub fn by_id(id: &str) -> Option<&'static ComponentType> {
    COMPONENT_TYPES.iter().find(|t| t.id == id)
}

/// Look up a type by name, ignoring case.
#[must_use]
pub fn by_name(name: &str) -> Option<&'static ComponentType> {
    COMPONENT_TYPES
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(name))
}

/// Find the best catalog match for a free-text component type.
///
/// Exact (case-insensitive) name first, then either name containing the other.
#[must_use]
pub fn find_match(query: &str) -> Option<&'static ComponentType> {
    if let Some(exact) = by_name(query) {
        return Some(exact);
    }
    let query = query.to_lowercase();
    if query.is_empty() {
        return None;
    }
    COMPONENT_TYPES.iter().find(|t| {
        let name = t.name.to_lowercase();
        name.contains(&query) || query.contains(&name)
    })
}

/// Default lifespan for a component type name.
#[must_use]
pub fn default_lifespan_for(name: &str) -> f64 {
    by_name(name).map_or(FALLBACK_LIFESPAN, |t| t.default_lifespan)
}

/// A draft bike fitted with one fresh component of every catalog type.
#[must_use]
pub fn generic_bike(nickname: &str, brand: &str, model: &str) -> BikeDraft {
    let components = COMPONENT_TYPES
        .iter()
        .map(|t| Component {
            description: format!("Standard {}", t.name),
            ..Component::new(t.name, "", t.default_lifespan)
        })
        .collect();

    BikeDraft {
        nickname: if nickname.is_empty() {
            "Generic Bike".to_string()
        } else {
            nickname.to_string()
        },
        brand: brand.to_string(),
        model: if model.is_empty() {
            "Generic Bike".to_string()
        } else {
            model.to_string()
        },
        components,
        ..BikeDraft::default()
    }
}
