//! Bikes, their components and component maintenance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use super::lenient;

/// Lifespan used when a component carries none, or a non-positive one.
pub const DEFAULT_LIFESPAN: f64 = 1000.0;

fn positive_lifespan(lifespan: f64) -> f64 {
    if lifespan > 0.0 && lifespan.is_finite() {
        lifespan
    } else {
        DEFAULT_LIFESPAN
    }
}

/// Opaque bike identifier, generated when the bike is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BikeId(String);

impl BikeId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BikeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BikeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for BikeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A bike in the owner's garage.
///
/// Decoding never fails for an object: unreadable fields take their
/// defaults and unreadable components are skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct Bike {
    /// Identifier assigned at creation time.
    pub id: BikeId,
    /// User-chosen name.
    pub nickname: String,
    /// Manufacturer.
    pub brand: String,
    /// Model name.
    pub model: String,
    /// Installed components, in display order.
    pub components: Vec<Component>,
    /// Any further fields the UI attached to the bike.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The user-supplied part of a new bike; the id is generated on insertion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BikeDraft {
    /// User-chosen name.
    pub nickname: String,
    /// Manufacturer.
    pub brand: String,
    /// Model name.
    pub model: String,
    /// Initial components.
    pub components: Vec<Component>,
    /// Additional free-form fields.
    pub extra: Map<String, Value>,
}

impl Bike {
    /// Build a bike from a draft, generating its id.
    #[must_use]
    pub fn from_draft(mut draft: BikeDraft) -> Self {
        draft.components.iter_mut().for_each(Component::normalize);
        Self {
            id: BikeId::generate(),
            nickname: draft.nickname,
            brand: draft.brand,
            model: draft.model,
            components: draft.components,
            extra: draft.extra,
        }
    }

    /// Name shown to the user: nickname, else brand and model.
    #[must_use]
    pub fn display_name(&self) -> String {
        if !self.nickname.is_empty() {
            return self.nickname.clone();
        }
        let joined = format!("{} {}", self.brand, self.model);
        let joined = joined.trim();
        if joined.is_empty() {
            "Unnamed Bike".to_string()
        } else {
            joined.to_string()
        }
    }

    /// Set a top-level field by name.
    ///
    /// Known fields are type-checked: `nickname`, `brand` and `model` take
    /// strings. `id` and `components` cannot be set this way. Anything else
    /// lands in [`Bike::extra`]. Returns `false` when nothing was applied.
    pub fn set_field(&mut self, field: &str, value: Value) -> bool {
        let slot = match field {
            "id" | "components" => return false,
            "nickname" => &mut self.nickname,
            "brand" => &mut self.brand,
            "model" => &mut self.model,
            _ => {
                self.extra.insert(field.to_string(), value);
                return true;
            }
        };
        match value {
            Value::String(s) => {
                *slot = s;
                true
            }
            _ => false,
        }
    }
}

impl From<Map<String, Value>> for Bike {
    fn from(mut doc: Map<String, Value>) -> Self {
        let mut take = |key: &str| lenient::text(doc.remove(key).as_ref()).unwrap_or_default();
        let id = BikeId(take("id"));
        let nickname = take("nickname");
        let brand = take("brand");
        let model = take("model");
        let components = match doc.remove("components") {
            Some(Value::Array(items)) => items
                .into_iter()
                .enumerate()
                .filter_map(|(i, item)| match item {
                    Value::Object(map) => Some(Component::from(map)),
                    other => {
                        warn!("Bike {}: skipping component {} ({})", id, i, other);
                        None
                    }
                })
                .collect(),
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                warn!("Bike {}: malformed components ({})", id, other);
                Vec::new()
            }
        };
        Self {
            id,
            nickname,
            brand,
            model,
            components,
            extra: doc,
        }
    }
}

/// Wear state of a component, in the same distance unit as rides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Health {
    /// Distance accumulated since new or since restoration.
    pub mileage: f64,
    /// Expected distance before replacement.
    pub lifespan: f64,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            mileage: 0.0,
            lifespan: DEFAULT_LIFESPAN,
        }
    }
}

impl Health {
    /// Remaining life as a fraction of the lifespan.
    ///
    /// Not clamped: an overdue component yields a negative value.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        (self.lifespan - self.mileage) / self.lifespan
    }

    /// Remaining life in whole percent, rounded.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn percentage(&self) -> i64 {
        (self.fraction() * 100.0).round() as i64
    }
}

/// One maintenance event on a component.
///
/// Decoding accepts the date forms older clients wrote (date-only strings,
/// epoch milliseconds) and fails only when no date can be read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Value")]
pub struct MaintenanceRecord {
    /// When the maintenance was done.
    pub date: DateTime<Utc>,
    /// Percentage points of health restored, 0 to 100.
    pub health_restored: f64,
}

impl TryFrom<Value> for MaintenanceRecord {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        let date = lenient::timestamp(value.get("date"))
            .ok_or_else(|| format!("unreadable maintenance date {}", value["date"]))?;
        let health_restored = lenient::number(value.get("healthRestored"))
            .unwrap_or(0.0)
            .clamp(0.0, 100.0);
        Ok(Self {
            date,
            health_restored,
        })
    }
}

/// A part installed on a bike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "Map<String, Value>")]
pub struct Component {
    /// Component type, e.g. "Chain".
    #[serde(rename = "type")]
    pub kind: String,
    /// Manufacturer.
    pub brand: String,
    /// Free text.
    pub description: String,
    /// Whether the component is currently mounted and wearing.
    pub in_use: bool,
    /// Wear state.
    pub health: Health,
    /// Maintenance events, in insertion order.
    pub maintenance_history: Vec<MaintenanceRecord>,
}

impl Component {
    /// A new, unworn, in-use component.
    ///
    /// A lifespan that is not positive is replaced by [`DEFAULT_LIFESPAN`].
    #[must_use]
    pub fn new(kind: impl Into<String>, brand: impl Into<String>, lifespan: f64) -> Self {
        Self {
            kind: kind.into(),
            brand: brand.into(),
            description: String::new(),
            in_use: true,
            health: Health {
                mileage: 0.0,
                lifespan: positive_lifespan(lifespan),
            },
            maintenance_history: Vec::new(),
        }
    }

    /// Repair wear values that cannot be evaluated: a non-positive lifespan
    /// becomes [`DEFAULT_LIFESPAN`] and negative mileage becomes zero.
    pub fn normalize(&mut self) {
        self.health.lifespan = positive_lifespan(self.health.lifespan);
        self.health.mileage = self.health.mileage.max(0.0);
    }

    /// Append a maintenance record and restore health accordingly.
    ///
    /// Mileage drops by `health_restored / 100 * lifespan`, floored at zero.
    pub fn record_maintenance(&mut self, record: MaintenanceRecord) {
        if record.health_restored > 0.0 {
            let reduction = record.health_restored / 100.0 * self.health.lifespan;
            self.health.mileage = (self.health.mileage - reduction).max(0.0);
        }
        self.maintenance_history.push(record);
    }

    /// The most recent maintenance record by date.
    #[must_use]
    pub fn latest_maintenance(&self) -> Option<&MaintenanceRecord> {
        self.maintenance_history.iter().max_by_key(|r| r.date)
    }
}

/// Older documents used `name` instead of `type` and stored `inUse` as 0/1.
impl From<Map<String, Value>> for Component {
    fn from(doc: Map<String, Value>) -> Self {
        let named = |key: &str| lenient::text(doc.get(key)).filter(|s| !s.is_empty());
        let health = doc.get("health");
        let health_number = |key: &str| lenient::number(health.and_then(|h| h.get(key)));
        Self {
            kind: named("type")
                .or_else(|| named("name"))
                .unwrap_or_else(|| "Unknown".to_string()),
            brand: named("brand").unwrap_or_else(|| "Unknown".to_string()),
            description: lenient::text(doc.get("description")).unwrap_or_default(),
            in_use: lenient::flag(doc.get("inUse")).unwrap_or(true),
            health: Health {
                mileage: health_number("mileage").unwrap_or(0.0).max(0.0),
                lifespan: positive_lifespan(health_number("lifespan").unwrap_or(0.0)),
            },
            maintenance_history: lenient::list(doc.get("maintenanceHistory"), "maintenance record"),
        }
    }
}
