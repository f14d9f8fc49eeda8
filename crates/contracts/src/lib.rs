use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod params;

pub use params::{FilterError, RawParams};

/// Access class of a caller. Derived once per request and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTier {
    Guest,
    Authenticated,
}

impl AccessTier {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessTier::Guest => "guest",
            AccessTier::Authenticated => "authenticated",
        }
    }
}

/// Numeric range bounds of a filter: everything in a request except the bounding box.
/// This is also the shape that gets memorized per caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_sqft: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sqft: Option<f64>,
}

impl FilterBounds {
    pub fn is_empty(&self) -> bool {
        self.min_price.is_none()
            && self.max_price.is_none()
            && self.min_sqft.is_none()
            && self.max_sqft.is_none()
    }
}

/// Spatial window in EPSG:4326 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub east: f64,
    pub south: f64,
    pub north: f64,
}

impl BoundingBox {
    /// `(longitude, latitude)` of the box midpoint.
    pub fn center(&self) -> (f64, f64) {
        ((self.west + self.east) / 2.0, (self.south + self.north) / 2.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FilterRequest {
    pub bounds: FilterBounds,
    pub bbox: Option<BoundingBox>,
}

/// Best-effort per-caller key used for filter memorization only.
///
/// There is intentionally no conversion from this type into an [`AccessTier`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub const ANONYMOUS: &'static str = "anonymous";

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn anonymous() -> Self {
        Self(Self::ANONYMOUS.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One parcel as returned by the interactive query endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelRecord {
    pub id: String,
    pub address: Option<String>,
    pub county: Option<String>,
    pub sqft: Option<f64>,
    #[serde(rename = "totalValue")]
    pub total_value: Option<f64>,
    pub geometry: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFilterEntry {
    pub filters: FilterBounds,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_bounds_serialize_only_present_fields() {
        let bounds = FilterBounds {
            min_price: Some(100000.0),
            ..FilterBounds::default()
        };

        let value = serde_json::to_value(bounds).expect("bounds should serialize");
        assert_eq!(value, serde_json::json!({ "minPrice": 100000.0 }));

        let back: FilterBounds =
            serde_json::from_value(serde_json::json!({ "minPrice": 100000 }))
                .expect("bounds should deserialize from integer json");
        assert_eq!(back, bounds);
    }

    #[test]
    fn bounding_box_center_is_midpoint() {
        let bbox = BoundingBox {
            west: -97.0,
            east: -96.0,
            south: 32.0,
            north: 33.0,
        };
        assert_eq!(bbox.center(), (-96.5, 32.5));
    }

    #[test]
    fn parcel_record_uses_wire_field_names() {
        let record = ParcelRecord {
            id: "p1".to_string(),
            address: Some("1 Main St".to_string()),
            county: Some("DALLAS".to_string()),
            sqft: None,
            total_value: Some(250000.0),
            geometry: None,
        };

        let value = serde_json::to_value(&record).expect("record should serialize");
        assert_eq!(value["totalValue"], serde_json::json!(250000.0));
        assert!(value["sqft"].is_null());
        assert!(value["geometry"].is_null());
    }
}
