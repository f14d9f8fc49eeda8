// Keyset comparison and ordering must use the same expression.
pub const ID: &str = "id::text";
pub const ADDRESS: &str = "address";
pub const COUNTY: &str = "county";
pub const SQFT: &str = "sqft";
pub const TOTAL_VALUE: &str = "total_value";
pub const GEOMETRY: &str = "geom";

/// SRID of stored geometry and of incoming bounding boxes.
pub const SRID: i32 = 4326;
