use std::collections::HashMap;

use crate::{BoundingBox, FilterBounds, FilterRequest};

/// Query-string parameters exactly as received.
pub type RawParams = HashMap<String, String>;

pub const MIN_PRICE: &str = "minPrice";
pub const MAX_PRICE: &str = "maxPrice";
pub const MIN_SQFT: &str = "minSqft";
pub const MAX_SQFT: &str = "maxSqft";
pub const WEST: &str = "west";
pub const EAST: &str = "east";
pub const SOUTH: &str = "south";
pub const NORTH: &str = "north";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterError {
    pub param: &'static str,
    pub message: String,
}

impl std::fmt::Display for FilterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.param, self.message)
    }
}

impl std::error::Error for FilterError {}

impl FilterRequest {
    /// Coerces loosely-typed query parameters.
    ///
    /// Blank values count as absent. A bounding box is only produced when all four
    /// coordinates are present; any present coordinate must still be numeric.
    pub fn from_params(raw: &RawParams) -> Result<Self, FilterError> {
        let bounds = FilterBounds {
            min_price: parse_bound(raw, MIN_PRICE)?,
            max_price: parse_bound(raw, MAX_PRICE)?,
            min_sqft: parse_bound(raw, MIN_SQFT)?,
            max_sqft: parse_bound(raw, MAX_SQFT)?,
        };

        let west = parse_coordinate(raw, WEST)?;
        let east = parse_coordinate(raw, EAST)?;
        let south = parse_coordinate(raw, SOUTH)?;
        let north = parse_coordinate(raw, NORTH)?;

        let bbox = match (west, east, south, north) {
            (Some(west), Some(east), Some(south), Some(north)) => Some(BoundingBox {
                west,
                east,
                south,
                north,
            }),
            _ => None,
        };

        Ok(Self { bounds, bbox })
    }
}

fn present<'a>(raw: &'a RawParams, key: &str) -> Option<&'a str> {
    raw.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_number(value: &str, key: &'static str) -> Result<f64, FilterError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| FilterError {
            param: key,
            message: "must be a finite number".to_string(),
        })
}

fn parse_bound(raw: &RawParams, key: &'static str) -> Result<Option<f64>, FilterError> {
    let Some(value) = present(raw, key) else {
        return Ok(None);
    };

    let number = parse_number(value, key)?;
    if number < 0.0 {
        return Err(FilterError {
            param: key,
            message: "must be a non-negative number".to_string(),
        });
    }

    Ok(Some(number))
}

fn parse_coordinate(raw: &RawParams, key: &'static str) -> Result<Option<f64>, FilterError> {
    present(raw, key)
        .map(|value| parse_number(value, key))
        .transpose()
}
