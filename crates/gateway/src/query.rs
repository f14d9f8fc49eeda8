use parcelgate_contracts::{AccessTier, FilterError, FilterRequest, IdentityKey, ParcelRecord, RawParams};
use parcelgate_policy::{compile_request, policy_for};
use parcelgate_store::FilterMemory;

use crate::source::{ParcelRow, ParcelSource, SourceError};

#[derive(Debug)]
pub enum QueryError {
    Filter(FilterError),
    Source(SourceError),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::Filter(err) => write!(f, "invalid filter: {}", err),
            QueryError::Source(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<FilterError> for QueryError {
    fn from(value: FilterError) -> Self {
        QueryError::Filter(value)
    }
}

impl From<SourceError> for QueryError {
    fn from(value: SourceError) -> Self {
        QueryError::Source(value)
    }
}

/// Interactive read: compile, fetch up to the tier's row limit, then remember the
/// caller's numeric filters. Memorization failures never fail the read.
pub async fn query_parcels(
    source: &dyn ParcelSource,
    filters: &FilterMemory,
    raw: &RawParams,
    tier: AccessTier,
    identity: &IdentityKey,
) -> Result<Vec<ParcelRecord>, QueryError> {
    let request = FilterRequest::from_params(raw)?;
    let query = compile_request(&request, tier);

    let rows = source
        .fetch_parcels(&query, policy_for(tier).query_row_limit)
        .await?;
    let records = rows.into_iter().map(into_record).collect::<Vec<_>>();

    if let Err(err) = filters.save(identity, &request.bounds).await {
        crate::metrics::inc_filter_store_failure("save");
        tracing::warn!(error = %err, "failed to memorize filters; continuing");
    }

    Ok(records)
}

fn into_record(row: ParcelRow) -> ParcelRecord {
    let geometry = row.geometry.as_deref().and_then(|raw| {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(parcel_id = %row.id, error = %err, "parcel geometry is not valid GeoJSON; returning null");
                None
            }
        }
    });

    ParcelRecord {
        id: row.id,
        address: row.address,
        county: row.county,
        sqft: row.sqft,
        total_value: row.total_value,
        geometry,
    }
}
