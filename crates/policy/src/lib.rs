use parcelgate_contracts::AccessTier;

pub mod columns;
pub mod compile;

pub use compile::{BindValue, Clause, ClauseBuilder, CompiledQuery, Ordering, compile, compile_request};

macro_rules! guest_county {
    () => {
        "DALLAS"
    };
}

/// County visible to guest callers.
pub const GUEST_COUNTY: &str = guest_county!();

pub const GUEST_COUNTY_CLAUSE: &str = concat!("county = '", guest_county!(), "'");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPolicy {
    pub tier: AccessTier,
    pub query_row_limit: usize,
    /// Absolute ceiling for one export, summed across all batches.
    pub export_row_limit: usize,
    pub mandatory_clause: Option<&'static str>,
}

const GUEST_QUERY_ROW_LIMIT: usize = 100;
const GUEST_EXPORT_ROW_LIMIT: usize = 1_000;
const AUTHENTICATED_QUERY_ROW_LIMIT: usize = 1_000;
const AUTHENTICATED_EXPORT_ROW_LIMIT: usize = 500_000;

pub fn policy_for(tier: AccessTier) -> AccessPolicy {
    match tier {
        AccessTier::Guest => AccessPolicy {
            tier,
            query_row_limit: GUEST_QUERY_ROW_LIMIT,
            export_row_limit: GUEST_EXPORT_ROW_LIMIT,
            mandatory_clause: Some(GUEST_COUNTY_CLAUSE),
        },
        AccessTier::Authenticated => AccessPolicy {
            tier,
            query_row_limit: AUTHENTICATED_QUERY_ROW_LIMIT,
            export_row_limit: AUTHENTICATED_EXPORT_ROW_LIMIT,
            mandatory_clause: None,
        },
    }
}
