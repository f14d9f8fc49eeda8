use parcelgate_contracts::{AccessTier, FilterError, FilterRequest, RawParams};

use crate::columns;
use crate::policy_for;

#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub sql: String,
    pub values: Vec<BindValue>,
}

// Each `?` claims the next free `$n` at append time.
#[derive(Debug, Clone, Default)]
pub struct ClauseBuilder {
    clauses: Vec<Clause>,
    bound: usize,
}

impl ClauseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, template: &str, values: Vec<BindValue>) -> usize {
        let first = self.bound + 1;
        let mut next = first;
        let mut sql = String::with_capacity(template.len() + 2 * values.len());
        for ch in template.chars() {
            if ch == '?' {
                sql.push('$');
                sql.push_str(&next.to_string());
                next += 1;
            } else {
                sql.push(ch);
            }
        }
        debug_assert_eq!(
            next - first,
            values.len(),
            "placeholder count must match bound values in `{}`",
            template
        );

        self.bound += values.len();
        self.clauses.push(Clause { sql, values });
        first
    }

    pub fn finish(self, ordering: Ordering) -> CompiledQuery {
        CompiledQuery {
            clauses: self.clauses,
            ordering,
            keyset_after: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    IdAscending,
    NearestToEnvelopeCenter { envelope_first_param: usize },
}

impl Ordering {
    pub fn expression(&self) -> String {
        match self {
            Ordering::IdAscending => format!("{} ASC", columns::ID),
            Ordering::NearestToEnvelopeCenter {
                envelope_first_param: p,
            } => format!(
                "{} <-> ST_Centroid(ST_MakeEnvelope(${}, ${}, ${}, ${}, {})) ASC, {} ASC",
                columns::GEOMETRY,
                p,
                p + 1,
                p + 2,
                p + 3,
                columns::SRID,
                columns::ID
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    clauses: Vec<Clause>,
    ordering: Ordering,
    keyset_after: Option<String>,
}

impl CompiledQuery {
    pub fn predicate_clauses(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().map(|c| c.sql.as_str())
    }

    pub fn parameters(&self) -> impl Iterator<Item = &BindValue> {
        self.clauses.iter().flat_map(|c| c.values.iter())
    }

    pub fn parameter_count(&self) -> usize {
        self.clauses.iter().map(|c| c.values.len()).sum()
    }

    pub fn ordering(&self) -> Ordering {
        self.ordering
    }

    pub fn ordering_expression(&self) -> String {
        self.ordering.expression()
    }

    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            return "TRUE".to_string();
        }
        self.clauses
            .iter()
            .map(|c| c.sql.as_str())
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    pub fn keyset_after(&self) -> Option<&str> {
        self.keyset_after.as_deref()
    }

    // Keyset pages are always in identifier order.
    pub fn after_cursor(&self, cursor: &str) -> CompiledQuery {
        let mut builder = ClauseBuilder {
            clauses: self.clauses.clone(),
            bound: self.parameter_count(),
        };
        builder.push(
            &format!("{} > ?", columns::ID),
            vec![BindValue::Text(cursor.to_string())],
        );

        let mut page = builder.finish(Ordering::IdAscending);
        page.keyset_after = Some(cursor.to_string());
        page
    }
}

pub fn compile(raw: &RawParams, tier: AccessTier) -> Result<CompiledQuery, FilterError> {
    let request = FilterRequest::from_params(raw)?;
    Ok(compile_request(&request, tier))
}

pub fn compile_request(request: &FilterRequest, tier: AccessTier) -> CompiledQuery {
    let policy = policy_for(tier);
    let mut builder = ClauseBuilder::new();

    if let Some(clause) = policy.mandatory_clause {
        builder.push(clause, Vec::new());
    }

    let price_ge = format!("{} >= ?", columns::TOTAL_VALUE);
    let price_le = format!("{} <= ?", columns::TOTAL_VALUE);
    let sqft_ge = format!("({0} IS NOT NULL AND {0} >= ?)", columns::SQFT);
    let sqft_le = format!("({0} IS NOT NULL AND {0} <= ?)", columns::SQFT);

    let bounds = request.bounds;
    for (template, value) in [
        (&price_ge, bounds.min_price),
        (&price_le, bounds.max_price),
        (&sqft_ge, bounds.min_sqft),
        (&sqft_le, bounds.max_sqft),
    ] {
        if let Some(value) = value {
            builder.push(template, vec![BindValue::Float(value)]);
        }
    }

    let ordering = match request.bbox {
        Some(bbox) => {
            let first = builder.push(
                &format!(
                    "ST_Intersects({}, ST_MakeEnvelope(?, ?, ?, ?, {}))",
                    columns::GEOMETRY,
                    columns::SRID
                ),
                vec![
                    BindValue::Float(bbox.west),
                    BindValue::Float(bbox.south),
                    BindValue::Float(bbox.east),
                    BindValue::Float(bbox.north),
                ],
            );
            Ordering::NearestToEnvelopeCenter {
                envelope_first_param: first,
            }
        }
        None => Ordering::IdAscending,
    };

    builder.finish(ordering)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GUEST_COUNTY_CLAUSE;

    fn params(pairs: &[(&str, &str)]) -> RawParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn bbox_params() -> Vec<(&'static str, &'static str)> {
        vec![
            ("west", "-96.9"),
            ("east", "-96.7"),
            ("south", "32.7"),
            ("north", "32.9"),
        ]
    }

    #[test]
    fn guest_always_gets_county_clause_first() {
        for raw in [
            params(&[]),
            params(&[("minPrice", "1")]),
            params(&bbox_params()),
        ] {
            let compiled = compile(&raw, AccessTier::Guest).expect("compile should succeed");
            assert_eq!(compiled.predicate_clauses().next(), Some(GUEST_COUNTY_CLAUSE));
        }
    }

    #[test]
    fn authenticated_never_gets_county_clause() {
        for raw in [params(&[]), params(&[("minPrice", "1")]), params(&bbox_params())] {
            let compiled =
                compile(&raw, AccessTier::Authenticated).expect("compile should succeed");
            assert!(
                compiled
                    .predicate_clauses()
                    .all(|c| !c.contains("county"))
            );
        }
    }

    #[test]
    fn empty_request_matches_everything_in_id_order() {
        let compiled =
            compile(&params(&[]), AccessTier::Authenticated).expect("compile should succeed");
        assert_eq!(compiled.where_sql(), "TRUE");
        assert_eq!(compiled.parameter_count(), 0);
        assert_eq!(compiled.ordering(), Ordering::IdAscending);
        assert_eq!(compiled.ordering_expression(), "id::text ASC");
    }

    #[test]
    fn numeric_bounds_bind_in_declaration_order_for_both_tiers() {
        let raw = params(&[
            ("maxSqft", "4000"),
            ("minPrice", "100000"),
            ("minSqft", "1200"),
            ("maxPrice", "900000"),
        ]);

        for tier in [AccessTier::Guest, AccessTier::Authenticated] {
            let compiled = compile(&raw, tier).expect("compile should succeed");
            assert_eq!(
                compiled.parameters().cloned().collect::<Vec<_>>(),
                vec![
                    BindValue::Float(100000.0),
                    BindValue::Float(900000.0),
                    BindValue::Float(1200.0),
                    BindValue::Float(4000.0),
                ]
            );
        }
    }

    #[test]
    fn placeholders_are_numbered_in_append_order() {
        let compiled = compile(
            &params(&[("minPrice", "1"), ("maxSqft", "2")]),
            AccessTier::Guest,
        )
        .expect("compile should succeed");

        assert_eq!(
            compiled.where_sql(),
            "county = 'DALLAS' AND total_value >= $1 AND (sqft IS NOT NULL AND sqft <= $2)"
        );
    }

    #[test]
    fn sqft_bounds_reject_null_area() {
        let compiled = compile(
            &params(&[("minSqft", "10"), ("maxSqft", "20")]),
            AccessTier::Authenticated,
        )
        .expect("compile should succeed");

        for clause in compiled.predicate_clauses() {
            assert!(clause.starts_with("(sqft IS NOT NULL AND "));
        }
    }

    #[test]
    fn bounding_box_binds_west_south_east_north_and_orders_by_proximity() {
        let mut pairs = bbox_params();
        pairs.push(("minPrice", "5"));
        let compiled =
            compile(&params(&pairs), AccessTier::Authenticated).expect("compile should succeed");

        assert_eq!(
            compiled.parameters().cloned().collect::<Vec<_>>(),
            vec![
                BindValue::Float(5.0),
                BindValue::Float(-96.9),
                BindValue::Float(32.7),
                BindValue::Float(-96.7),
                BindValue::Float(32.9),
            ]
        );
        assert_eq!(
            compiled.predicate_clauses().last(),
            Some("ST_Intersects(geom, ST_MakeEnvelope($2, $3, $4, $5, 4326))")
        );
        assert_eq!(
            compiled.ordering(),
            Ordering::NearestToEnvelopeCenter {
                envelope_first_param: 2
            }
        );
        assert_eq!(
            compiled.ordering_expression(),
            "geom <-> ST_Centroid(ST_MakeEnvelope($2, $3, $4, $5, 4326)) ASC, id::text ASC"
        );
    }

    #[test]
    fn partial_bounding_box_compiles_like_no_box() {
        let plain = compile(&params(&[("minPrice", "7")]), AccessTier::Guest)
            .expect("compile should succeed");
        let partial = compile(
            &params(&[("minPrice", "7"), ("west", "-96.9"), ("north", "32.9"), ("east", "-96.7")]),
            AccessTier::Guest,
        )
        .expect("compile should succeed");

        assert_eq!(plain, partial);
        assert_eq!(partial.ordering(), Ordering::IdAscending);
    }

    #[test]
    fn values_never_change_predicate_text() {
        let a = compile(
            &params(&[("minPrice", "1"), ("maxPrice", "2")]),
            AccessTier::Guest,
        )
        .expect("compile should succeed");
        let b = compile(
            &params(&[("minPrice", "1e9"), ("maxPrice", "0.000001")]),
            AccessTier::Guest,
        )
        .expect("compile should succeed");

        assert_eq!(a.where_sql(), b.where_sql());
        assert_ne!(
            a.parameters().collect::<Vec<_>>(),
            b.parameters().collect::<Vec<_>>()
        );
    }

    #[test]
    fn non_numeric_input_is_a_caller_error() {
        let err = compile(&params(&[("maxPrice", "1; DROP TABLE x")]), AccessTier::Guest)
            .unwrap_err();
        assert_eq!(err.param, "maxPrice");
    }

    #[test]
    fn keyset_page_appends_cursor_and_forces_id_order() {
        let mut pairs = bbox_params();
        pairs.push(("minSqft", "100"));
        let base =
            compile(&params(&pairs), AccessTier::Guest).expect("compile should succeed");
        let page = base.after_cursor("P-000100");

        assert_eq!(page.parameter_count(), base.parameter_count() + 1);
        assert_eq!(page.predicate_clauses().last(), Some("id::text > $6"));
        assert_eq!(
            page.parameters().last(),
            Some(&BindValue::Text("P-000100".to_string()))
        );
        assert_eq!(page.ordering(), Ordering::IdAscending);
        assert_eq!(page.keyset_after(), Some("P-000100"));

        // The base query is untouched.
        assert_eq!(base.keyset_after(), None);
        assert_eq!(base.parameter_count(), 5);
    }
}
