//! CSV encoding of exported parcel rows.

use crate::source::ParcelRow;

pub const HEADER: [&str; 5] = ["id", "address", "county", "area", "totalValue"];

/// Quotes a field when it contains a delimiter, quote or line break; embedded
/// quotes are doubled.
pub fn escape_field(value: &str) -> String {
    if !value.contains([',', '"', '\n', '\r']) {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

pub fn header_line() -> String {
    let mut line = HEADER.join(",");
    line.push('\n');
    line
}

pub fn encode_row(row: &ParcelRow, out: &mut String) {
    let fields = [
        escape_field(&row.id),
        optional_text(row.address.as_deref()),
        optional_text(row.county.as_deref()),
        optional_number(row.sqft),
        optional_number(row.total_value),
    ];
    out.push_str(&fields.join(","));
    out.push('\n');
}

pub fn encode_rows(rows: &[ParcelRow]) -> String {
    let mut out = String::with_capacity(rows.len() * 64);
    for row in rows {
        encode_row(row, &mut out);
    }
    out
}

fn optional_text(value: Option<&str>) -> String {
    value.map(escape_field).unwrap_or_default()
}

fn optional_number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, address: Option<&str>) -> ParcelRow {
        ParcelRow {
            id: id.to_string(),
            address: address.map(str::to_string),
            county: Some("DALLAS".to_string()),
            sqft: Some(1850.0),
            total_value: Some(312500.5),
            geometry: None,
        }
    }

    #[test]
    fn header_names_area_not_sqft() {
        assert_eq!(header_line(), "id,address,county,area,totalValue\n");
    }

    #[test]
    fn plain_fields_pass_through() {
        assert_eq!(escape_field("100 Main St"), "100 Main St");
        assert_eq!(escape_field(""), "");
    }

    #[test]
    fn comma_and_quotes_are_escaped() {
        assert_eq!(escape_field("Sample, \"Ave\""), "\"Sample, \"\"Ave\"\"\"");
    }

    #[test]
    fn line_breaks_are_quoted() {
        assert_eq!(escape_field("Suite 4\nBldg B"), "\"Suite 4\nBldg B\"");
        assert_eq!(escape_field("a\rb"), "\"a\rb\"");
    }

    #[test]
    fn row_encodes_nulls_as_empty_fields() {
        let mut parcel = row("p-1", None);
        parcel.sqft = None;
        let mut out = String::new();
        encode_row(&parcel, &mut out);
        assert_eq!(out, "p-1,,DALLAS,,312500.5\n");
    }

    #[test]
    fn rows_keep_input_order() {
        let encoded = encode_rows(&[row("a", Some("1 Elm")), row("b", Some("Sample, \"Ave\""))]);
        assert_eq!(
            encoded,
            "a,1 Elm,DALLAS,1850,312500.5\nb,\"Sample, \"\"Ave\"\"\",DALLAS,1850,312500.5\n"
        );
    }
}
