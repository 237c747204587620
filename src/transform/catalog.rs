//! Dimension definitions for the analytics layer

use crate::scd::{DimensionSpec, Normalizer, SourceRow};
use serde_json::Value;

/// Property dimension table
pub const DIM_PROPERTY: &str = "dim_property";
/// Party (grantor/grantee) dimension table
pub const DIM_ENTITY: &str = "dim_entity";
/// Transaction fact table
pub const FACT_TRANSACTION: &str = "fact_transaction";

/// `dim_property`: one member per tax-assessor id
pub fn dim_property_spec() -> DimensionSpec {
    DimensionSpec::new(DIM_PROPERTY, "tax_assessor_id")
        .track_from("parcel_number", "parcel_number", Normalizer::Code)
        .track_from("property_address", "address", Normalizer::Text)
        .track_from("property_city", "city", Normalizer::UpperText)
        .track_from("property_state", "state", Normalizer::UpperText)
        .track_from("property_zip", "zip", Normalizer::Code)
        .track_from("property_county", "county", Normalizer::UpperText)
        .track("property_use_code", Normalizer::Code)
        .track("year_built", Normalizer::Integer)
        .track("building_sqft", Normalizer::Decimal { scale: 0 })
        .track_from("land_sqft", "lot_sqft", Normalizer::Decimal { scale: 0 })
        .track("units_count", Normalizer::Integer)
        .track("assessed_value", Normalizer::Decimal { scale: 2 })
        .track("market_value", Normalizer::Decimal { scale: 2 })
        .track("latitude", Normalizer::Decimal { scale: 6 })
        .track("longitude", Normalizer::Decimal { scale: 6 })
}

/// `dim_entity`: one member per normalized party name
pub fn dim_entity_spec() -> DimensionSpec {
    DimensionSpec::new(DIM_ENTITY, "entity_name")
        .with_key_normalizer(Normalizer::UpperText)
        .track("entity_type", Normalizer::Raw)
        .track("entity_code", Normalizer::UpperText)
        .track("entity_address", Normalizer::Text)
}

/// Entity classification derived from a party's code and name parts
pub fn entity_type(code: Option<&str>, first_name: Option<&str>, last_name: Option<&str>) -> &'static str {
    let code = code.map(|c| c.trim().to_uppercase()).unwrap_or_default();
    match code.as_str() {
        "C" | "CORP" | "CORPORATION" => "CORPORATION",
        "T" | "TRUST" => "TRUST",
        "L" | "LLC" => "LLC",
        "P" | "PARTNERSHIP" => "PARTNERSHIP",
        _ => {
            let present = |s: Option<&str>| s.is_some_and(|v| !v.trim().is_empty());
            if present(first_name) && present(last_name) {
                "INDIVIDUAL"
            } else {
                "UNKNOWN"
            }
        }
    }
}

/// Which side of a transaction a party row is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyRole {
    /// Seller
    Grantor,
    /// Buyer
    Grantee,
}

impl PartyRole {
    /// Raw table holding this role
    pub fn table(&self) -> &'static str {
        match self {
            PartyRole::Grantor => "grantors",
            PartyRole::Grantee => "grantees",
        }
    }

    /// Identity column of the raw table
    pub fn identity(&self) -> &'static str {
        match self {
            PartyRole::Grantor => "grantor_id",
            PartyRole::Grantee => "grantee_id",
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            PartyRole::Grantor => "grantor",
            PartyRole::Grantee => "grantee",
        }
    }
}

/// Map a raw party row onto `dim_entity` source columns
///
/// Rows without a usable name are skipped.
pub fn entity_row(role: PartyRole, raw: &SourceRow) -> Option<SourceRow> {
    let field = |suffix: &str| -> Option<&str> {
        raw.get(&format!("{}_{suffix}", role.prefix()))
            .and_then(Value::as_str)
    };

    let name = field("name").filter(|n| !n.trim().is_empty())?;
    let code = field("entity_code");

    let mut row = SourceRow::new();
    row.insert("entity_name".into(), Value::String(name.to_string()));
    row.insert(
        "entity_type".into(),
        Value::String(entity_type(code, field("first_name"), field("last_name")).to_string()),
    );
    row.insert(
        "entity_code".into(),
        code.map_or(Value::Null, |c| Value::String(c.to_string())),
    );
    row.insert(
        "entity_address".into(),
        field("address").map_or(Value::Null, |a| Value::String(a.to_string())),
    );
    Some(row)
}
