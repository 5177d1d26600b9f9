//! Dimension tables and their natural keys.
//!
//! Each dimension is described by a static [`DimensionTable`] and a key type
//! implementing [`NaturalKey`]. The resolver is generic over the key type, so
//! every dimension keeps its own key shape without dynamic dispatch.

use crate::model::LongRecord;
use serde::ser::{Serialize, Serializer};
use std::cmp::Ordering;
use std::hash::Hash;

/// SQL type of a natural-key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Int,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyColumn {
    pub name: &'static str,
    pub kind: ColumnKind,
}

/// Descriptor of a dimension table: name plus natural-key columns.
/// Every table also carries a generated integer `id`.
#[derive(Debug, PartialEq, Eq)]
pub struct DimensionTable {
    pub name: &'static str,
    pub columns: &'static [KeyColumn],
}

impl DimensionTable {
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub const LOCATION_TABLE: DimensionTable = DimensionTable {
    name: "dim_location",
    columns: &[
        KeyColumn { name: "city_name", kind: ColumnKind::Text },
        KeyColumn { name: "department_code", kind: ColumnKind::Text },
    ],
};

pub const DATE_TABLE: DimensionTable = DimensionTable {
    name: "dim_date",
    columns: &[
        KeyColumn { name: "year", kind: ColumnKind::Int },
        KeyColumn { name: "month", kind: ColumnKind::Int },
    ],
};

pub const PROJECT_TYPE_TABLE: DimensionTable = DimensionTable {
    name: "dim_project_type",
    columns: &[KeyColumn { name: "name", kind: ColumnKind::Text }],
};

pub const STATUS_TABLE: DimensionTable = DimensionTable {
    name: "dim_status",
    columns: &[KeyColumn { name: "name", kind: ColumnKind::Text }],
};

/// A single natural-key column value as stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    Text(Option<String>),
    Int(Option<i32>),
}

impl KeyPart {
    pub fn null(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Text => KeyPart::Text(None),
            ColumnKind::Int => KeyPart::Int(None),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, KeyPart::Text(None) | KeyPart::Int(None))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            KeyPart::Text(v) => v.as_deref(),
            KeyPart::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            KeyPart::Int(v) => *v,
            KeyPart::Text(_) => None,
        }
    }

    /// Ascending order with nulls sorted after every value.
    pub fn cmp_nulls_last(&self, other: &Self) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.cmp(other),
        }
    }
}

impl Serialize for KeyPart {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            KeyPart::Text(Some(s)) => serializer.serialize_str(s),
            KeyPart::Int(Some(i)) => serializer.serialize_i32(*i),
            KeyPart::Text(None) | KeyPart::Int(None) => serializer.serialize_none(),
        }
    }
}

/// A dimension row read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredKey {
    pub id: i32,
    pub parts: Vec<KeyPart>,
}

/// Natural key of one dimension kind.
pub trait NaturalKey: Clone + Eq + Hash + Send + Sync + 'static {
    const TABLE: &'static DimensionTable;

    /// Extract this dimension's key from a record, or `None` when the
    /// record carries no usable value for the dimension.
    fn extract(record: &LongRecord) -> Option<Self>;

    fn to_parts(&self) -> Vec<KeyPart>;

    fn from_parts(parts: &[KeyPart]) -> Option<Self>;
}

// =============================================================================
// Field decoding
// =============================================================================

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Department codes must be numeric; anything else decodes to null.
pub fn decode_unit_code(raw: Option<&str>) -> Option<String> {
    let code = raw?.trim();
    if !code.is_empty() && code.chars().all(|c| c.is_ascii_digit()) {
        Some(code.to_string())
    } else {
        None
    }
}

/// Years must be positive.
pub fn decode_year(raw: Option<i32>) -> Option<i32> {
    raw.filter(|y| *y > 0)
}

/// Months must fall in 1..=12.
pub fn decode_month(raw: Option<i32>) -> Option<i32> {
    raw.filter(|m| (1..=12).contains(m))
}

// =============================================================================
// Keys
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationKey {
    pub city_name: Option<String>,
    pub department_code: Option<String>,
}

impl NaturalKey for LocationKey {
    const TABLE: &'static DimensionTable = &LOCATION_TABLE;

    fn extract(record: &LongRecord) -> Option<Self> {
        Some(LocationKey {
            city_name: non_empty(&record.unit_name),
            department_code: decode_unit_code(record.unit_code.as_deref()),
        })
    }

    fn to_parts(&self) -> Vec<KeyPart> {
        vec![
            KeyPart::Text(self.city_name.clone()),
            KeyPart::Text(self.department_code.clone()),
        ]
    }

    fn from_parts(parts: &[KeyPart]) -> Option<Self> {
        match parts {
            [KeyPart::Text(city_name), KeyPart::Text(department_code)] => Some(LocationKey {
                city_name: city_name.clone(),
                department_code: department_code.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateKey {
    pub year: Option<i32>,
    pub month: Option<i32>,
}

impl NaturalKey for DateKey {
    const TABLE: &'static DimensionTable = &DATE_TABLE;

    fn extract(record: &LongRecord) -> Option<Self> {
        Some(DateKey {
            year: decode_year(record.year),
            month: decode_month(record.month),
        })
    }

    fn to_parts(&self) -> Vec<KeyPart> {
        vec![KeyPart::Int(self.year), KeyPart::Int(self.month)]
    }

    fn from_parts(parts: &[KeyPart]) -> Option<Self> {
        match parts {
            [KeyPart::Int(year), KeyPart::Int(month)] => Some(DateKey {
                year: *year,
                month: *month,
            }),
            _ => None,
        }
    }
}

/// Category of a pivoted column (the test type).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectTypeKey(pub String);

impl NaturalKey for ProjectTypeKey {
    const TABLE: &'static DimensionTable = &PROJECT_TYPE_TABLE;

    fn extract(record: &LongRecord) -> Option<Self> {
        non_empty(&record.category).map(ProjectTypeKey)
    }

    fn to_parts(&self) -> Vec<KeyPart> {
        vec![KeyPart::Text(Some(self.0.clone()))]
    }

    fn from_parts(parts: &[KeyPart]) -> Option<Self> {
        match parts {
            [KeyPart::Text(Some(name))] => Some(ProjectTypeKey(name.clone())),
            _ => None,
        }
    }
}

/// Substate of a pivoted column (the work order status).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusKey(pub String);

impl NaturalKey for StatusKey {
    const TABLE: &'static DimensionTable = &STATUS_TABLE;

    fn extract(record: &LongRecord) -> Option<Self> {
        non_empty(&record.substate).map(StatusKey)
    }

    fn to_parts(&self) -> Vec<KeyPart> {
        vec![KeyPart::Text(Some(self.0.clone()))]
    }

    fn from_parts(parts: &[KeyPart]) -> Option<Self> {
        match parts {
            [KeyPart::Text(Some(name))] => Some(StatusKey(name.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(unit_code: Option<&str>, year: Option<i32>, month: Option<i32>) -> LongRecord {
        LongRecord {
            unit_name: "  CityA ".to_string(),
            unit_code: unit_code.map(str::to_string),
            year,
            month,
            category: " Test1 ".to_string(),
            substate: "".to_string(),
            measure: 1,
        }
    }

    #[test]
    fn test_location_key_trims_name() {
        let key = LocationKey::extract(&record(Some("001"), None, None)).unwrap();
        assert_eq!(key.city_name.as_deref(), Some("CityA"));
        assert_eq!(key.department_code.as_deref(), Some("001"));
    }

    #[test]
    fn test_non_numeric_unit_code_is_null() {
        let key = LocationKey::extract(&record(Some("A-12"), None, None)).unwrap();
        assert_eq!(key.department_code, None);
        assert_eq!(key.city_name.as_deref(), Some("CityA"));
    }

    #[test]
    fn test_date_key_nulls_out_of_range_fields() {
        let key = DateKey::extract(&record(None, Some(2024), Some(13))).unwrap();
        assert_eq!(key, DateKey { year: Some(2024), month: None });

        let key = DateKey::extract(&record(None, Some(-3), Some(4))).unwrap();
        assert_eq!(key, DateKey { year: None, month: Some(4) });
    }

    #[test]
    fn test_empty_substate_has_no_key() {
        let r = record(None, None, None);
        assert_eq!(StatusKey::extract(&r), None);
        assert_eq!(ProjectTypeKey::extract(&r), Some(ProjectTypeKey("Test1".to_string())));
    }

    #[test]
    fn test_parts_round_trip_per_dimension() {
        let location = LocationKey { city_name: Some("CityB".into()), department_code: None };
        assert_eq!(LocationKey::from_parts(&location.to_parts()), Some(location));

        let date = DateKey { year: Some(2024), month: Some(1) };
        assert_eq!(DateKey::from_parts(&date.to_parts()), Some(date));

        // a status row with a null name cannot come from a valid key
        assert_eq!(StatusKey::from_parts(&[KeyPart::Text(None)]), None);
        assert_eq!(DateKey::from_parts(&[KeyPart::Text(None)]), None);
    }

    #[test]
    fn test_nulls_sort_last() {
        let mut parts = vec![
            KeyPart::Int(None),
            KeyPart::Int(Some(3)),
            KeyPart::Int(Some(1)),
        ];
        parts.sort_by(|a, b| a.cmp_nulls_last(b));
        assert_eq!(parts, vec![KeyPart::Int(Some(1)), KeyPart::Int(Some(3)), KeyPart::Int(None)]);
    }

    #[test]
    fn test_key_part_serializes_as_plain_value() {
        assert_eq!(serde_json::to_value(KeyPart::Text(Some("CityA".into()))).unwrap(), "CityA");
        assert_eq!(serde_json::to_value(KeyPart::Int(Some(7))).unwrap(), 7);
        assert!(serde_json::to_value(KeyPart::Int(None)).unwrap().is_null());
    }
}
