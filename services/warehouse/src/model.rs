//! Records that flow through a refresh: long-format observations in,
//! fact rows out.

use serde::{Deserialize, Serialize};

/// One normalized observation, produced by melting a wide row.
///
/// Serialized field names are the long-format export columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongRecord {
    pub unit_name: String,
    pub unit_code: Option<String>,
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub category: String,
    pub substate: String,
    pub measure: i64,
}

/// A row of `fact_work_order`.
///
/// `project_type_id` references the category dimension and `status_id`
/// the substate dimension. Any foreign key may be null when its natural
/// key was empty or could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FactRow {
    pub location_id: Option<i32>,
    pub date_id: Option<i32>,
    pub project_type_id: Option<i32>,
    pub status_id: Option<i32>,
    pub count: i64,
}

impl FactRow {
    /// True when every foreign key resolved.
    pub fn is_complete(&self) -> bool {
        self.location_id.is_some()
            && self.date_id.is_some()
            && self.project_type_id.is_some()
            && self.status_id.is_some()
    }
}
