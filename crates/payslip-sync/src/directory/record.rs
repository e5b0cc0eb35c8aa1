use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single employee known to the directory.
///
/// `attributes` carries any extra spreadsheet columns verbatim, keyed by the
/// trimmed header text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeRecord {
    pub employee_id: String,
    pub national_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl EmployeeRecord {
    pub fn new(
        employee_id: impl Into<String>,
        national_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            employee_id: employee_id.into(),
            national_id: national_id.into(),
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
