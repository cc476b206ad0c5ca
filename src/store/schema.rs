//! Row layout shared by every tabular backend.

use serde::{Deserialize, Serialize};

use crate::models::{Status, StatusKey, StatusRecord};
use crate::utils::{format_stamp, parse_stamp};

pub const HEADERS: [&str; 9] = [
    "Device Name",
    "Resource",
    "Type",
    "Value",
    "Status",
    "Previous Status",
    "Last Checked",
    "Offline Since",
    "Online Since",
];

/// One persisted row, every cell kept as text exactly as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    #[serde(rename = "Device Name")]
    pub device_name: String,
    #[serde(rename = "Resource")]
    pub resource: String,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Value", default)]
    pub value: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Previous Status", default)]
    pub previous_status: String,
    #[serde(rename = "Last Checked", default)]
    pub last_checked: String,
    #[serde(rename = "Offline Since", default)]
    pub offline_since: String,
    #[serde(rename = "Online Since", default)]
    pub online_since: String,
}

impl StatusRow {
    pub fn matches(&self, key: &StatusKey) -> bool {
        self.device_name == key.device_name
            && self.resource == key.resource_name
            && self.kind == key.kind_label
    }

    /// `None` when the stored status is not one this monitor writes.
    pub fn to_record(&self) -> Option<StatusRecord> {
        let status = Status::parse(&self.status)?;
        Some(StatusRecord {
            key: StatusKey {
                device_name: self.device_name.clone(),
                resource_name: self.resource.clone(),
                kind_label: self.kind.clone(),
            },
            value: self.value.clone(),
            status,
            previous_status: Status::parse(&self.previous_status),
            last_checked: parse_stamp(&self.last_checked),
            offline_since: parse_stamp(&self.offline_since),
            online_since: parse_stamp(&self.online_since),
        })
    }

    pub fn from_record(record: &StatusRecord) -> Self {
        Self {
            device_name: record.key.device_name.clone(),
            resource: record.key.resource_name.clone(),
            kind: record.key.kind_label.clone(),
            value: record.value.clone(),
            status: record.status.to_string(),
            previous_status: record.previous_status.map(|s| s.to_string()).unwrap_or_default(),
            last_checked: format_stamp(record.last_checked),
            offline_since: format_stamp(record.offline_since),
            online_since: format_stamp(record.online_since),
        }
    }

    pub fn to_cells(&self) -> Vec<String> {
        vec![
            self.device_name.clone(),
            self.resource.clone(),
            self.kind.clone(),
            self.value.clone(),
            self.status.clone(),
            self.previous_status.clone(),
            self.last_checked.clone(),
            self.offline_since.clone(),
            self.online_since.clone(),
        ]
    }

    /// Missing trailing cells read as empty; remote sheets omit them.
    pub fn from_cells(cells: &[String]) -> Self {
        let cell = |i: usize| cells.get(i).cloned().unwrap_or_default();
        Self {
            device_name: cell(0),
            resource: cell(1),
            kind: cell(2),
            value: cell(3),
            status: cell(4),
            previous_status: cell(5),
            last_checked: cell(6),
            offline_since: cell(7),
            online_since: cell(8),
        }
    }
}

pub fn find<'a>(rows: &'a [StatusRow], key: &StatusKey) -> Option<(usize, &'a StatusRow)> {
    rows.iter().enumerate().find(|(_, row)| row.matches(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceKind;

    #[test]
    fn record_survives_row_conversion() {
        let key = StatusKey::new("Office", "Printer", ResourceKind::Host);
        let now = crate::utils::parse_stamp("2024-06-02 07:30:00 AM").unwrap();
        let record = StatusRecord::apply(None, &key, Status::Offline, "10.1.1.20", now);

        let row = StatusRow::from_record(&record);
        assert_eq!(row.kind, "IP");
        assert_eq!(row.status, "Offline");
        assert_eq!(row.previous_status, "");
        assert_eq!(row.offline_since, "2024-06-02 07:30:00 AM");
        assert_eq!(row.online_since, "");
        assert_eq!(row.to_record(), Some(record));
    }

    #[test]
    fn short_rows_pad_with_blanks() {
        let cells = vec!["Office".to_string(), "Printer".to_string(), "IP".to_string(), "10.1.1.20".to_string(), "Online".to_string()];
        let row = StatusRow::from_cells(&cells);
        assert_eq!(row.online_since, "");
        let record = row.to_record().unwrap();
        assert_eq!(record.status, Status::Online);
        assert_eq!(record.previous_status, None);
        assert_eq!(record.last_checked, None);
        assert_eq!(row.to_cells().len(), HEADERS.len());
    }

    #[test]
    fn unknown_status_is_not_a_record() {
        let row = StatusRow { status: "Maintenance".into(), ..StatusRow::default() };
        assert!(row.to_record().is_none());
    }

    #[test]
    fn find_returns_first_match() {
        let key = StatusKey::new("Office", "Printer", ResourceKind::Host);
        let mut a = StatusRow::from_cells(&["Office".into(), "Printer".into(), "IP".into()]);
        a.value = "first".into();
        let mut b = a.clone();
        b.value = "second".into();
        let other = StatusRow::from_cells(&["Office".into(), "Printer".into(), "URL".into()]);
        let rows = vec![other, a, b];

        let (index, row) = find(&rows, &key).unwrap();
        assert_eq!(index, 1);
        assert_eq!(row.value, "first");
    }
}
