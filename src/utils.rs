use chrono::{Local, NaiveDateTime};

/// Stamp format used in every persisted row, e.g. `2024-03-01 01:05:09 PM`.
pub const STAMP_FORMAT: &str = "%Y-%m-%d %I:%M:%S %p";

pub fn now_local() -> NaiveDateTime {
    Local::now().naive_local()
}

pub fn format_stamp(stamp: Option<NaiveDateTime>) -> String {
    stamp
        .map(|s| s.format(STAMP_FORMAT).to_string())
        .unwrap_or_default()
}

/// Blank or malformed cells read back as `None`.
pub fn parse_stamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, STAMP_FORMAT).ok()
}
