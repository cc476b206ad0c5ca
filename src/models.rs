use chrono::NaiveDateTime;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Online,
    Offline,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Online => "Online",
            Status::Offline => "Offline",
        }
    }

    pub fn parse(raw: &str) -> Option<Status> {
        match raw.trim() {
            "Online" => Some(Status::Online),
            "Offline" => Some(Status::Offline),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Host,
    Port,
    Http,
    Directory,
}

impl ResourceKind {
    /// Label persisted in the `Type` column; part of the record key.
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Host => "IP",
            ResourceKind::Port => "Port",
            ResourceKind::Http => "URL",
            ResourceKind::Directory => "Directory",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One thing to check, as resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub device_name: String,
    pub resource_name: String,
    pub kind: ResourceKind,
    pub target: String,
    pub ports: Vec<u16>,
    pub port_scan_only: bool,
}

impl ResourceDescriptor {
    pub fn key(&self) -> StatusKey {
        StatusKey::new(&self.device_name, &self.resource_name, self.kind)
    }
}

/// Store key. Kept as the persisted label so rows written by other tools
/// with unexpected types still round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusKey {
    pub device_name: String,
    pub resource_name: String,
    pub kind_label: String,
}

impl StatusKey {
    pub fn new(device_name: &str, resource_name: &str, kind: ResourceKind) -> Self {
        Self {
            device_name: device_name.to_string(),
            resource_name: resource_name.to_string(),
            kind_label: kind.label().to_string(),
        }
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} [{}]", self.device_name, self.resource_name, self.kind_label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub status: Status,
    pub latency_ms: Option<f64>,
}

impl ProbeOutcome {
    pub fn online(latency_ms: Option<f64>) -> Self {
        Self { status: Status::Online, latency_ms }
    }

    pub fn offline() -> Self {
        Self { status: Status::Offline, latency_ms: None }
    }
}

/// Durable per-key state. `previous_status` is `None` while the prior state is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub key: StatusKey,
    pub value: String,
    pub status: Status,
    pub previous_status: Option<Status>,
    pub last_checked: Option<NaiveDateTime>,
    pub offline_since: Option<NaiveDateTime>,
    pub online_since: Option<NaiveDateTime>,
}

impl StatusRecord {
    /// Computes the record that replaces `existing` after observing `status`.
    ///
    /// The `*_since` stamp only moves when the status actually changes, so
    /// repeating an observation never re-stamps it.
    pub fn apply(
        existing: Option<&StatusRecord>,
        key: &StatusKey,
        status: Status,
        value: &str,
        now: NaiveDateTime,
    ) -> StatusRecord {
        let previous_status = existing.map(|r| r.status);
        let (mut offline_since, mut online_since) = existing
            .map(|r| (r.offline_since, r.online_since))
            .unwrap_or((None, None));

        if previous_status != Some(status) {
            match status {
                Status::Offline => {
                    offline_since = Some(now);
                    online_since = None;
                }
                Status::Online => {
                    online_since = Some(now);
                    offline_since = None;
                }
            }
        }

        StatusRecord {
            key: key.clone(),
            value: value.to_string(),
            status,
            previous_status,
            last_checked: Some(now),
            offline_since,
            online_since,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    FirstSeenOnline,
    FirstSeenOffline,
    WentOffline,
    CameOnline,
    Unchanged,
}

impl TransitionKind {
    pub fn classify(previous: Option<Status>, current: Status) -> TransitionKind {
        match (previous, current) {
            (None, Status::Offline) => TransitionKind::FirstSeenOffline,
            (None, Status::Online) => TransitionKind::FirstSeenOnline,
            (Some(Status::Online), Status::Offline) => TransitionKind::WentOffline,
            (Some(Status::Offline), Status::Online) => TransitionKind::CameOnline,
            _ => TransitionKind::Unchanged,
        }
    }

    pub fn is_first_seen(&self) -> bool {
        matches!(self, TransitionKind::FirstSeenOnline | TransitionKind::FirstSeenOffline)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub kind: TransitionKind,
    pub device_name: String,
    pub resource_name: String,
    pub value: String,
    pub latency_ms: Option<f64>,
}
