use crate::models::Transition;

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryEntry {
    pub device: String,
    pub resource: String,
    pub value: String,
    pub latency_ms: Option<f64>,
    pub first_seen: bool,
}

impl From<&Transition> for SummaryEntry {
    fn from(t: &Transition) -> Self {
        Self {
            device: t.device_name.clone(),
            resource: t.resource_name.clone(),
            value: t.value.clone(),
            latency_ms: t.latency_ms,
            first_seen: t.kind.is_first_seen(),
        }
    }
}

impl SummaryEntry {
    fn line(&self) -> String {
        let latency = self
            .latency_ms
            .map_or(String::new(), |ms| format!(" - {:.2}ms", ms));
        format!("{} - {} ({}){}", self.device, self.resource, self.value, latency)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSummary {
    pub offline: Vec<SummaryEntry>,
    pub online: Vec<SummaryEntry>,
}

/// Result handed to the notifier. `NoChange` means nothing should be sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Summary {
    NoChange,
    Changes(ChangeSummary),
}

pub fn summarize(went_offline: &[Transition], came_online: &[Transition]) -> Summary {
    if went_offline.is_empty() && came_online.is_empty() {
        return Summary::NoChange;
    }
    Summary::Changes(ChangeSummary {
        offline: went_offline.iter().map(SummaryEntry::from).collect(),
        online: came_online.iter().map(SummaryEntry::from).collect(),
    })
}

fn counted(count: usize, state: &str) -> String {
    let noun = if count == 1 { "Device" } else { "Devices" };
    format!("{} New {} {}", count, state, noun)
}

impl ChangeSummary {
    pub fn offline_count(&self) -> usize {
        self.offline.len()
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    /// Entries with no stored history before this run.
    pub fn first_seen_count(&self) -> usize {
        self.offline.iter().chain(&self.online).filter(|e| e.first_seen).count()
    }

    /// e.g. `Devices - 2 New Offline Devices and 1 New Online Device`
    pub fn title(&self) -> String {
        let mut parts = Vec::new();
        if self.offline_count() > 0 {
            parts.push(counted(self.offline_count(), "Offline"));
        }
        if self.online_count() > 0 {
            parts.push(counted(self.online_count(), "Online"));
        }
        if parts.is_empty() {
            "Devices".to_string()
        } else {
            format!("Devices - {}", parts.join(" and "))
        }
    }

    pub fn body(&self, link: Option<&str>) -> String {
        let mut body = String::new();
        if !self.offline.is_empty() {
            body.push_str("Devices that went offline:\n");
            for entry in &self.offline {
                body.push_str(&entry.line());
                body.push('\n');
            }
        }
        if !self.online.is_empty() {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str("Devices that came back online:\n");
            for entry in &self.online {
                body.push_str(&entry.line());
                body.push('\n');
            }
        }
        if let Some(link) = link {
            body.push_str(&format!("\n\nStatus report: {}\n", link));
        }
        body
    }
}
