use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorConfig {
    pub devices: Vec<Device>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub probes: ProbeConfig,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    pub webhook_url: Option<String>,
    /// Appended to the notification body, e.g. a link to the shared status sheet.
    pub report_link: Option<String>,
}

fn default_max_concurrency() -> usize { 1 }

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Device {
    pub name: String,
    #[serde(default)]
    pub urls: Vec<Entry>,
    #[serde(default)]
    pub ips: Vec<IpEntry>,
    #[serde(default)]
    pub directories: Vec<Entry>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Entry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IpEntry {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub onlyports: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    Csv {
        #[serde(default = "default_csv_path")]
        path: PathBuf,
    },
    Json {
        #[serde(default = "default_json_path")]
        path: PathBuf,
    },
    Memory,
    GoogleSheets {
        spreadsheet_id: String,
        #[serde(default = "default_worksheet")]
        worksheet: String,
        credentials_path: Option<PathBuf>,
        access_token: Option<String>,
        #[serde(default = "default_cache_ttl_secs")]
        cache_ttl_secs: u64,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Csv { path: default_csv_path() }
    }
}

fn default_csv_path() -> PathBuf { PathBuf::from("device_status.csv") }
fn default_json_path() -> PathBuf { PathBuf::from("device_status.json") }
fn default_worksheet() -> String { "Status".into() }
fn default_cache_ttl_secs() -> u64 { 60 }

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PingMode {
    /// Raw ICMP when the process may open one, otherwise the `ping` command.
    #[default]
    Auto,
    Icmp,
    Command,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProbeConfig {
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_ms: u64,
    #[serde(default = "default_port_timeout")]
    pub port_timeout_ms: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_ms: u64,
    #[serde(default)]
    pub ping_mode: PingMode,
    /// Honor `HTTP_PROXY`/`HTTPS_PROXY` for URL checks.
    #[serde(default = "default_http_proxy")]
    pub http_proxy: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ping_timeout_ms: default_ping_timeout(),
            port_timeout_ms: default_port_timeout(),
            http_timeout_ms: default_http_timeout(),
            ping_mode: PingMode::default(),
            http_proxy: default_http_proxy(),
        }
    }
}

pub fn default_ping_timeout() -> u64 { 2000 }
pub fn default_port_timeout() -> u64 { 3000 }
pub fn default_http_timeout() -> u64 { 5000 }
fn default_http_proxy() -> bool { true }

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: MonitorConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks what serde cannot. Duplicate keys are caught when the registry is built.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            bail!("max_concurrency must be at least 1");
        }
        for device in &self.devices {
            if device.name.trim().is_empty() {
                bail!("device with empty name");
            }
            let named = device
                .urls
                .iter()
                .chain(device.directories.iter())
                .map(|e| (e.name.as_str(), e.value.as_str()))
                .chain(device.ips.iter().map(|e| (e.name.as_str(), e.value.as_str())));
            for (name, value) in named {
                if name.trim().is_empty() {
                    bail!("device '{}' has a resource with an empty name", device.name);
                }
                if value.trim().is_empty() {
                    bail!("resource '{}/{}' has an empty value", device.name, name);
                }
            }
            for ip in &device.ips {
                if ip.onlyports && ip.ports.is_empty() {
                    bail!("resource '{}/{}' sets onlyports without any ports", device.name, ip.name);
                }
            }
        }
        if let StoreConfig::GoogleSheets { spreadsheet_id, credentials_path, access_token, .. } = &self.store {
            if spreadsheet_id.trim().is_empty() {
                bail!("google_sheets store needs a spreadsheet_id");
            }
            if credentials_path.is_none() && access_token.is_none() {
                bail!("google_sheets store needs credentials_path or access_token");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "devices": [
            {
                "name": "Edge",
                "urls": [{ "name": "Portal", "value": "https://example.com" }],
                "ips": [
                    { "name": "Router", "value": "192.168.1.1" },
                    { "name": "Web", "value": "192.168.1.1", "ports": [80, 443], "onlyports": true }
                ],
                "directories": [{ "name": "Share", "value": "/mnt/share" }]
            }
        ]
    }"#;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: MonitorConfig = serde_json::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.store, StoreConfig::Csv { path: PathBuf::from("device_status.csv") });
        assert_eq!(config.probes.port_timeout_ms, 3000);
        assert_eq!(config.probes.http_timeout_ms, 5000);
        assert_eq!(config.probes.ping_mode, PingMode::Auto);
        assert!(config.webhook_url.is_none());

        let web = &config.devices[0].ips[1];
        assert_eq!(web.ports, vec![80, 443]);
        assert!(web.onlyports);
        assert!(!config.devices[0].ips[0].onlyports);
    }

    #[test]
    fn sheets_backend_parses_with_defaults() {
        let raw = r#"{
            "devices": [],
            "store": { "backend": "google_sheets", "spreadsheet_id": "abc", "access_token": "t" }
        }"#;
        let config: MonitorConfig = serde_json::from_str(raw).unwrap();
        config.validate().unwrap();
        match config.store {
            StoreConfig::GoogleSheets { worksheet, cache_ttl_secs, .. } => {
                assert_eq!(worksheet, "Status");
                assert_eq!(cache_ttl_secs, 60);
            }
            other => panic!("unexpected store {:?}", other),
        }
    }

    #[test]
    fn onlyports_without_ports_is_rejected() {
        let raw = r#"{ "devices": [ { "name": "D", "ips": [ { "name": "x", "value": "10.0.0.1", "onlyports": true } ] } ] }"#;
        let config: MonitorConfig = serde_json::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_values_are_rejected() {
        let raw = r#"{ "devices": [ { "name": "D", "urls": [ { "name": "x", "value": " " } ] } ] }"#;
        let config: MonitorConfig = serde_json::from_str(raw).unwrap();
        assert!(config.validate().is_err());

        let raw = r#"{ "devices": [], "max_concurrency": 0 }"#;
        let config: MonitorConfig = serde_json::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = MonitorConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
