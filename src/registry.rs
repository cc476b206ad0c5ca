use anyhow::{bail, Result};
use std::collections::HashSet;

use crate::config::Device;
use crate::models::{ResourceDescriptor, ResourceKind};

/// Flattens configured devices into descriptors, in configuration order.
///
/// Within a device, URLs come first, then IPs, then directories. Names and
/// values are trimmed, and every `(device, resource, type)` key must be unique
/// after trimming.
pub fn build(devices: &[Device]) -> Result<Vec<ResourceDescriptor>> {
    let mut resources = Vec::new();

    for device in devices {
        let device_name = device.name.trim();
        for url in &device.urls {
            resources.push(ResourceDescriptor {
                device_name: device_name.to_string(),
                resource_name: url.name.trim().to_string(),
                kind: ResourceKind::Http,
                target: url.value.trim().to_string(),
                ports: Vec::new(),
                port_scan_only: false,
            });
        }

        for ip in &device.ips {
            let kind = if ip.ports.is_empty() { ResourceKind::Host } else { ResourceKind::Port };
            resources.push(ResourceDescriptor {
                device_name: device_name.to_string(),
                resource_name: ip.name.trim().to_string(),
                kind,
                target: ip.value.trim().to_string(),
                ports: ip.ports.clone(),
                port_scan_only: ip.onlyports,
            });
        }

        for dir in &device.directories {
            resources.push(ResourceDescriptor {
                device_name: device_name.to_string(),
                resource_name: dir.name.trim().to_string(),
                kind: ResourceKind::Directory,
                target: dir.value.trim().to_string(),
                ports: Vec::new(),
                port_scan_only: false,
            });
        }
    }

    let mut seen = HashSet::new();
    for resource in &resources {
        let key = resource.key();
        if !seen.insert(key.clone()) {
            bail!("duplicate resource {} in configuration", key);
        }
    }

    Ok(resources)
}
