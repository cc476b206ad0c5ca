use anyhow::{Context, Result};
use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::{Duration, Instant};
use surge_ping::{Client as PingClient, Config as PingConfig, PingIdentifier, PingSequence};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{PingMode, ProbeConfig};
use crate::models::{ProbeOutcome, ResourceDescriptor, ResourceKind, Status};

/// One reachability check. Every failure mode resolves to `Offline`; probes never error.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, resource: &ResourceDescriptor) -> ProbeOutcome;
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

enum PingBackend {
    Icmp(PingClient),
    Command,
}

pub struct HostProbe {
    backend: PingBackend,
    resolver: TokioResolver,
    timeout: Duration,
}

impl HostProbe {
    pub fn new(mode: PingMode, timeout_ms: u64) -> Result<Self> {
        let backend = match mode {
            PingMode::Command => PingBackend::Command,
            PingMode::Icmp => PingBackend::Icmp(
                PingClient::new(&PingConfig::default()).context("Failed to create Ping Client")?,
            ),
            PingMode::Auto => match PingClient::new(&PingConfig::default()) {
                Ok(client) => PingBackend::Icmp(client),
                Err(e) => {
                    info!("ICMP socket unavailable ({}), using the ping command", e);
                    PingBackend::Command
                }
            },
        };

        let resolver = match TokioResolver::builder_tokio() {
            Ok(builder) => builder.build(),
            Err(e) => {
                warn!("System DNS config unreadable ({}), resolving through Cloudflare", e);
                TokioResolver::builder_with_config(
                    ResolverConfig::cloudflare(),
                    TokioConnectionProvider::default(),
                )
                .build()
            }
        };

        Ok(Self { backend, resolver, timeout: Duration::from_millis(timeout_ms) })
    }

    async fn resolve(&self, address: &str) -> Result<IpAddr, String> {
        if let Ok(ip) = address.parse::<IpAddr>() {
            return Ok(ip);
        }
        match self.resolver.lookup_ip(address).await {
            Ok(lookup) => lookup.iter().next().ok_or_else(|| "No IP Address Found".into()),
            Err(e) => Err(format!("DNS Resolution Failed: {}", e)),
        }
    }

    async fn ping_icmp(&self, client: &PingClient, target: &str) -> ProbeOutcome {
        let ip = match self.resolve(target).await {
            Ok(ip) => ip,
            Err(e) => {
                debug!("{}: {}", target, e);
                return ProbeOutcome::offline();
            }
        };
        if ip.is_ipv6() {
            // The shared client only opens an ICMPv4 socket.
            return self.ping_command(target).await;
        }

        let payload = [0u8; 56];
        let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
        pinger.timeout(self.timeout);
        match pinger.ping(PingSequence(0), &payload).await {
            Ok((_, latency)) => ProbeOutcome::online(Some(latency.as_secs_f64() * 1000.0)),
            Err(e) => {
                debug!("{}: ICMP failed: {}", target, e);
                ProbeOutcome::offline()
            }
        }
    }

    async fn ping_command(&self, target: &str) -> ProbeOutcome {
        let mut command = Command::new("ping");
        if cfg!(windows) {
            command.args(["-n", "1", target]);
        } else {
            command.args(["-c", "1", target]);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let start = Instant::now();
        match tokio::time::timeout(self.timeout, command.status()).await {
            Ok(Ok(status)) if status.success() => ProbeOutcome::online(Some(elapsed_ms(start))),
            Ok(Ok(status)) => {
                debug!("{}: ping exited with {}", target, status);
                ProbeOutcome::offline()
            }
            Ok(Err(e)) => {
                debug!("{}: could not run ping: {}", target, e);
                ProbeOutcome::offline()
            }
            Err(_) => {
                debug!("{}: ping timed out", target);
                ProbeOutcome::offline()
            }
        }
    }
}

#[async_trait]
impl Probe for HostProbe {
    async fn check(&self, resource: &ResourceDescriptor) -> ProbeOutcome {
        match &self.backend {
            PingBackend::Icmp(client) => self.ping_icmp(client, &resource.target).await,
            PingBackend::Command => self.ping_command(&resource.target).await,
        }
    }
}

pub struct PortProbe {
    timeout: Duration,
}

impl PortProbe {
    pub fn new(timeout_ms: u64) -> Self {
        Self { timeout: Duration::from_millis(timeout_ms) }
    }

    pub async fn connect(&self, host: &str, port: u16) -> ProbeOutcome {
        let start = Instant::now();
        match tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => ProbeOutcome::online(Some(elapsed_ms(start))),
            Ok(Err(e)) => {
                debug!("{}:{} connection failed: {}", host, port, e);
                ProbeOutcome::offline()
            }
            Err(_) => {
                debug!("{}:{} timed out", host, port);
                ProbeOutcome::offline()
            }
        }
    }
}

#[async_trait]
impl Probe for PortProbe {
    /// Every port is tried, but only the first configured port decides the outcome.
    async fn check(&self, resource: &ResourceDescriptor) -> ProbeOutcome {
        let mut first = None;
        for &port in &resource.ports {
            let outcome = self.connect(&resource.target, port).await;
            debug!(
                "{}/{} port {} -> {}",
                resource.device_name, resource.resource_name, port, outcome.status
            );
            if first.is_none() {
                first = Some(outcome);
            }
        }
        first.unwrap_or_else(ProbeOutcome::offline)
    }
}

pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout_ms: u64, use_proxy: bool) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_millis(timeout_ms));
        if !use_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build().context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self, resource: &ResourceDescriptor) -> ProbeOutcome {
        let start = Instant::now();
        match self.client.get(&resource.target).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                ProbeOutcome::online(Some(elapsed_ms(start)))
            }
            Ok(response) => {
                debug!("{}: HTTP {}", resource.target, response.status());
                ProbeOutcome::offline()
            }
            Err(e) => {
                debug!("{}: request failed: {}", resource.target, e);
                ProbeOutcome::offline()
            }
        }
    }
}

pub struct DirectoryProbe;

#[async_trait]
impl Probe for DirectoryProbe {
    async fn check(&self, resource: &ResourceDescriptor) -> ProbeOutcome {
        match tokio::fs::metadata(&resource.target).await {
            Ok(_) => ProbeOutcome::online(None),
            Err(e) => {
                debug!("{}: {}", resource.target, e);
                ProbeOutcome::offline()
            }
        }
    }
}

/// Dispatches each resource to the probe for its kind.
pub struct Prober {
    host: HostProbe,
    port: PortProbe,
    http: HttpProbe,
    directory: DirectoryProbe,
}

impl Prober {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        Ok(Self {
            host: HostProbe::new(config.ping_mode, config.ping_timeout_ms)?,
            port: PortProbe::new(config.port_timeout_ms),
            http: HttpProbe::new(config.http_timeout_ms, config.http_proxy)?,
            directory: DirectoryProbe,
        })
    }
}

#[async_trait]
impl Probe for Prober {
    async fn check(&self, resource: &ResourceDescriptor) -> ProbeOutcome {
        let outcome = match resource.kind {
            ResourceKind::Host => self.host.check(resource).await,
            ResourceKind::Http => self.http.check(resource).await,
            ResourceKind::Directory => self.directory.check(resource).await,
            ResourceKind::Port => {
                if !resource.port_scan_only
                    && self.host.check(resource).await.status == Status::Offline
                {
                    ProbeOutcome::offline()
                } else {
                    self.port.check(resource).await
                }
            }
        };
        debug!(
            "{}/{} ({}) -> {}{}",
            resource.device_name,
            resource.resource_name,
            resource.target,
            outcome.status,
            outcome.latency_ms.map_or(String::new(), |l| format!(" ({:.2}ms)", l))
        );
        outcome
    }
}
