use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Prometheus exporter settings. The exporter is off unless enabled.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub prometheus_enabled: bool,

    #[serde(default = "default_prometheus_host")]
    pub prometheus_host: IpAddr,

    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_enabled: false,
            prometheus_host: default_prometheus_host(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

impl MonitoringConfig {
    /// Where `/metrics` is served
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.prometheus_host, self.prometheus_port)
    }

    /// Only checked when the exporter is enabled: the port must be
    /// unprivileged and, outside tests, free to bind.
    pub fn validate(&self) -> Result<()> {
        if !self.prometheus_enabled {
            return Ok(());
        }

        match self.prometheus_port {
            0 => Err(Error::InvalidConfig("prometheus_port cannot be 0 when enabled".into())),
            port if port < 1024 => Err(Error::InvalidConfig(format!(
                "prometheus_port {port} is privileged"
            ))),
            _ => self.check_bindable(),
        }
    }

    #[cfg(not(test))]
    fn check_bindable(&self) -> Result<()> {
        std::net::TcpListener::bind(self.listen_addr())
            .map(|_| ())
            .map_err(|e| Error::InvalidConfig(format!("metrics address {} unavailable: {e}", self.listen_addr())))
    }

    #[cfg(test)]
    fn check_bindable(&self) -> Result<()> {
        Ok(())
    }
}

fn default_prometheus_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_prometheus_port() -> u16 {
    9100
}
