use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};

/// Settings shared by every binary in the workspace.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Load from an optional `configuration` file, then `APP__*` environment overrides.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Address to bind the HTTP listener to.
    pub fn socket_addr(&self) -> Result<SocketAddr, AppError> {
        let ip: IpAddr = self.host.parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Invalid host '{}': {}", self.host, e))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_addr_uses_host_and_port() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        assert_eq!(config.socket_addr().unwrap(), "127.0.0.1:0".parse().unwrap());
        assert_eq!(
            Config::default().socket_addr().unwrap(),
            "0.0.0.0:8080".parse().unwrap()
        );
    }

    #[test]
    fn socket_addr_rejects_hostnames() {
        let config = Config {
            host: "not a host".to_string(),
            port: 8080,
        };
        assert!(matches!(config.socket_addr(), Err(AppError::ConfigError(_))));
    }
}
