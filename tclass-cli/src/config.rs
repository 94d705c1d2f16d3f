//! Configuration file support for the tclass tools

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tclass_stream::{FamilyPeers, PeerPolicy, RetryPolicy, RunnerConfig, StreamConfig};

/// Responders of one address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerPairConfig {
    /// Peer A (even classes)
    pub primary: IpAddr,
    /// Peer B (odd classes); defaults to peer A
    pub secondary: Option<IpAddr>,
}

impl PeerPairConfig {
    fn to_peers(self) -> FamilyPeers {
        FamilyPeers::new(self.primary, self.secondary.unwrap_or(self.primary))
    }
}

/// Peer selection per class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerPolicyConfig {
    /// Even classes to peer A, odd to peer B
    #[default]
    Alternate,
    /// Every class to peer A
    Primary,
}

impl From<PeerPolicyConfig> for PeerPolicy {
    fn from(policy: PeerPolicyConfig) -> Self {
        match policy {
            PeerPolicyConfig::Alternate => PeerPolicy::Alternate,
            PeerPolicyConfig::Primary => PeerPolicy::PrimaryOnly,
        }
    }
}

/// How periodic reports are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStyle {
    /// Through the log at info level
    #[default]
    Log,
    /// As a table on stdout
    Table,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Priority classes per family
    #[serde(default = "default_classes")]
    pub classes: u8,
    /// Responder UDP port
    #[serde(default = "default_peer_port")]
    pub peer_port: u16,
    /// Local port base (0 for ephemeral ports)
    #[serde(default)]
    pub local_port: u16,
    /// Echo wait window in milliseconds
    #[serde(default = "default_wait_ms")]
    pub wait_ms: u64,
    /// Minimum gap between requests of one stream in milliseconds
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Pause after a failed send in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Consecutive failed sends before a stream is retired (0 never retires)
    #[serde(default = "default_max_send_attempts")]
    pub max_send_attempts: u32,
    /// Session bring-up timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Pause before bring-up in milliseconds
    #[serde(default)]
    pub startup_delay_ms: u64,
    /// Statistics interval in seconds
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// How late a report may still fire, in seconds (defaults to the interval)
    pub report_slack_secs: Option<u64>,
    #[serde(default)]
    pub peer_policy: PeerPolicyConfig,
    #[serde(default)]
    pub report_style: ReportStyle,
    /// Fixed RNG seed for payload lengths
    pub seed: Option<u64>,
    /// IPv4 responders
    pub ipv4: Option<PeerPairConfig>,
    /// IPv6 responders
    pub ipv6: Option<PeerPairConfig>,
}

fn default_classes() -> u8 {
    8
}

fn default_peer_port() -> u16 {
    4242
}

fn default_wait_ms() -> u64 {
    2000
}

fn default_cooldown_ms() -> u64 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    10
}

fn default_max_send_attempts() -> u32 {
    500
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_report_interval() -> u64 {
    30
}

/// Echo responder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoConfig {
    /// Listen addresses
    #[serde(default = "default_echo_listen")]
    pub listen: Vec<SocketAddr>,
}

fn default_echo_listen() -> Vec<SocketAddr> {
    vec![SocketAddr::new(IpAddr::from([0, 0, 0, 0]), default_peer_port())]
}

/// Combined configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub client: Option<ClientConfig>,
    pub echo: Option<EchoConfig>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Example client configuration against two responders per family
    pub fn example_client() -> Self {
        Config {
            client: Some(ClientConfig {
                ipv4: Some(PeerPairConfig {
                    primary: IpAddr::from([192, 0, 2, 1]),
                    secondary: Some(IpAddr::from([192, 0, 2, 2])),
                }),
                ipv6: Some(PeerPairConfig {
                    primary: IpAddr::from([0x2001, 0xdb8, 0, 0, 0, 0, 0, 1]),
                    secondary: Some(IpAddr::from([0x2001, 0xdb8, 0, 0, 0, 0, 0, 2])),
                }),
                ..ClientConfig::default()
            }),
            echo: None,
        }
    }

    /// Example echo responder configuration
    pub fn example_echo() -> Self {
        Config {
            client: None,
            echo: Some(EchoConfig {
                listen: vec![
                    SocketAddr::new(IpAddr::from([0, 0, 0, 0]), 4242),
                    SocketAddr::new(IpAddr::from([0u16; 8]), 4242),
                ],
            }),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            classes: default_classes(),
            peer_port: default_peer_port(),
            local_port: 0,
            wait_ms: default_wait_ms(),
            cooldown_ms: default_cooldown_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_send_attempts: default_max_send_attempts(),
            connect_timeout_secs: default_connect_timeout(),
            startup_delay_ms: 0,
            report_interval_secs: default_report_interval(),
            report_slack_secs: None,
            peer_policy: PeerPolicyConfig::default(),
            report_style: ReportStyle::default(),
            seed: None,
            ipv4: None,
            ipv6: None,
        }
    }
}

impl Default for EchoConfig {
    fn default() -> Self {
        EchoConfig {
            listen: default_echo_listen(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ClientConfig {
    /// Get statistics interval as Duration
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    /// Library configuration for the runner
    pub fn to_runner_config(&self) -> RunnerConfig {
        let report_interval = self.report_interval();
        RunnerConfig {
            classes: self.classes,
            ipv4: self.ipv4.map(PeerPairConfig::to_peers),
            ipv6: self.ipv6.map(PeerPairConfig::to_peers),
            peer_port: self.peer_port,
            local_port: self.local_port,
            stream: StreamConfig {
                wait: Duration::from_millis(self.wait_ms),
                cooldown: Duration::from_millis(self.cooldown_ms),
                retry: RetryPolicy {
                    backoff: Duration::from_millis(self.retry_backoff_ms),
                    max_attempts: (self.max_send_attempts > 0).then_some(self.max_send_attempts),
                },
            },
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            startup_delay: Duration::from_millis(self.startup_delay_ms),
            report_interval,
            report_slack: self
                .report_slack_secs
                .map(Duration::from_secs)
                .unwrap_or(report_interval),
            peer_policy: self.peer_policy.into(),
            seed: self.seed,
            ..RunnerConfig::default()
        }
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.to_runner_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

impl EchoConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.is_empty() {
            return Err(ConfigError::Invalid("no listen address".to_string()));
        }
        Ok(())
    }
}
