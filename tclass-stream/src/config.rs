//! Runtime configuration for streams and the runner

use crate::id::{Family, StreamId};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tclass_protocol::PayloadSource;
use thiserror::Error;

/// How to react when an outgoing datagram cannot be built or sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause before trying the same cycle again
    pub backoff: Duration,
    /// Consecutive failures after which the stream is retired
    /// (`None` retries forever)
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            backoff: Duration::from_millis(10),
            max_attempts: Some(500),
        }
    }
}

/// Per-stream timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// How long to wait for the echo before counting the request dropped
    pub wait: Duration,
    /// Minimum gap between two dispatches of the same stream
    pub cooldown: Duration,
    /// Send failure handling
    pub retry: RetryPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            wait: Duration::from_secs(2),
            cooldown: Duration::from_millis(1),
            retry: RetryPolicy::default(),
        }
    }
}

/// The two responders of one address family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyPeers {
    /// Peer A
    pub primary: IpAddr,
    /// Peer B
    pub secondary: IpAddr,
}

impl FamilyPeers {
    pub fn new(primary: IpAddr, secondary: IpAddr) -> Self {
        FamilyPeers { primary, secondary }
    }

    /// Both peers at the same address
    pub fn single(peer: IpAddr) -> Self {
        FamilyPeers::new(peer, peer)
    }
}

/// Which responder each priority class talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerPolicy {
    /// Even classes to peer A, odd classes to peer B
    #[default]
    Alternate,
    /// Every class to peer A
    PrimaryOnly,
}

impl PeerPolicy {
    pub fn select(self, peers: &FamilyPeers, priority: u8) -> IpAddr {
        match self {
            PeerPolicy::Alternate if priority % 2 == 1 => peers.secondary,
            PeerPolicy::Alternate | PeerPolicy::PrimaryOnly => peers.primary,
        }
    }
}

/// Everything the runner needs to bring streams up
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Number of priority classes per family
    pub classes: u8,
    /// IPv4 responders (`None` disables IPv4 streams)
    pub ipv4: Option<FamilyPeers>,
    /// IPv6 responders (`None` disables IPv6 streams)
    pub ipv6: Option<FamilyPeers>,
    /// Responder UDP port
    pub peer_port: u16,
    /// Local UDP port; 0 picks an ephemeral port, otherwise class `n`
    /// binds `local_port + n`
    pub local_port: u16,
    /// Per-stream timing
    pub stream: StreamConfig,
    /// How long bring-up keeps retrying a session that fails to open
    pub connect_timeout: Duration,
    /// Pause before bring-up so interfaces can settle
    pub startup_delay: Duration,
    /// Statistics report period
    pub report_interval: Duration,
    /// How late a report may still be emitted for its slot
    pub report_slack: Duration,
    /// Peer selection per class
    pub peer_policy: PeerPolicy,
    /// Seed for payload lengths; `None` seeds from the OS
    pub seed: Option<u64>,
    /// Payload corpus
    pub payload: PayloadSource,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            classes: 8,
            ipv4: None,
            ipv6: None,
            peer_port: 4242,
            local_port: 0,
            stream: StreamConfig::default(),
            connect_timeout: Duration::from_secs(10),
            startup_delay: Duration::ZERO,
            report_interval: Duration::from_secs(30),
            report_slack: Duration::from_secs(30),
            peer_policy: PeerPolicy::Alternate,
            seed: None,
            payload: PayloadSource::default(),
        }
    }
}

impl RunnerConfig {
    /// Responders configured for a family
    pub fn peers(&self, family: Family) -> Option<&FamilyPeers> {
        match family {
            Family::Ipv4 => self.ipv4.as_ref(),
            Family::Ipv6 => self.ipv6.as_ref(),
        }
    }

    /// Families with responders configured, IPv6 first
    pub fn families(&self) -> Vec<Family> {
        [Family::Ipv6, Family::Ipv4]
            .into_iter()
            .filter(|family| self.peers(*family).is_some())
            .collect()
    }

    /// Every stream this configuration describes, in bring-up order
    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.families()
            .into_iter()
            .flat_map(|family| (0..self.classes).map(move |p| StreamId::new(family, p)))
            .collect()
    }

    /// Peer a stream talks to
    pub fn peer_for(&self, id: StreamId) -> Option<SocketAddr> {
        let peers = self.peers(id.family)?;
        let ip = self.peer_policy.select(peers, id.priority);
        Some(SocketAddr::new(ip, self.peer_port))
    }

    /// Local address a stream binds
    pub fn local_for(&self, id: StreamId) -> SocketAddr {
        let port = if self.local_port == 0 {
            0
        } else {
            self.local_port.saturating_add(u16::from(id.priority))
        };
        id.family.unspecified(port)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.classes == 0 || self.classes > tclass_io::MAX_PRIORITY + 1 {
            return Err(ConfigError::Classes(self.classes));
        }
        if self.ipv4.is_none() && self.ipv6.is_none() {
            return Err(ConfigError::NoFamilies);
        }
        for (family, peers) in [(Family::Ipv4, &self.ipv4), (Family::Ipv6, &self.ipv6)] {
            if let Some(peers) = peers {
                for ip in [peers.primary, peers.secondary] {
                    if Family::of(&ip) != family {
                        return Err(ConfigError::PeerFamily { family, peer: ip });
                    }
                }
            }
        }
        if self.peer_port == 0 {
            return Err(ConfigError::PeerPort);
        }
        if self.stream.wait.is_zero() {
            return Err(ConfigError::ZeroWait);
        }
        if self.report_interval.is_zero() {
            return Err(ConfigError::ZeroReportInterval);
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Number of classes must be between 1 and 8, got {0}")]
    Classes(u8),

    #[error("No address family has peers configured")]
    NoFamilies,

    #[error("{family} peer {peer} has the wrong address family")]
    PeerFamily { family: Family, peer: IpAddr },

    #[error("Peer port must not be 0")]
    PeerPort,

    #[error("Reply wait must be greater than zero")]
    ZeroWait,

    #[error("Report interval must be greater than zero")]
    ZeroReportInterval,
}
