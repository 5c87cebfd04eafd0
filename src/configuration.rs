pub use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::snmp::{agentx::AgentXAddress, AgentXError, SessionConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Invalid AgentX socket: {0}")]
    InvalidSocket(#[from] AgentXError),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("Data directory {0} does not exist")]
    MissingDataDir(PathBuf),
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Configuration {
    /// AgentX master agent socket: a Unix socket path or tcp:host:port
    #[arg(short = 's', long, default_value = "/var/agentx/master")]
    pub agentx_socket: String,
    /// Directory holding one counters JSON file per namespace
    #[arg(short, long, default_value = "/var/lib/qos-subagent")]
    pub data_dir: PathBuf,
    /// Seconds between counter refreshes
    #[arg(short = 'f', long, default_value_t = 5)]
    pub update_frequency: u64,
    /// Refreshes between rediscoveries of namespaces, ports and queues
    #[arg(short, long, default_value_t = 12)]
    pub reinit_rate: u32,
    /// Seconds to wait before reconnecting to the master agent
    #[arg(long, default_value_t = 10)]
    pub reconnect_interval: u64,
    /// Timeout advertised to the master agent, in seconds
    #[arg(short, long, default_value_t = 5)]
    pub timeout: u8,
    /// Sub-agent description sent in the Open PDU
    #[arg(long, default_value = "qos-subagent AgentX sub-agent")]
    pub description: String,
}

impl Configuration {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.agentx_address()?;

        if self.update_frequency == 0 {
            return Err(ConfigurationError::Zero("update-frequency"));
        }
        if self.reinit_rate == 0 {
            return Err(ConfigurationError::Zero("reinit-rate"));
        }
        if self.reconnect_interval == 0 {
            return Err(ConfigurationError::Zero("reconnect-interval"));
        }
        if !self.data_dir.is_dir() {
            return Err(ConfigurationError::MissingDataDir(self.data_dir.clone()));
        }

        Ok(())
    }

    pub fn agentx_address(&self) -> Result<AgentXAddress, ConfigurationError> {
        Ok(self.agentx_socket.parse()?)
    }

    pub fn update_frequency(&self) -> Duration {
        Duration::from_secs(self.update_frequency)
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigurationError> {
        Ok(SessionConfig {
            address: self.agentx_address()?,
            description: self.description.clone(),
            timeout: self.timeout,
            reconnect_interval: Duration::from_secs(self.reconnect_interval),
        })
    }
}
