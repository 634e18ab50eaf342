//! Live switch configuration over NETCONF.

mod connector;
mod session;

pub use connector::{Connector, SshConnector, Transport};
pub use session::Session;

use crate::SwitchConfigSource;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum NetconfError {
    #[error("cannot start ssh: {0}")]
    Spawn(std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by the switch")]
    UnexpectedEof,

    /// The transport exited; carries what ssh printed on stderr.
    #[error("ssh failed: {0}")]
    Ssh(String),

    #[error("NETCONF protocol error: {0}")]
    Protocol(String),

    #[error("RPC failed: {0}")]
    Rpc(String),
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct NetconfOptions {
    #[serde(default = "default_username")]
    pub username: String,
    pub private_key: PathBuf,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_ssh_command")]
    pub ssh_command: String,
    #[serde(default = "default_kex_algorithms")]
    pub kex_algorithms: Vec<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_username() -> String {
    "root".into()
}

fn default_port() -> u16 {
    830
}

fn default_ssh_command() -> String {
    "ssh".into()
}

// The switches only negotiate these.
fn default_kex_algorithms() -> Vec<String> {
    vec![
        "curve25519-sha256".into(),
        "ecdh-sha2-nistp256".into(),
        "diffie-hellman-group14-sha1".into(),
    ]
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for NetconfOptions {
    fn default() -> Self {
        NetconfOptions {
            username: default_username(),
            private_key: PathBuf::new(),
            port: default_port(),
            ssh_command: default_ssh_command(),
            kex_algorithms: default_kex_algorithms(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Opens one NETCONF session per call and reads the configuration as text.
pub struct NetconfClient<C = SshConnector> {
    connector: C,
}

impl NetconfClient<SshConnector> {
    pub fn new(options: NetconfOptions) -> Self {
        NetconfClient {
            connector: SshConnector::new(options),
        }
    }
}

impl<C: Connector> NetconfClient<C> {
    pub fn with_connector(connector: C) -> Self {
        NetconfClient { connector }
    }
}

#[async_trait]
impl<C: Connector> SwitchConfigSource for NetconfClient<C> {
    async fn get_config(&self, hostname: &str) -> Result<String, NetconfError> {
        let transport = self.connector.connect(hostname).await?;
        let mut session = Session::establish(transport).await?;
        let config = session.get_configuration_text().await?;
        session.close().await;

        tracing::debug!(hostname, bytes = config.len(), "Fetched switch configuration");
        Ok(config)
    }
}
