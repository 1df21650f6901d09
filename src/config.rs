use std::sync::Arc;
use std::time::Duration;
use anyhow::bail;
use tracing::{info, warn};
use crate::obfuscation::{KeystreamObfuscation, NoObfuscation, Obfuscator};

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

pub struct LocalConfig {
    pub local_id: u32,
    pub remote_id: u32,
    /// UDP address the client application sends its datagrams to
    pub listen_addr: String,
    /// host name or IPv4 address of the remote endpoint; the first IPv4 address it resolves to
    ///  is used
    pub remote: String,
    /// per-packet debug logging
    pub verbose: bool,
    pub obfuscate: bool,
    /// Upper bound for blocking socket reads. This is the latency for noticing a shutdown.
    pub read_timeout: Duration,
}

impl LocalConfig {
    pub fn new(local_id: u32, remote_id: u32, listen_addr: impl Into<String>, remote: impl Into<String>) -> LocalConfig {
        LocalConfig {
            local_id,
            remote_id,
            listen_addr: listen_addr.into(),
            remote: remote.into(),
            verbose: false,
            obfuscate: true,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.local_id == 0 {
            bail!("local node id must not be 0");
        }
        if self.remote_id == 0 {
            bail!("remote node id must not be 0");
        }
        if self.local_id == self.remote_id {
            bail!("local and remote node id must differ, both are 0x{:08X}", self.local_id);
        }
        if self.read_timeout.is_zero() {
            bail!("read timeout must be positive");
        }
        Ok(())
    }

    pub fn obfuscator(&self) -> Arc<dyn Obfuscator> {
        create_obfuscator(self.obfuscate)
    }
}

pub struct RemoteConfig {
    pub node_id: u32,
    /// UDP address that all tunnelled datagrams are forwarded to
    pub target: String,
    pub verbose: bool,
    /// Answer pings that are not tunnel traffic, for hosts where the kernel's echo replies are
    ///  switched off
    pub enable_echo: bool,
    pub obfuscate: bool,
    pub read_timeout: Duration,
}

impl RemoteConfig {
    pub fn new(node_id: u32, target: impl Into<String>) -> RemoteConfig {
        RemoteConfig {
            node_id,
            target: target.into(),
            verbose: false,
            enable_echo: false,
            obfuscate: true,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_id == 0 {
            bail!("node id must not be 0");
        }
        if self.read_timeout.is_zero() {
            bail!("read timeout must be positive");
        }
        Ok(())
    }

    pub fn obfuscator(&self) -> Arc<dyn Obfuscator> {
        create_obfuscator(self.obfuscate)
    }
}

fn create_obfuscator(obfuscate: bool) -> Arc<dyn Obfuscator> {
    if obfuscate {
        info!("using keystream obfuscation");
        Arc::new(KeystreamObfuscation)
    }
    else {
        warn!("initializing without obfuscation - tunnel traffic is sent as plain text");
        Arc::new(NoObfuscation)
    }
}
