//! Standby coordinator pg_hba entries
//!
//! Generates the trust block for the standby coordinator's addresses and
//! merges it into segment pg_hba.conf files. The block's exact text is the
//! idempotency key: a file that already contains it is left alone.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use gpmgmt_core::PG_HBA_CONF;
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::conf::write_atomically;
use crate::remote::RemoteShell;

/// Header line opening the block
pub const STANDBY_HBA_HEADER: &str = "# standby coordinator host ip addresses\n";

/// pg_hba errors
#[derive(Error, Debug)]
pub enum HbaError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {0}")]
    Write(String),

    #[error("Address lookup on {host} failed: {message}")]
    AddressLookup { host: String, message: String },

    #[error("Could not resolve local user: {0}")]
    Identity(String),

    #[error("Invalid encoded entries: {0}")]
    InvalidEncoding(String),
}

pub type Result<T> = std::result::Result<T, HbaError>;

/// Header plus one trust line per standby address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgHbaBlock(String);

impl PgHbaBlock {
    /// Format the block for `role` in the given address order
    pub fn for_addresses<S: AsRef<str>>(role: &str, addresses: &[S]) -> Self {
        let mut text = String::from(STANDBY_HBA_HEADER);
        for addr in addresses {
            text.push_str(&format!("host\t{role}\t{role}\t{}/32\ttrust\n", addr.as_ref()));
        }
        Self(text)
    }

    /// Wrap already-formatted block text
    pub fn from_text(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `content` already holds this block verbatim
    pub fn is_contained_in(&self, content: &str) -> bool {
        content.contains(&self.0)
    }

    /// Encoding used to pass the block on a remote command line
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0.as_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| HbaError::InvalidEncoding(e.to_string()))?;
        let text = String::from_utf8(bytes).map_err(|e| HbaError::InvalidEncoding(e.to_string()))?;
        Ok(Self(text))
    }
}

impl fmt::Display for PgHbaBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lists a host's network addresses
#[async_trait]
pub trait AddressLister: Send + Sync {
    async fn list_addrs(&self, host: &str) -> Result<Vec<String>>;
}

/// Resolves the database role entries are written for
pub trait IdentityResolver: Send + Sync {
    fn local_user(&self) -> Result<String>;
}

/// Build the block for `standby_host`
pub async fn standby_pg_hba_block(
    standby_host: &str,
    lister: &dyn AddressLister,
    identity: &dyn IdentityResolver,
) -> Result<PgHbaBlock> {
    let role = identity.local_user()?;
    let addresses = lister.list_addrs(standby_host).await?;
    debug!(
        host = %standby_host,
        role = %role,
        addresses = ?addresses,
        "Building standby pg_hba entries"
    );
    Ok(PgHbaBlock::for_addresses(&role, &addresses))
}

/// Non-loopback IPv4 addresses of the local host, in interface order
#[derive(Debug, Clone, Default)]
pub struct LocalAddressLister;

#[async_trait]
impl AddressLister for LocalAddressLister {
    async fn list_addrs(&self, host: &str) -> Result<Vec<String>> {
        let interfaces =
            local_ip_address::list_afinet_netifas().map_err(|e| HbaError::AddressLookup {
                host: host.to_string(),
                message: e.to_string(),
            })?;
        let ips: Vec<IpAddr> = interfaces.into_iter().map(|(_, ip)| ip).collect();
        Ok(ipv4_without_loopback(ips.iter().copied()))
    }
}

/// Lists a remote host's addresses with `$GPHOME/libexec/ifaddrs`
///
/// Only IPv4 addresses are returned, since each becomes a `/32` entry.
/// IPv6 lines reported by `ifaddrs` are dropped, and an address reported
/// on several interfaces is returned once, in first-reported order.
pub struct RemoteAddressLister {
    shell: Arc<dyn RemoteShell>,
    gphome: PathBuf,
}

impl RemoteAddressLister {
    pub fn new(shell: Arc<dyn RemoteShell>, gphome: impl Into<PathBuf>) -> Self {
        Self {
            shell,
            gphome: gphome.into(),
        }
    }
}

#[async_trait]
impl AddressLister for RemoteAddressLister {
    async fn list_addrs(&self, host: &str) -> Result<Vec<String>> {
        let program = self.gphome.join("libexec").join("ifaddrs");
        let output = self
            .shell
            .run(host, &program.display().to_string(), &["--no-loopback".to_string()])
            .await
            .map_err(|e| HbaError::AddressLookup {
                host: host.to_string(),
                message: e.to_string(),
            })?;

        let ips: Vec<IpAddr> = output
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                match line.parse::<IpAddr>() {
                    Ok(ip) => Some(ip),
                    Err(_) => {
                        if !line.is_empty() {
                            debug!(host = %host, line = %line, "Skipping unparseable address");
                        }
                        None
                    }
                }
            })
            .collect();
        Ok(ipv4_without_loopback(ips.into_iter()))
    }
}

/// Lists locally when the standby is this host, otherwise over the shell
pub struct HostAddressLister {
    local: LocalAddressLister,
    remote: RemoteAddressLister,
    local_names: HashSet<String>,
}

impl HostAddressLister {
    pub fn new(remote: RemoteAddressLister) -> Self {
        let mut local_names: HashSet<String> = ["localhost".to_string()].into_iter().collect();
        if let Ok(name) = hostname::get() {
            local_names.insert(name.to_string_lossy().to_string());
        }
        Self {
            local: LocalAddressLister,
            remote,
            local_names,
        }
    }

    pub fn is_local(&self, host: &str) -> bool {
        self.local_names.contains(host)
    }
}

#[async_trait]
impl AddressLister for HostAddressLister {
    async fn list_addrs(&self, host: &str) -> Result<Vec<String>> {
        if self.is_local(host) {
            self.local.list_addrs(host).await
        } else {
            self.remote.list_addrs(host).await
        }
    }
}

/// Role named by the invoking OS user
#[derive(Debug, Clone, Default)]
pub struct CurrentUserResolver;

impl IdentityResolver for CurrentUserResolver {
    fn local_user(&self) -> Result<String> {
        ["USER", "LOGNAME"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
            .ok_or_else(|| HbaError::Identity("neither USER nor LOGNAME is set".to_string()))
    }
}

/// Distinct non-loopback IPv4 addresses in input order
fn ipv4_without_loopback(ips: impl Iterator<Item = IpAddr>) -> Vec<String> {
    let mut seen: HashSet<Ipv4Addr> = HashSet::new();
    ips.filter_map(|ip| match ip {
        IpAddr::V4(v4) if !v4.is_loopback() => Some(v4),
        _ => None,
    })
    .filter(|v4| seen.insert(*v4))
    .map(|v4| v4.to_string())
    .collect()
}

fn hba_path(data_dir: &Path) -> PathBuf {
    data_dir.join(PG_HBA_CONF)
}

/// Directories needing the block, each with its new content, in input order
fn compute_updates<P: AsRef<Path>>(
    block: &PgHbaBlock,
    data_dirs: &[P],
) -> Result<Vec<(PathBuf, String)>> {
    let mut updates = Vec::with_capacity(data_dirs.len());
    for dir in data_dirs {
        let path = hba_path(dir.as_ref());
        let content = std::fs::read_to_string(&path).map_err(|e| HbaError::Read {
            path: path.clone(),
            source: e,
        })?;

        if block.is_contained_in(&content) {
            debug!(path = %path.display(), "pg_hba.conf already has standby entries");
            continue;
        }

        updates.push((dir.as_ref().to_path_buf(), content + block.as_str()));
    }
    Ok(updates)
}

/// New content of every pg_hba.conf that lacks the block.
///
/// Directories whose file already contains the block are left out of the
/// result entirely.
pub fn update_pg_hba<P: AsRef<Path>>(block: &PgHbaBlock, data_dirs: &[P]) -> Result<Vec<String>> {
    Ok(compute_updates(block, data_dirs)?
        .into_iter()
        .map(|(_, content)| content)
        .collect())
}

/// Merge the block into each pg_hba.conf that lacks it and write it back.
///
/// Returns the data directories whose file was rewritten.
pub fn apply_pg_hba<P: AsRef<Path>>(block: &PgHbaBlock, data_dirs: &[P]) -> Result<Vec<PathBuf>> {
    let updates = compute_updates(block, data_dirs)?;
    let mut written = Vec::with_capacity(updates.len());
    for (dir, content) in updates {
        let path = hba_path(&dir);
        write_atomically(&path, &content).map_err(|e| HbaError::Write(e.to_string()))?;
        info!(path = %path.display(), "Added standby entries to pg_hba.conf");
        written.push(dir);
    }
    Ok(written)
}
