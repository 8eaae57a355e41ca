use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use domain::common::error::DomainError;
use domain::tunnel::peer_block::{
    InterfaceHeader, PeerBlock, append_peer_block, peer_keys, remove_peer_block,
};
use ports::secondary::peer_config_port::PeerConfigPort;

use crate::fs_util::{atomic_write, read_optional};

/// The tunnel daemon's configuration file (`<config_dir>/<iface>.conf`).
///
/// Each edit reads the whole file, rewrites it in memory and swaps it in
/// with an atomic rename.
pub struct WgConfigFile {
    path: PathBuf,
    header: InterfaceHeader,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl WgConfigFile {
    pub fn new(path: PathBuf, header: InterfaceHeader) -> Self {
        Self {
            path,
            header,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<String>, DomainError> {
        read_optional(&self.path)
            .map_err(|e| DomainError::Backend(format!("reading {}: {e}", self.path.display())))
    }

    fn create_parent(&self) -> Result<(), DomainError> {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
                .map_err(|e| DomainError::Backend(format!("creating {}: {e}", dir.display()))),
            _ => Ok(()),
        }
    }

    fn write(&self, content: &str) -> Result<(), DomainError> {
        atomic_write(&self.path, content)
            .map_err(|e| DomainError::Backend(format!("writing {}: {e}", self.path.display())))
    }
}

impl PeerConfigPort for WgConfigFile {
    fn append_peer(
        &self,
        name: &str,
        public_key: &str,
        address: Ipv4Addr,
    ) -> Result<(), DomainError> {
        let _lock = self
            .write_lock
            .lock()
            .map_err(|e| DomainError::Backend(format!("lock poisoned: {e}")))?;

        let existing = self.read()?;
        if existing.is_none() {
            self.create_parent()?;
            tracing::info!(path = %self.path.display(), "creating tunnel configuration file");
        }
        let block = PeerBlock {
            name,
            public_key,
            address,
        };
        self.write(&append_peer_block(existing.as_deref(), &self.header, &block))?;
        tracing::debug!(peer = name, address = %address, "peer block appended");
        Ok(())
    }

    fn remove_peer(&self, public_key: &str) -> Result<bool, DomainError> {
        let _lock = self
            .write_lock
            .lock()
            .map_err(|e| DomainError::Backend(format!("lock poisoned: {e}")))?;

        let Some(existing) = self.read()? else {
            return Ok(false);
        };
        let updated = remove_peer_block(&existing, public_key);
        if updated != existing {
            self.write(&updated)?;
            tracing::debug!(path = %self.path.display(), "peer block removed");
        }
        Ok(true)
    }

    fn peer_keys(&self) -> Result<Vec<String>, DomainError> {
        Ok(self.read()?.as_deref().map(peer_keys).unwrap_or_default())
    }
}
