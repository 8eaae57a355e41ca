//! In-memory doubles for every secondary port, so services can be driven
//! end-to-end without processes, files or a database.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use domain::common::entity::{ForwardId, PeerId};
use domain::common::error::DomainError;
use domain::forward::entity::{ForwardRule, NewForward, PortMapping};
use domain::forward::error::ForwardError;
use domain::peer::entity::{KeyPair, NewPeer, Peer};
use domain::peer::error::PeerError;
use domain::tunnel::peer_block::{
    InterfaceHeader, PeerBlock, append_peer_block, peer_keys, remove_peer_block,
};

use crate::secondary::command_runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::secondary::firewall_backend::{FirewallBackend, PortFuture};
use crate::secondary::key_source::KeyPairSource;
use crate::secondary::peer_config_port::PeerConfigPort;
use crate::secondary::registry_port::RegistryPort;
use crate::secondary::tunnel_daemon_port::{InterfaceStatus, ReloadOutcome, TunnelDaemonPort};

// ── Registry ────────────────────────────────────────────────────────

#[derive(Default)]
struct RegistryState {
    peers: BTreeMap<u64, Peer>,
    forwards: BTreeMap<u64, ForwardRule>,
    next_peer: u64,
    next_forward: u64,
}

/// Registry held in memory with the same uniqueness and cascade rules as
/// the persistent one.
#[derive(Default)]
pub struct InMemoryRegistry {
    state: Mutex<RegistryState>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl RegistryPort for InMemoryRegistry {
    fn list_peers(&self) -> Result<Vec<Peer>, DomainError> {
        Ok(self.lock().peers.values().cloned().collect())
    }

    fn get_peer(&self, id: PeerId) -> Result<Option<Peer>, DomainError> {
        Ok(self.lock().peers.get(&id.0).cloned())
    }

    fn find_peer_by_name(&self, name: &str) -> Result<Option<Peer>, DomainError> {
        Ok(self.lock().peers.values().find(|p| p.name == name).cloned())
    }

    fn insert_peer(&self, peer: NewPeer) -> Result<PeerId, DomainError> {
        let mut state = self.lock();
        for existing in state.peers.values() {
            if existing.name == peer.name {
                return Err(PeerError::DuplicateName { name: peer.name }.into());
            }
            if existing.tunnel_address == peer.tunnel_address {
                return Err(PeerError::DuplicateAddress {
                    address: peer.tunnel_address.to_string(),
                }
                .into());
            }
            if existing.public_key == peer.keys.public_key {
                return Err(PeerError::DuplicateKey.into());
            }
        }
        state.next_peer += 1;
        let id = PeerId(state.next_peer);
        state.peers.insert(id.0, peer.into_peer(id));
        Ok(id)
    }

    fn delete_peer(&self, id: PeerId) -> Result<bool, DomainError> {
        let mut state = self.lock();
        let removed = state.peers.remove(&id.0).is_some();
        if removed {
            state.forwards.retain(|_, f| f.peer_id != id);
        }
        Ok(removed)
    }

    fn list_forwards(&self) -> Result<Vec<ForwardRule>, DomainError> {
        Ok(self.lock().forwards.values().cloned().collect())
    }

    fn get_forward(&self, id: ForwardId) -> Result<Option<ForwardRule>, DomainError> {
        Ok(self.lock().forwards.get(&id.0).cloned())
    }

    fn insert_forward(&self, forward: NewForward) -> Result<ForwardId, DomainError> {
        let mut state = self.lock();
        if !state.peers.contains_key(&forward.peer_id.0) {
            return Err(PeerError::NotFound {
                reference: forward.peer_id.to_string(),
            }
            .into());
        }
        state.next_forward += 1;
        let id = ForwardId(state.next_forward);
        state.forwards.insert(id.0, forward.into_rule(id));
        Ok(id)
    }

    fn delete_forward(&self, id: ForwardId) -> Result<bool, DomainError> {
        Ok(self.lock().forwards.remove(&id.0).is_some())
    }

    fn set_forward_enabled(&self, id: ForwardId, enabled: bool) -> Result<(), DomainError> {
        match self.lock().forwards.get_mut(&id.0) {
            Some(f) => {
                f.enabled = enabled;
                Ok(())
            }
            None => Err(ForwardError::NotFound { id: id.to_string() }.into()),
        }
    }
}

// ── Firewall backend ────────────────────────────────────────────────

/// Backend double keeping a deduplicated live set and counting calls.
#[derive(Default)]
pub struct RecordingBackend {
    live: Mutex<Vec<PortMapping>>,
    pub apply_calls: AtomicU32,
    pub retract_calls: AtomicU32,
    pub reload_calls: AtomicU32,
    pub fail_apply: AtomicBool,
    pub fail_retract: AtomicBool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> Vec<PortMapping> {
        self.live
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl FirewallBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn apply<'a>(&'a self, mapping: &'a PortMapping) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.apply_calls.fetch_add(1, Ordering::Relaxed);
            if self.fail_apply.load(Ordering::Relaxed) {
                return Err(DomainError::Backend(format!("apply {mapping} refused")));
            }
            let mut live = self
                .live
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if !live.contains(mapping) {
                live.push(*mapping);
            }
            Ok(())
        })
    }

    fn retract<'a>(&'a self, mapping: &'a PortMapping) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.retract_calls.fetch_add(1, Ordering::Relaxed);
            if self.fail_retract.load(Ordering::Relaxed) {
                return Err(DomainError::Backend(format!("retract {mapping} refused")));
            }
            self.live
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .retain(|m| m != mapping);
            Ok(())
        })
    }

    fn list(&self) -> PortFuture<'_, Vec<PortMapping>> {
        Box::pin(async move { Ok(self.live()) })
    }

    fn is_configured(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async { true })
    }

    fn reload(&self) -> PortFuture<'_, ()> {
        Box::pin(async move {
            self.reload_calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }
}

// ── Key source ──────────────────────────────────────────────────────

/// Deterministic key source: `private-N` / `public-N`.
#[derive(Default)]
pub struct StaticKeySource {
    counter: AtomicU32,
}

impl StaticKeySource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyPairSource for StaticKeySource {
    fn generate(&self) -> PortFuture<'_, KeyPair> {
        Box::pin(async move {
            let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
            Ok(KeyPair {
                private_key: format!("private-{n}"),
                public_key: format!("public-{n}"),
            })
        })
    }
}

// ── Peer configuration ──────────────────────────────────────────────

/// Configuration file held as a string, using the real block editor.
pub struct MemoryPeerConfig {
    header: InterfaceHeader,
    content: Mutex<Option<String>>,
    pub fail_append: AtomicBool,
}

impl MemoryPeerConfig {
    pub fn new(header: InterfaceHeader) -> Self {
        Self {
            header,
            content: Mutex::new(None),
            fail_append: AtomicBool::new(false),
        }
    }

    /// Current file content; `None` while the file does not exist.
    pub fn content(&self) -> Option<String> {
        self.content
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl PeerConfigPort for MemoryPeerConfig {
    fn append_peer(
        &self,
        name: &str,
        public_key: &str,
        address: Ipv4Addr,
    ) -> Result<(), DomainError> {
        if self.fail_append.load(Ordering::Relaxed) {
            return Err(DomainError::Backend("configuration file not writable".to_string()));
        }
        let mut content = self
            .content
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let block = PeerBlock {
            name,
            public_key,
            address,
        };
        *content = Some(append_peer_block(content.as_deref(), &self.header, &block));
        Ok(())
    }

    fn remove_peer(&self, public_key: &str) -> Result<bool, DomainError> {
        let mut content = self
            .content
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match content.as_deref() {
            Some(text) => {
                *content = Some(remove_peer_block(text, public_key));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn peer_keys(&self) -> Result<Vec<String>, DomainError> {
        Ok(self.content().as_deref().map(peer_keys).unwrap_or_default())
    }
}

// ── Command runner ──────────────────────────────────────────────────

/// Runner answering from a script of `(substring, reply)` rules.
///
/// The first rule whose substring occurs in the rendered command line wins;
/// a `None` reply simulates a timeout. Unmatched commands succeed with empty
/// output. Every call is recorded.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, Option<CommandOutput>)>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, output: CommandOutput) {
        self.rules
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((pattern.to_string(), Some(output)));
    }

    pub fn time_out(&self, pattern: &str) {
        self.rules
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((pattern.to_string(), None));
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Rendered command lines, in call order.
    pub fn commands(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::display).collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> PortFuture<'a, CommandOutput> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(spec.clone());
            let line = spec.display();
            let reply = self
                .rules
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .iter()
                .find(|(pattern, _)| line.contains(pattern.as_str()))
                .map(|(_, reply)| reply.clone());
            match reply {
                Some(Some(output)) => Ok(output),
                Some(None) => Err(DomainError::Timeout(line)),
                None => Ok(CommandOutput::ok("")),
            }
        })
    }
}

// ── Tunnel daemon ───────────────────────────────────────────────────

/// Daemon double: counts reloads and serves a fixed dump.
#[derive(Default)]
pub struct NoopDaemon {
    pub reload_calls: AtomicU32,
    dump: Mutex<Option<String>>,
}

impl NoopDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `dump` from [`TunnelDaemonPort::dump`]; unset means the
    /// daemon is unreachable.
    pub fn set_dump(&self, dump: impl Into<String>) {
        *self
            .dump
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(dump.into());
    }
}

impl TunnelDaemonPort for NoopDaemon {
    fn reload(&self) -> PortFuture<'_, ReloadOutcome> {
        Box::pin(async move {
            self.reload_calls.fetch_add(1, Ordering::Relaxed);
            Ok(ReloadOutcome::Synced {
                interface: "wg0".to_string(),
            })
        })
    }

    fn dump(&self) -> PortFuture<'_, String> {
        Box::pin(async move {
            self.dump
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
                .ok_or_else(|| DomainError::Backend("wg0: no such device".to_string()))
        })
    }

    fn is_installed(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async { true })
    }

    fn interface_status(&self) -> PortFuture<'_, InterfaceStatus> {
        Box::pin(async move {
            Ok(InterfaceStatus {
                interface: "wg0".to_string(),
                running: self
                    .dump
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .is_some(),
                detail: String::new(),
            })
        })
    }
}
