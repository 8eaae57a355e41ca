use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use domain::common::entity::{ForwardId, PeerId, ProtocolSelection};
use domain::common::error::DomainError;
use domain::forward::entity::{ForwardRule, NewForward, PortBounds, PortMapping};
use domain::forward::error::ForwardError;
use domain::peer::entity::{NewPeer, Peer, validate_peer_name};
use domain::peer::error::PeerError;
use domain::tunnel::allocator::{AddressPool, SubnetSummary};
use ports::secondary::firewall_backend::FirewallBackend;
use ports::secondary::key_source::KeyPairSource;
use ports::secondary::peer_config_port::PeerConfigPort;
use ports::secondary::registry_port::RegistryPort;
use ports::secondary::tunnel_daemon_port::{ReloadOutcome, TunnelDaemonPort};
use tokio::sync::Mutex;

use crate::retry::{RetryConfig, retry_with_backoff};

/// Collaborators of the reconciliation service, chosen once at startup.
pub struct GatewayPorts {
    pub registry: Arc<dyn RegistryPort>,
    pub peer_config: Arc<dyn PeerConfigPort>,
    pub firewall: Arc<dyn FirewallBackend>,
    pub daemon: Arc<dyn TunnelDaemonPort>,
    pub keys: Arc<dyn KeyPairSource>,
}

/// Result of a peer deletion.
#[derive(Debug, Clone)]
pub struct DeletedPeer {
    pub peer: Peer,
    pub forwards_removed: usize,
    /// Cleanup steps that failed but did not block the delete.
    pub warnings: Vec<String>,
}

/// The single entry point for mutations.
///
/// Sequences address allocation, configuration-file edits, firewall rules
/// and registry writes for each operation. One global lock is held for the
/// whole of every mutation, so two calls can never allocate from the same
/// snapshot or race on port uniqueness.
pub struct ReconciliationService {
    ports: GatewayPorts,
    pool: AddressPool,
    bounds: PortBounds,
    retry: RetryConfig,
    mutation_lock: Mutex<()>,
}

impl ReconciliationService {
    pub fn new(ports: GatewayPorts, pool: AddressPool, bounds: PortBounds) -> Self {
        Self {
            ports,
            pool,
            bounds,
            retry: RetryConfig::default(),
            mutation_lock: Mutex::new(()),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn pool(&self) -> &AddressPool {
        &self.pool
    }

    // ── Peers ──────────────────────────────────────────────────────

    /// Provision a peer: allocate an address, obtain keys, record it and
    /// append its configuration block.
    ///
    /// If the block append fails the registry row stays behind; deleting
    /// the peer cleans it up.
    pub async fn add_peer(&self, name: &str, description: &str) -> Result<Peer, DomainError> {
        validate_peer_name(name)?;
        let _guard = self.mutation_lock.lock().await;

        if self.ports.registry.find_peer_by_name(name)?.is_some() {
            return Err(PeerError::DuplicateName {
                name: name.to_string(),
            }
            .into());
        }

        let assigned = self.ports.registry.list_tunnel_addresses()?;
        let address = self.pool.next_address(&assigned)?;

        let keys = self.ports.keys.as_ref();
        let keys = retry_with_backoff(&self.single_attempt(), "key generation", move || {
            keys.generate()
        })
        .await?;

        let new_peer = NewPeer {
            name: name.to_string(),
            description: description.to_string(),
            tunnel_address: address,
            keys,
            created_at: now_secs(),
        };
        let id = self.ports.registry.insert_peer(new_peer.clone())?;
        let peer = new_peer.into_peer(id);
        tracing::info!(peer = %peer.name, id = %id, address = %address, "peer registered");

        if let Err(e) = self
            .ports
            .peer_config
            .append_peer(&peer.name, &peer.public_key, address)
        {
            tracing::error!(
                peer = %peer.name,
                id = %id,
                error = %e,
                "configuration block append failed, registry row left in place"
            );
            return Err(e);
        }

        self.reload_daemon().await;
        Ok(peer)
    }

    /// Tear down a peer: retract its forwards, drop its configuration
    /// block, then delete the registry row (cascading to forwards).
    ///
    /// Rule retraction failures are logged and do not stop the delete. A
    /// failure to edit the configuration file aborts before the registry
    /// row is touched, so the delete can be retried.
    pub async fn delete_peer(&self, id: PeerId) -> Result<DeletedPeer, DomainError> {
        let _guard = self.mutation_lock.lock().await;

        let peer = self.require_peer(id)?;
        let forwards = self.ports.registry.list_forwards_for_peer(id)?;
        let mut warnings = Vec::new();

        for rule in &forwards {
            let mapping = rule.mapping();
            if let Err(e) = self.retract_with_retry(&mapping).await {
                tracing::warn!(
                    peer = %peer.name,
                    forward = %rule.id,
                    mapping = %mapping,
                    error = %e,
                    "consistency warning: rule retract failed during peer delete"
                );
                warnings.push(format!("retract {mapping}: {e}"));
            }
        }
        if !forwards.is_empty()
            && let Err(e) = self.reload_firewall().await
        {
            tracing::warn!(
                peer = %peer.name,
                backend = self.ports.firewall.name(),
                error = %e,
                "consistency warning: firewall reload failed during peer delete"
            );
            warnings.push(format!("firewall reload: {e}"));
        }

        let file_existed = self.ports.peer_config.remove_peer(&peer.public_key)?;
        if !file_existed {
            tracing::debug!(peer = %peer.name, "configuration file absent, no block to remove");
        }
        self.reload_daemon().await;

        if !self.ports.registry.delete_peer(id)? {
            tracing::warn!(peer = %peer.name, id = %id, "peer row vanished before delete");
        }
        tracing::info!(
            peer = %peer.name,
            address = %peer.tunnel_address,
            forwards = forwards.len(),
            "peer deleted"
        );

        Ok(DeletedPeer {
            peer,
            forwards_removed: forwards.len(),
            warnings,
        })
    }

    // ── Forwards ───────────────────────────────────────────────────

    /// Forward `public_port` on the gateway to `target_port` on the peer.
    ///
    /// `Both` expands to TCP then UDP. Uniqueness of every expanded
    /// `(public_port, protocol)` is checked before anything is applied, so a
    /// conflict on either protocol creates nothing.
    pub async fn add_forward(
        &self,
        peer_id: PeerId,
        public_port: u16,
        target_port: u16,
        selection: ProtocolSelection,
    ) -> Result<Vec<ForwardRule>, DomainError> {
        self.bounds.validate(public_port, target_port)?;
        let _guard = self.mutation_lock.lock().await;

        let peer = self.require_peer(peer_id)?;
        let protocols = selection.expand();

        for protocol in &protocols {
            if !self
                .ports
                .registry
                .is_port_available(public_port, *protocol, None)?
            {
                return Err(ForwardError::PortInUse {
                    port: public_port,
                    protocol: *protocol,
                }
                .into());
            }
        }

        let mut created = Vec::with_capacity(protocols.len());
        for protocol in protocols {
            let mapping = PortMapping {
                protocol,
                public_port,
                peer_address: peer.tunnel_address,
                target_port,
            };
            self.apply_once(&mapping).await?;

            let new_forward = NewForward {
                peer_id,
                mapping,
                enabled: true,
                created_at: now_secs(),
            };
            let id = self.ports.registry.insert_forward(new_forward.clone())?;
            tracing::info!(peer = %peer.name, forward = %id, mapping = %mapping, "forward added");
            created.push(new_forward.into_rule(id));
        }

        self.reload_firewall().await?;
        Ok(created)
    }

    /// Retract a forward and delete its row. A backend failure keeps the
    /// row so the call can be repeated.
    pub async fn remove_forward(&self, id: ForwardId) -> Result<ForwardRule, DomainError> {
        let _guard = self.mutation_lock.lock().await;

        let rule = self.require_forward(id)?;
        if rule.enabled {
            let mapping = rule.mapping();
            self.retract_with_retry(&mapping).await?;
            self.reload_firewall().await?;
        }
        self.ports.registry.delete_forward(id)?;
        tracing::info!(forward = %id, mapping = %rule.mapping(), "forward removed");
        Ok(rule)
    }

    /// Flip a forward's enabled flag, applying or retracting its rules.
    /// The registry is only updated once the backend accepted the change.
    pub async fn toggle_forward(&self, id: ForwardId) -> Result<ForwardRule, DomainError> {
        let _guard = self.mutation_lock.lock().await;

        let mut rule = self.require_forward(id)?;
        let mapping = rule.mapping();
        let enable = !rule.enabled;

        if enable {
            if !self
                .ports
                .registry
                .is_port_available(rule.public_port, rule.protocol, Some(id))?
            {
                return Err(ForwardError::PortInUse {
                    port: rule.public_port,
                    protocol: rule.protocol,
                }
                .into());
            }
            self.apply_once(&mapping).await?;
        } else {
            self.retract_with_retry(&mapping).await?;
        }
        self.reload_firewall().await?;

        self.ports.registry.set_forward_enabled(id, enable)?;
        rule.enabled = enable;
        tracing::info!(forward = %id, mapping = %mapping, enabled = enable, "forward toggled");
        Ok(rule)
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn list_peers(&self) -> Result<Vec<Peer>, DomainError> {
        self.ports.registry.list_peers()
    }

    pub fn list_forwards(&self) -> Result<Vec<ForwardRule>, DomainError> {
        self.ports.registry.list_forwards()
    }

    /// Resolve a peer by name, falling back to a numeric id.
    pub fn resolve_peer(&self, reference: &str) -> Result<Peer, DomainError> {
        if let Some(peer) = self.ports.registry.find_peer_by_name(reference)? {
            return Ok(peer);
        }
        if let Ok(raw) = reference.parse::<u64>()
            && let Some(peer) = self.ports.registry.get_peer(PeerId(raw))?
        {
            return Ok(peer);
        }
        Err(PeerError::NotFound {
            reference: reference.to_string(),
        }
        .into())
    }

    pub fn subnet_summary(&self) -> Result<SubnetSummary, DomainError> {
        let assigned = self.ports.registry.list_tunnel_addresses()?;
        Ok(self.pool.summary(&assigned))
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn require_peer(&self, id: PeerId) -> Result<Peer, DomainError> {
        self.ports.registry.get_peer(id)?.ok_or_else(|| {
            PeerError::NotFound {
                reference: id.to_string(),
            }
            .into()
        })
    }

    fn require_forward(&self, id: ForwardId) -> Result<ForwardRule, DomainError> {
        self.ports
            .registry
            .get_forward(id)?
            .ok_or_else(|| ForwardError::NotFound { id: id.to_string() }.into())
    }

    fn single_attempt(&self) -> RetryConfig {
        RetryConfig::once(self.retry.timeout)
    }

    /// `apply` is not idempotent at every backend, so it gets a timeout but
    /// no retries.
    async fn apply_once(&self, mapping: &PortMapping) -> Result<(), DomainError> {
        let firewall = self.ports.firewall.as_ref();
        retry_with_backoff(&self.single_attempt(), "firewall apply", move || {
            firewall.apply(mapping)
        })
        .await
        .inspect_err(|e| {
            tracing::error!(
                backend = firewall.name(),
                mapping = %mapping,
                error = %e,
                "firewall apply failed"
            );
        })
    }

    async fn retract_with_retry(&self, mapping: &PortMapping) -> Result<(), DomainError> {
        let firewall = self.ports.firewall.as_ref();
        retry_with_backoff(&self.retry, "firewall retract", move || {
            firewall.retract(mapping)
        })
        .await
    }

    async fn reload_firewall(&self) -> Result<(), DomainError> {
        let firewall = self.ports.firewall.as_ref();
        retry_with_backoff(&self.retry, "firewall reload", move || firewall.reload()).await
    }

    /// The configuration file is authoritative; a daemon that cannot be
    /// resynced picks it up on its next start.
    async fn reload_daemon(&self) {
        let daemon = self.ports.daemon.as_ref();
        match retry_with_backoff(&self.retry, "daemon reload", move || daemon.reload()).await {
            Ok(ReloadOutcome::Synced { interface }) => {
                tracing::debug!(interface = %interface, "tunnel daemon resynced");
            }
            Ok(ReloadOutcome::Degraded { reason }) => {
                tracing::warn!(reason = %reason, "tunnel daemon not resynced, running degraded");
            }
            Err(e) => {
                tracing::warn!(error = %e, "tunnel daemon reload failed");
            }
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
