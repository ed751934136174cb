//! Tunnel registry: identifier and port allocation, capacity, teardown

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use revtun_agent::{AgentConfig, TunnelAgent};
use revtun_client::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::id::{generate_id, validate_id};

/// Details handed back to the operator for a new tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewClientInfo {
    pub id: String,
    pub port: u16,
    pub max_conn_count: usize,
}

#[derive(Default)]
struct Registry {
    clients: HashMap<String, Arc<Client>>,
    ports_in_use: BTreeSet<u16>,
    client_ports: HashMap<String, u16>,
}

impl Registry {
    fn free_port(&self, range: &RangeInclusive<u16>) -> Option<u16> {
        range
            .clone()
            .find(|port| !self.ports_in_use.contains(port))
    }

    fn resolve_id(&self, requested: Option<&str>) -> String {
        if let Some(requested) = requested {
            match validate_id(requested) {
                Ok(()) if !self.clients.contains_key(requested) => return requested.to_string(),
                Ok(()) => {
                    debug!(requested_id = %requested, "Tunnel id in use, generating a new one")
                }
                Err(reason) => {
                    debug!(requested_id = %requested, %reason, "Rejected tunnel id, generating a new one")
                }
            }
        }

        let mut rng = rand::thread_rng();
        loop {
            let id = generate_id(&mut rng);
            if !self.clients.contains_key(&id) {
                return id;
            }
        }
    }

    /// Drop the entry for `id` and free its port
    fn release(&mut self, id: &str) -> Option<Arc<Client>> {
        let client = self.clients.remove(id)?;
        if let Some(port) = self.client_ports.remove(id) {
            self.ports_in_use.remove(&port);
        }
        Some(client)
    }
}

struct Inner {
    config: ManagerConfig,
    port_range: RangeInclusive<u16>,
    registry: Mutex<Registry>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove `id` only while it still maps to this exact client
    fn remove_if_current(&self, id: &str, client: &Arc<Client>) -> bool {
        let removed = {
            let mut registry = self.lock();
            match registry.clients.get(id) {
                Some(current) if Arc::ptr_eq(current, client) => registry.release(id),
                _ => None,
            }
        };

        match removed {
            Some(client) => {
                client.close();
                info!(tunnel_id = %id, "Tunnel removed");
                true
            }
            None => false,
        }
    }
}

/// Registry of active tunnels.
///
/// Cloning gives another handle to the same registry.
#[derive(Clone)]
pub struct ClientManager {
    inner: Arc<Inner>,
}

impl ClientManager {
    pub fn new(config: ManagerConfig) -> Result<Self, ManagerError> {
        let port_range = config.port_range()?;
        info!(
            port_start = port_range.start(),
            port_end = port_range.end(),
            max_tcp_sockets = config.max_tcp_sockets,
            "Creating tunnel registry"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                port_range,
                registry: Mutex::new(Registry::default()),
            }),
        })
    }

    /// Create a tunnel, preferring `requested_id` when it is valid and free.
    ///
    /// Fails with [`ManagerError::Capacity`] without side effects when every
    /// port of the pool is taken.
    pub async fn new_client(&self, requested_id: Option<&str>) -> Result<NewClientInfo, ManagerError> {
        let config = &self.inner.config;

        let (id, port, client) = {
            let mut registry = self.inner.lock();

            let port = registry
                .free_port(&self.inner.port_range)
                .ok_or(ManagerError::Capacity {
                    capacity: registry.ports_in_use.len(),
                })?;
            let id = registry.resolve_id(requested_id);

            registry.ports_in_use.insert(port);
            registry.client_ports.insert(id.clone(), port);

            let agent = TunnelAgent::new(AgentConfig {
                tunnel_id: id.clone(),
                bind_addr: config.bind_addr,
                port,
                max_tcp_sockets: config.max_tcp_sockets,
            });
            let client = Client::new(id.clone(), agent, config.client.clone());

            // registered before listening so a concurrent request cannot claim the same id
            registry.clients.insert(id.clone(), Arc::clone(&client));
            (id, port, client)
        };

        if let Err(e) = client.agent().listen().await {
            warn!(tunnel_id = %id, port, error = %e, "Failed to start tunnel listener");
            self.inner.remove_if_current(&id, &client);
            return Err(e.into());
        }

        let registry = Arc::downgrade(&self.inner);
        tokio::spawn(remove_when_closed(registry, id.clone(), client));

        info!(tunnel_id = %id, port, "Tunnel created");

        Ok(NewClientInfo {
            id,
            port,
            max_conn_count: config.max_tcp_sockets,
        })
    }

    /// Remove a tunnel and close it. Returns `false` if it was not registered.
    pub fn remove_client(&self, id: &str) -> bool {
        let removed = self.inner.lock().release(id);

        match removed {
            Some(client) => {
                client.close();
                info!(tunnel_id = %id, "Tunnel removed");
                true
            }
            None => {
                debug!(tunnel_id = %id, "Tunnel already removed");
                false
            }
        }
    }

    /// Close every tunnel
    pub fn shutdown(&self) {
        let clients: Vec<Arc<Client>> = {
            let mut registry = self.inner.lock();
            registry.ports_in_use.clear();
            registry.client_ports.clear();
            registry.clients.drain().map(|(_, client)| client).collect()
        };

        for client in &clients {
            client.close();
        }
        info!(closed = clients.len(), "Tunnel registry shut down");
    }

    pub fn has_client(&self, id: &str) -> bool {
        self.inner.lock().clients.contains_key(id)
    }

    pub fn get_client(&self, id: &str) -> Option<Arc<Client>> {
        self.inner.lock().clients.get(id).cloned()
    }

    /// Port reserved for a tunnel
    pub fn client_port(&self, id: &str) -> Option<u16> {
        self.inner.lock().client_ports.get(id).copied()
    }

    /// Identifiers of all active tunnels, sorted
    pub fn client_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn tunnel_count(&self) -> usize {
        self.inner.lock().clients.len()
    }

    pub fn available_port_count(&self) -> usize {
        let in_use = self.inner.lock().ports_in_use.len();
        self.port_range_len() - in_use
    }

    pub fn port_range(&self) -> RangeInclusive<u16> {
        self.inner.port_range.clone()
    }

    pub fn bind_addr(&self) -> IpAddr {
        self.inner.config.bind_addr
    }

    fn port_range_len(&self) -> usize {
        (*self.inner.port_range.end() - *self.inner.port_range.start()) as usize + 1
    }
}

async fn remove_when_closed(registry: Weak<Inner>, id: String, client: Arc<Client>) {
    client.closed().await;

    if let Some(inner) = registry.upgrade() {
        if inner.remove_if_current(&id, &client) {
            debug!(tunnel_id = %id, "Closed tunnel dropped from registry");
        }
    }
}
