//! Service bindings of one site
//!
//! A listener intent exposes a routing address on a router port; a
//! connector intent forwards a routing address to a host and port. The
//! [`Bindings`] table turns the current intents into the router's TCP bridge
//! endpoints and the SSL profiles they need.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use interconnect_common::Result;

use crate::config::{configure_ssl_profile, ssl_profile_name, BridgeConfig, RouterConfig, SslProfile, TcpEndpoint};
use crate::ports::PortMapping;
use crate::update::ConfigUpdate;

/// Host router-side bridge listeners bind to
const LISTENER_BIND_HOST: &str = "0.0.0.0";

/// Expose a routing address inside the site
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerIntent {
    /// Listener name, also the port allocation key
    pub name: String,
    /// Routing address
    pub routing_key: String,
    /// Secret with the server certificate, empty for plain TCP
    pub tls_credentials: String,
    /// Connection observer mode
    pub observer: String,
}

/// Forward a routing address to a workload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorIntent {
    /// Connector name
    pub name: String,
    /// Routing address
    pub routing_key: String,
    /// Target host
    pub host: String,
    /// Target port
    pub port: u16,
    /// Secret with the CA (and client certificate), empty for plain TCP
    pub tls_credentials: String,
    /// Present the client certificate from `tls_credentials`
    pub use_client_cert: bool,
    /// Verify the target hostname; unset means true
    pub verify_hostname: Option<bool>,
    /// Connection observer mode
    pub observer: String,
}

impl ConnectorIntent {
    fn ssl_profile(&self) -> Option<String> {
        if self.tls_credentials.is_empty() {
            None
        } else {
            Some(ssl_profile_name(&self.tls_credentials, self.use_client_cert))
        }
    }
}

/// The listener and connector intents of one site
#[derive(Debug, Clone)]
pub struct Bindings {
    site_id: String,
    profile_path: String,
    listeners: BTreeMap<String, ListenerIntent>,
    connectors: BTreeMap<String, ConnectorIntent>,
    mapping: PortMapping,
}

impl Bindings {
    /// Empty bindings using `mapping` for listener ports
    pub fn new(site_id: &str, profile_path: &str, mapping: PortMapping) -> Self {
        Self {
            site_id: site_id.to_string(),
            profile_path: profile_path.to_string(),
            listeners: BTreeMap::new(),
            connectors: BTreeMap::new(),
            mapping,
        }
    }

    /// Current listener intent by name
    pub fn listener(&self, name: &str) -> Option<&ListenerIntent> {
        self.listeners.get(name)
    }

    /// Current connector intent by name
    pub fn connector(&self, name: &str) -> Option<&ConnectorIntent> {
        self.connectors.get(name)
    }

    /// The router port allocated to a listener
    pub fn listener_port(&self, name: &str) -> Option<u16> {
        self.mapping.port_for_key(name)
    }

    /// Record a listener intent, or remove it with `None`
    ///
    /// A new listener gets a router port immediately; a removed one gives
    /// its port back. Returns whether the router config needs updating.
    pub fn update_listener(&mut self, name: &str, intent: Option<ListenerIntent>) -> Result<bool> {
        let Some(intent) = intent else {
            if self.listeners.remove(name).is_none() {
                return Ok(false);
            }
            self.mapping.release_port_for_key(name);
            return Ok(true);
        };
        let port = self.mapping.get_port_for_key(name)?;
        if self.listeners.get(name) == Some(&intent) {
            return Ok(false);
        }
        debug!(listener = %name, port, "Listener binding updated");
        self.listeners.insert(name.to_string(), intent);
        Ok(true)
    }

    /// Record a connector intent, or remove it with `None`
    pub fn update_connector(&mut self, name: &str, intent: Option<ConnectorIntent>) -> bool {
        match intent {
            None => self.connectors.remove(name).is_some(),
            Some(intent) if self.connectors.get(name) == Some(&intent) => false,
            Some(intent) => {
                debug!(connector = %name, host = %intent.host, "Connector binding updated");
                self.connectors.insert(name.to_string(), intent);
                true
            }
        }
    }

    /// Bridge endpoints for the current intents
    pub fn to_bridge_config(&self) -> BridgeConfig {
        let mut bridges = BridgeConfig::default();
        for connector in self.connectors.values() {
            bridges.add_tcp_connector(TcpEndpoint {
                name: format!("{}@{}", connector.name, connector.host),
                host: connector.host.clone(),
                port: connector.port.to_string(),
                address: connector.routing_key.clone(),
                site_id: self.site_id.clone(),
                ssl_profile: connector.ssl_profile().unwrap_or_default(),
                observer: connector.observer.clone(),
                verify_hostname: connector.verify_hostname,
                ..Default::default()
            });
        }
        for listener in self.listeners.values() {
            let Some(port) = self.mapping.port_for_key(&listener.name) else {
                warn!(listener = %listener.name, "No router port allocated for listener");
                continue;
            };
            bridges.add_tcp_listener(TcpEndpoint {
                name: listener.name.clone(),
                host: LISTENER_BIND_HOST.to_string(),
                port: port.to_string(),
                address: listener.routing_key.clone(),
                site_id: self.site_id.clone(),
                ssl_profile: listener.tls_credentials.clone(),
                observer: listener.observer.clone(),
                ..Default::default()
            });
        }
        bridges
    }

    fn desired_ssl_profiles(&self) -> BTreeMap<String, SslProfile> {
        let mut profiles = BTreeMap::new();
        for connector in self.connectors.values() {
            if let Some(name) = connector.ssl_profile() {
                profiles.entry(name.clone()).or_insert_with(|| {
                    configure_ssl_profile(&name, &self.profile_path, connector.use_client_cert)
                });
            }
        }
        for listener in self.listeners.values() {
            if !listener.tls_credentials.is_empty() {
                profiles
                    .entry(listener.tls_credentials.clone())
                    .or_insert_with(|| {
                        configure_ssl_profile(&listener.tls_credentials, &self.profile_path, true)
                    });
            }
        }
        profiles
    }

    /// Add the SSL profiles the intents need
    ///
    /// Ordinals already present on a profile are kept.
    pub fn add_ssl_profiles(&self, config: &mut RouterConfig) -> bool {
        let mut changed = false;
        for (name, mut profile) in self.desired_ssl_profiles() {
            if let Some(existing) = config.ssl_profiles.get(&name) {
                profile.ordinal = existing.ordinal;
                profile.oldest_valid_ordinal = existing.oldest_valid_ordinal;
            }
            if config.add_ssl_profile(profile) {
                changed = true;
            }
        }
        changed
    }
}

impl ConfigUpdate for Bindings {
    fn apply(&mut self, config: &mut RouterConfig) -> bool {
        let profiles = self.add_ssl_profiles(config);
        let bridges = config.update_bridge_config(self.to_bridge_config());
        let pruned = config.remove_unreferenced_ssl_profiles();
        profiles || bridges || pruned
    }
}
