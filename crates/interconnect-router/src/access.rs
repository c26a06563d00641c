//! Router access points
//!
//! A router access point publishes the router's link listeners (one per
//! role) on a bind host with a TLS credential. Interior routers also open
//! automesh connectors to every target group on the inter-router role.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::config::{
    configure_ssl_profile, is_not_protected_listener, Connector, Listener, Role, RouterConfig,
    RouterOptions,
};
use crate::diff::listeners_difference;
use crate::update::ConfigUpdate;

const SASL_EXTERNAL: &str = "EXTERNAL";

/// Cost of automesh connectors
const AUTOMESH_COST: u32 = 1;

/// One role served by an access point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRole {
    /// Link role
    pub role: Role,
    /// Listener port
    pub port: u16,
}

/// A router access point
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterAccess {
    /// Access point name, prefix of its listener names
    pub name: String,
    /// Roles served
    pub roles: Vec<AccessRole>,
    /// Secret with the server certificate
    pub tls_credentials: String,
    /// Host the listeners bind to
    pub bind_host: String,
}

/// Access points of one site by key
#[derive(Debug, Clone, Default)]
pub struct RouterAccessMap(pub BTreeMap<String, RouterAccess>);

impl RouterAccessMap {
    /// Listeners and automesh connectors for every access point
    pub fn desired_config(
        &self,
        target_groups: &[String],
        profile_path: &str,
        options: &RouterOptions,
    ) -> RouterAccessConfig {
        let mut config = RouterAccessConfig {
            profile_path: profile_path.to_string(),
            ..Default::default()
        };
        for access in self.0.values() {
            for role in &access.roles {
                let name = format!("{}-{}", access.name, role.role.as_str());
                let mut listener = Listener {
                    name: name.clone(),
                    role: Some(role.role),
                    host: access.bind_host.clone(),
                    port: role.port,
                    ssl_profile: access.tls_credentials.clone(),
                    sasl_mechanisms: SASL_EXTERNAL.to_string(),
                    authenticate_peer: true,
                    max_frame_size: options.max_frame_size,
                    max_session_frames: options.max_session_frames,
                    ..Default::default()
                };
                if options.disable_mutual_tls {
                    listener.sasl_mechanisms.clear();
                    listener.authenticate_peer = false;
                }
                config.listeners.insert(name, listener);

                if role.role == Role::InterRouter {
                    for group in target_groups {
                        config.connectors.push(Connector {
                            name: group.clone(),
                            role: Some(Role::InterRouter),
                            host: group.clone(),
                            port: role.port.to_string(),
                            cost: AUTOMESH_COST,
                            ssl_profile: access.tls_credentials.clone(),
                            ..Default::default()
                        });
                    }
                }
            }
        }
        config
    }
}

/// Router configuration contributed by the access points
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterAccessConfig {
    listeners: BTreeMap<String, Listener>,
    connectors: Vec<Connector>,
    profile_path: String,
    contributed: BTreeSet<String>,
}

impl RouterAccessConfig {
    /// Desired listeners by name
    pub fn listeners(&self) -> &BTreeMap<String, Listener> {
        &self.listeners
    }

    /// Desired automesh connectors
    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    /// Take over the desired state of a newer rendering
    ///
    /// Connectors contributed earlier are remembered so the next apply can
    /// remove the ones no longer desired.
    pub fn update(&mut self, desired: RouterAccessConfig) {
        self.listeners = desired.listeners;
        self.connectors = desired.connectors;
        self.profile_path = desired.profile_path;
    }

    fn ensure_profile(&self, config: &mut RouterConfig, name: &str) -> bool {
        if name.is_empty() || config.ssl_profiles.contains_key(name) {
            return false;
        }
        config.add_ssl_profile(configure_ssl_profile(name, &self.profile_path, true))
    }
}

impl ConfigUpdate for RouterAccessConfig {
    fn apply(&mut self, config: &mut RouterConfig) -> bool {
        let mut changed = false;
        for listener in self.listeners.values() {
            if self.ensure_profile(config, &listener.ssl_profile) {
                changed = true;
            }
        }
        for connector in &self.connectors {
            if self.ensure_profile(config, &connector.ssl_profile) {
                changed = true;
            }
        }

        let actual = config.matching_listeners(is_not_protected_listener);
        let diff = listeners_difference(&actual, &self.listeners);
        if !diff.is_empty() {
            diff.log_summary();
        }
        for listener in &diff.deleted {
            if config.remove_listener(&listener.name).is_some() {
                changed = true;
            }
        }
        for listener in diff.added {
            if config.add_listener(listener) {
                changed = true;
            }
        }

        let desired: BTreeSet<String> = self.connectors.iter().map(|c| c.name.clone()).collect();
        for stale in self.contributed.difference(&desired) {
            if config.remove_connector(stale).is_some() {
                info!(connector = %stale, "Removed automesh connector");
                changed = true;
            }
        }
        for connector in &self.connectors {
            if config.add_connector(connector.clone()) {
                debug!(connector = %connector.name, host = %connector.host, "Added automesh connector");
                changed = true;
            }
        }
        self.contributed = desired;
        changed
    }
}
