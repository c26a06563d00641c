//! Router configuration model
//!
//! [`RouterConfig`] is the aggregate root for everything the router is told
//! to do: its identity, SSL profiles, control listeners and connectors,
//! address distribution, log levels and TCP bridge endpoints. Every `add_*`
//! mutator reports whether the entity actually changed so callers can skip
//! persistence writes when nothing moved.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Listener names owned by the router deployment itself
const PROTECTED_LISTENERS: [&str; 3] = ["@9090", "amqp", "amqps"];

/// Log module used when none is given
const DEFAULT_LOG_MODULE: &str = "DEFAULT";

/// Suffix qualifying a CA-only profile backed by the same secret
pub const CA_ONLY_PROFILE_SUFFIX: &str = "-profile";

pub(crate) fn is_zero<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// Role of a router listener or connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Link between interior routers
    #[serde(rename = "inter-router")]
    InterRouter,
    /// Link from an edge router to an interior router
    #[serde(rename = "edge")]
    Edge,
    /// Client (non-link) connection
    #[serde(rename = "normal")]
    Normal,
}

impl Role {
    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::InterRouter => "inter-router",
            Role::Edge => "edge",
            Role::Normal => "normal",
        }
    }

    /// Interpret a role name, defaulting to inter-router for anything unknown
    pub fn parse(name: &str) -> Self {
        match name {
            "edge" => Role::Edge,
            "normal" => Role::Normal,
            _ => Role::InterRouter,
        }
    }

    /// True for roles that carry router-to-router links
    pub fn is_link(&self) -> bool {
        matches!(self, Role::InterRouter | Role::Edge)
    }
}

/// Operating mode of a router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Interior router, participates in the inter-router network
    #[default]
    Interior,
    /// Edge router, attaches to one interior router
    Edge,
}

/// Router identity and global settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterMetadata {
    /// Router id
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Operating mode
    pub mode: Mode,
    /// Hello max age, rendered as a decimal string
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hello_max_age_seconds: String,
    /// Data connection count, rendered as a decimal string
    #[serde(skip_serializing_if = "String::is_empty")]
    pub data_connection_count: String,
    /// Opaque site metadata (JSON encoded [`SiteMetadata`])
    #[serde(skip_serializing_if = "String::is_empty")]
    pub metadata: String,
}

/// Site identity embedded in the router metadata string
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteMetadata {
    /// Site id
    pub id: String,
    /// Control plane version
    pub version: String,
}

impl SiteMetadata {
    /// Encode as the router's metadata string
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode from a metadata string; malformed input yields the default
    pub fn decode(metadata: &str) -> Self {
        match serde_json::from_str(metadata) {
            Ok(site) => site,
            Err(e) => {
                if !metadata.is_empty() {
                    warn!(error = %e, "Invalid site metadata on router config");
                }
                Self::default()
            }
        }
    }
}

/// A named bundle of CA/cert/key file references
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SslProfile {
    /// Profile name
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Client/server certificate path (empty for CA-only profiles)
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cert_file: String,
    /// Private key path (empty for CA-only profiles)
    #[serde(skip_serializing_if = "String::is_empty")]
    pub private_key_file: String,
    /// CA certificate path
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ca_cert_file: String,
    /// Generation of the certificate material; never decreases
    #[serde(skip_serializing_if = "is_zero")]
    pub ordinal: u64,
    /// Oldest generation the router may still accept from peers
    #[serde(skip_serializing_if = "is_zero")]
    pub oldest_valid_ordinal: u64,
}

impl SslProfile {
    /// True when the profile only carries a CA certificate
    pub fn is_ca_only(&self) -> bool {
        self.cert_file.is_empty() && self.private_key_file.is_empty()
    }
}

/// Log level for one router module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Module name, `DEFAULT` for the catch-all
    pub module: String,
    /// Enabled level expression, e.g. `info+`
    pub enable: String,
}

/// A router control listener
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Listener {
    /// Listener name; defaults to `host@port`
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Listener role
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Bind host
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Accept route-container connections
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub route_container: bool,
    /// Serve HTTP
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub http: bool,
    /// Link cost; 0 leaves the router default
    #[serde(skip_serializing_if = "is_zero")]
    pub cost: u32,
    /// SSL profile name
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ssl_profile: String,
    /// SASL mechanisms
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sasl_mechanisms: String,
    /// Require peer authentication
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub authenticate_peer: bool,
    /// Link capacity; 0 leaves the router default
    #[serde(skip_serializing_if = "is_zero")]
    pub link_capacity: u32,
    /// HTTP root directory
    #[serde(skip_serializing_if = "String::is_empty")]
    pub http_root_dir: String,
    /// Accept websockets
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub websockets: bool,
    /// Serve health probes
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub healthz: bool,
    /// Serve metrics
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub metrics: bool,
    /// Max AMQP frame size; 0 leaves the router default
    #[serde(skip_serializing_if = "is_zero")]
    pub max_frame_size: u32,
    /// Max AMQP session frames; 0 leaves the router default
    #[serde(skip_serializing_if = "is_zero")]
    pub max_session_frames: u32,
}

/// A router control connector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Connector {
    /// Connector name
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Connector role
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Target host
    pub host: String,
    /// Target port (may be a service name)
    pub port: String,
    /// Route-container connection
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub route_container: bool,
    /// Link cost; 0 leaves the router default
    #[serde(skip_serializing_if = "is_zero")]
    pub cost: u32,
    /// Verify the peer hostname
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub verify_hostname: bool,
    /// SSL profile name
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ssl_profile: String,
    /// Link capacity; 0 leaves the router default
    #[serde(skip_serializing_if = "is_zero")]
    pub link_capacity: u32,
    /// Max AMQP frame size
    #[serde(skip_serializing_if = "is_zero")]
    pub max_frame_size: u32,
    /// Max AMQP session frames
    #[serde(skip_serializing_if = "is_zero")]
    pub max_session_frames: u32,
}

impl Connector {
    /// True for inter-router and edge connectors
    pub fn is_link_connector(&self) -> bool {
        self.role.is_some_and(|r| r.is_link())
    }
}

/// Address distribution: balanced
pub const DISTRIBUTION_BALANCED: &str = "balanced";
/// Address distribution: multicast
pub const DISTRIBUTION_MULTICAST: &str = "multicast";
/// Address distribution: closest
pub const DISTRIBUTION_CLOSEST: &str = "closest";

/// Distribution policy for an address prefix
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    /// Address prefix
    #[serde(skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    /// Distribution policy
    #[serde(skip_serializing_if = "String::is_empty")]
    pub distribution: String,
}

/// A TCP bridge endpoint mapping a socket to a routing address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TcpEndpoint {
    /// Endpoint name
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Host to bind (listener) or connect to (connector)
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Port, kept as a string as the router accepts service names
    #[serde(skip_serializing_if = "String::is_empty")]
    pub port: String,
    /// Logical routing address
    #[serde(skip_serializing_if = "String::is_empty")]
    pub address: String,
    /// Owning site id
    #[serde(skip_serializing_if = "String::is_empty")]
    pub site_id: String,
    /// SSL profile name
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ssl_profile: String,
    /// Connection observer mode; empty means `auto`
    #[serde(skip_serializing_if = "String::is_empty")]
    pub observer: String,
    /// Verify the peer hostname; unset means true
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_hostname: Option<bool>,
    /// Process (pod) identity of the target
    #[serde(skip_serializing_if = "String::is_empty")]
    pub process_id: String,
}

/// TCP endpoints keyed by name
pub type TcpEndpointMap = BTreeMap<String, TcpEndpoint>;

/// TCP bridge endpoints of a router
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Listening endpoints
    pub tcp_listeners: TcpEndpointMap,
    /// Connecting endpoints
    pub tcp_connectors: TcpEndpointMap,
}

impl BridgeConfig {
    /// Insert or replace a TCP listener, reporting whether it changed
    pub fn add_tcp_listener(&mut self, endpoint: TcpEndpoint) -> bool {
        upsert(&mut self.tcp_listeners, endpoint.name.clone(), endpoint)
    }

    /// Insert or replace a TCP connector, reporting whether it changed
    pub fn add_tcp_connector(&mut self, endpoint: TcpEndpoint) -> bool {
        upsert(&mut self.tcp_connectors, endpoint.name.clone(), endpoint)
    }

    /// Every SSL profile referenced by a bridge endpoint
    pub fn ssl_profile_names(&self) -> BTreeSet<&str> {
        self.tcp_listeners
            .values()
            .chain(self.tcp_connectors.values())
            .map(|e| e.ssl_profile.as_str())
            .filter(|p| !p.is_empty())
            .collect()
    }
}

/// Descriptive site information published to the router
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Site name
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Location label
    #[serde(skip_serializing_if = "String::is_empty")]
    pub location: String,
    /// Infrastructure provider
    #[serde(skip_serializing_if = "String::is_empty")]
    pub provider: String,
    /// Platform (kubernetes, podman, ...)
    #[serde(skip_serializing_if = "String::is_empty")]
    pub platform: String,
    /// Namespace of the site
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Control plane version
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// Tunables applied to the router's own link listeners
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterOptions {
    /// Max AMQP frame size (0 for router default)
    pub max_frame_size: u32,
    /// Max AMQP session frames (0 for router default)
    pub max_session_frames: u32,
    /// Accept links without client certificates
    pub disable_mutual_tls: bool,
}

/// The full configuration of one router
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterConfig {
    /// Router identity
    pub metadata: RouterMetadata,
    /// SSL profiles by name
    pub ssl_profiles: BTreeMap<String, SslProfile>,
    /// Control listeners by name
    pub listeners: BTreeMap<String, Listener>,
    /// Control connectors by name
    pub connectors: BTreeMap<String, Connector>,
    /// Address policies by prefix
    pub addresses: BTreeMap<String, Address>,
    /// Log levels by module
    pub log_config: BTreeMap<String, LogConfig>,
    /// Optional site description
    pub site_config: Option<SiteConfig>,
    /// TCP bridge endpoints
    pub bridges: BridgeConfig,
}

fn upsert<T: PartialEq>(map: &mut BTreeMap<String, T>, key: String, value: T) -> bool {
    if map.get(&key) == Some(&value) {
        return false;
    }
    map.insert(key, value);
    true
}

impl RouterConfig {
    /// Create the configuration of a fresh router
    pub fn initial(id: &str, site_id: &str, version: &str, edge: bool, hello_age: u32) -> Self {
        let metadata = SiteMetadata {
            id: site_id.to_string(),
            version: version.to_string(),
        };
        Self {
            metadata: RouterMetadata {
                id: id.to_string(),
                mode: if edge { Mode::Edge } else { Mode::Interior },
                hello_max_age_seconds: hello_age.to_string(),
                data_connection_count: String::new(),
                metadata: metadata.encode(),
            },
            ..Default::default()
        }
    }

    /// True if the router runs in edge mode
    pub fn is_edge(&self) -> bool {
        self.metadata.mode == Mode::Edge
    }

    /// Decoded site metadata
    pub fn site_metadata(&self) -> SiteMetadata {
        SiteMetadata::decode(&self.metadata.metadata)
    }

    /// Replace the site metadata
    pub fn set_site_metadata(&mut self, site: &SiteMetadata) {
        self.metadata.metadata = site.encode();
    }

    /// Add the HTTP listener serving health probes and metrics
    pub fn add_health_and_metrics_listener(&mut self, port: u16) -> bool {
        self.add_listener(Listener {
            port,
            role: Some(Role::Normal),
            http: true,
            http_root_dir: "disabled".to_string(),
            healthz: true,
            metrics: true,
            ..Default::default()
        })
    }

    /// Insert or replace a listener; an unnamed listener is named `host@port`
    pub fn add_listener(&mut self, mut listener: Listener) -> bool {
        if listener.name.is_empty() {
            listener.name = format!("{}@{}", listener.host, listener.port);
        }
        upsert(&mut self.listeners, listener.name.clone(), listener)
    }

    /// Remove a listener by name
    pub fn remove_listener(&mut self, name: &str) -> Option<Listener> {
        self.listeners.remove(name)
    }

    /// Insert or replace a connector
    pub fn add_connector(&mut self, connector: Connector) -> bool {
        upsert(&mut self.connectors, connector.name.clone(), connector)
    }

    /// Remove a connector by name
    pub fn remove_connector(&mut self, name: &str) -> Option<Connector> {
        self.connectors.remove(name)
    }

    /// Insert or replace an SSL profile
    pub fn add_ssl_profile(&mut self, profile: SslProfile) -> bool {
        upsert(&mut self.ssl_profiles, profile.name.clone(), profile)
    }

    /// Remove an SSL profile by name
    pub fn remove_ssl_profile(&mut self, name: &str) -> Option<SslProfile> {
        self.ssl_profiles.remove(name)
    }

    /// Insert or replace an address policy
    pub fn add_address(&mut self, address: Address) -> bool {
        upsert(&mut self.addresses, address.prefix.clone(), address)
    }

    /// Insert or replace a TCP listener
    pub fn add_tcp_listener(&mut self, endpoint: TcpEndpoint) -> bool {
        self.bridges.add_tcp_listener(endpoint)
    }

    /// Remove a TCP listener by name
    pub fn remove_tcp_listener(&mut self, name: &str) -> Option<TcpEndpoint> {
        self.bridges.tcp_listeners.remove(name)
    }

    /// Insert or replace a TCP connector
    pub fn add_tcp_connector(&mut self, endpoint: TcpEndpoint) -> bool {
        self.bridges.add_tcp_connector(endpoint)
    }

    /// Remove a TCP connector by name
    pub fn remove_tcp_connector(&mut self, name: &str) -> Option<TcpEndpoint> {
        self.bridges.tcp_connectors.remove(name)
    }

    /// Replace the bridge endpoints wholesale
    pub fn update_bridge_config(&mut self, desired: BridgeConfig) -> bool {
        if self.bridges == desired {
            return false;
        }
        self.bridges = desired;
        true
    }

    /// Names of every SSL profile referenced by a listener, connector or
    /// bridge endpoint
    pub fn referenced_ssl_profiles(&self) -> BTreeSet<&str> {
        let mut referenced = self.bridges.ssl_profile_names();
        referenced.extend(
            self.listeners
                .values()
                .map(|l| l.ssl_profile.as_str())
                .chain(self.connectors.values().map(|c| c.ssl_profile.as_str()))
                .filter(|p| !p.is_empty()),
        );
        referenced
    }

    /// SSL profiles nothing refers to
    pub fn unreferenced_ssl_profiles(&self) -> BTreeMap<String, SslProfile> {
        let referenced = self.referenced_ssl_profiles();
        self.ssl_profiles
            .iter()
            .filter(|(name, _)| !referenced.contains(name.as_str()))
            .map(|(name, profile)| (name.clone(), profile.clone()))
            .collect()
    }

    /// Drop every SSL profile nothing refers to
    pub fn remove_unreferenced_ssl_profiles(&mut self) -> bool {
        let unreferenced = self.unreferenced_ssl_profiles();
        let mut changed = false;
        for name in unreferenced.keys() {
            if self.remove_ssl_profile(name).is_some() {
                changed = true;
            }
        }
        changed
    }

    /// Set the level of one log module
    ///
    /// An empty module means `DEFAULT`; a level without a trailing `+` gets
    /// one. An empty level leaves the config alone.
    pub fn set_log_level(&mut self, module: &str, level: &str) -> bool {
        if level.is_empty() {
            return false;
        }
        let module = if module.is_empty() {
            DEFAULT_LOG_MODULE
        } else {
            module
        };
        let enable = if level.ends_with('+') {
            level.to_string()
        } else {
            format!("{level}+")
        };
        let entry = LogConfig {
            module: module.to_string(),
            enable,
        };
        upsert(&mut self.log_config, module.to_string(), entry)
    }

    /// Set every given module level and drop modules not listed
    pub fn set_log_levels(&mut self, levels: &BTreeMap<String, String>) -> bool {
        let keep: BTreeSet<&str> = levels
            .keys()
            .map(|k| {
                if k.is_empty() {
                    DEFAULT_LOG_MODULE
                } else {
                    k.as_str()
                }
            })
            .collect();
        let mut changed = false;
        for (module, level) in levels {
            if self.set_log_level(module, level) {
                changed = true;
            }
        }
        let before = self.log_config.len();
        self.log_config.retain(|module, _| keep.contains(module.as_str()));
        changed || before != self.log_config.len()
    }

    /// Listeners accepted by the predicate
    pub fn matching_listeners<P>(&self, predicate: P) -> BTreeMap<String, Listener>
    where
        P: Fn(&Listener) -> bool,
    {
        self.listeners
            .iter()
            .filter(|(_, l)| predicate(l))
            .map(|(k, l)| (k.clone(), l.clone()))
            .collect()
    }
}

/// False for the listeners owned by the router deployment itself
pub fn is_not_protected_listener(listener: &Listener) -> bool {
    !PROTECTED_LISTENERS.contains(&listener.name.as_str())
}

/// Build the SSL profile for a secret materialized under `base_path`
///
/// Files land in `base_path/<name>/`; `client_auth` adds `tls.crt` and
/// `tls.key` to the CA certificate.
pub fn configure_ssl_profile(name: &str, base_path: &str, client_auth: bool) -> SslProfile {
    let dir = Path::new(base_path).join(name);
    let file = |f: &str| dir.join(f).to_string_lossy().into_owned();
    let mut profile = SslProfile {
        name: name.to_string(),
        ca_cert_file: file("ca.crt"),
        ..Default::default()
    };
    if client_auth {
        profile.cert_file = file("tls.crt");
        profile.private_key_file = file("tls.key");
    }
    profile
}

/// Name of the profile backed by `secret`
///
/// CA-only use of a secret gets its own `-profile` name so it never
/// collides with the client-auth profile of the same secret.
pub fn ssl_profile_name(secret: &str, use_client_cert: bool) -> String {
    if use_client_cert {
        secret.to_string()
    } else {
        format!("{secret}{CA_ONLY_PROFILE_SUFFIX}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(name: &str, port: &str, profile: &str) -> TcpEndpoint {
        TcpEndpoint {
            name: name.to_string(),
            host: "0.0.0.0".to_string(),
            port: port.to_string(),
            address: name.to_string(),
            site_id: "site-1".to_string(),
            ssl_profile: profile.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn initial_config_sets_identity_and_mode() {
        let config = RouterConfig::initial("router-1", "site-1", "2.0.0", false, 10);
        assert_eq!(config.metadata.id, "router-1");
        assert_eq!(config.metadata.mode, Mode::Interior);
        assert_eq!(config.metadata.hello_max_age_seconds, "10");
        assert!(!config.is_edge());
        assert_eq!(
            config.site_metadata(),
            SiteMetadata {
                id: "site-1".to_string(),
                version: "2.0.0".to_string()
            }
        );
        assert!(config.listeners.is_empty());
        assert!(config.site_config.is_none());

        let edge = RouterConfig::initial("router-2", "site-2", "2.0.0", true, 3);
        assert!(edge.is_edge());
    }

    #[test]
    fn site_metadata_can_be_replaced() {
        let mut config = RouterConfig::initial("r", "old", "1.0", false, 3);
        config.set_site_metadata(&SiteMetadata {
            id: "new".to_string(),
            version: "1.1".to_string(),
        });
        assert_eq!(config.site_metadata().id, "new");
        assert_eq!(config.site_metadata().version, "1.1");
    }

    #[test]
    fn add_listener_defaults_name_and_reports_change() {
        let mut config = RouterConfig::default();
        let listener = Listener {
            host: "localhost".to_string(),
            port: 5672,
            ..Default::default()
        };
        assert!(config.add_listener(listener.clone()));
        assert!(config.listeners.contains_key("localhost@5672"));
        assert!(!config.add_listener(listener.clone()));

        let changed = Listener {
            cost: 5,
            ..listener
        };
        assert!(config.add_listener(changed));
        assert_eq!(config.listeners["localhost@5672"].cost, 5);

        let removed = config.remove_listener("localhost@5672");
        assert_eq!(removed.map(|l| l.port), Some(5672));
        assert!(config.remove_listener("localhost@5672").is_none());
    }

    #[test]
    fn add_connector_reports_change() {
        let mut config = RouterConfig::default();
        let connector = Connector {
            name: "link1".to_string(),
            role: Some(Role::InterRouter),
            host: "peer.example.com".to_string(),
            port: "55671".to_string(),
            ..Default::default()
        };
        assert!(config.add_connector(connector.clone()));
        assert!(!config.add_connector(connector.clone()));
        assert!(connector.is_link_connector());
        assert_eq!(config.remove_connector("link1"), Some(connector));
        assert!(config.remove_connector("link1").is_none());
    }

    #[test]
    fn add_ssl_profile_and_address_report_change() {
        let mut config = RouterConfig::default();
        let profile = configure_ssl_profile("skupper", "/etc/certs", true);
        assert!(config.add_ssl_profile(profile.clone()));
        assert!(!config.add_ssl_profile(profile));

        let address = Address {
            prefix: "mc".to_string(),
            distribution: DISTRIBUTION_MULTICAST.to_string(),
        };
        assert!(config.add_address(address.clone()));
        assert!(!config.add_address(address));
        assert!(config.add_address(Address {
            prefix: "mc".to_string(),
            distribution: DISTRIBUTION_BALANCED.to_string(),
        }));
    }

    #[test]
    fn tcp_endpoints_report_change() {
        let mut config = RouterConfig::default();
        assert!(config.add_tcp_listener(endpoint("echo", "1024", "")));
        assert!(!config.add_tcp_listener(endpoint("echo", "1024", "")));
        assert!(config.add_tcp_listener(endpoint("echo", "1025", "")));
        assert!(config.add_tcp_connector(endpoint("db", "5432", "")));
        assert!(config.remove_tcp_connector("db").is_some());
        assert!(config.remove_tcp_listener("echo").is_some());
        assert!(config.remove_tcp_listener("echo").is_none());
    }

    #[test]
    fn update_bridge_config_detects_equality() {
        let mut config = RouterConfig::default();
        let mut bridges = BridgeConfig::default();
        bridges.add_tcp_listener(endpoint("echo", "1024", ""));
        assert!(config.update_bridge_config(bridges.clone()));
        assert!(!config.update_bridge_config(bridges));
    }

    #[test]
    fn unreferenced_profiles_are_pruned() {
        let mut config = RouterConfig::default();
        config.add_ssl_profile(configure_ssl_profile("used-by-listener", "/p", true));
        config.add_ssl_profile(configure_ssl_profile("used-by-bridge", "/p", true));
        config.add_ssl_profile(configure_ssl_profile("used-by-connector", "/p", false));
        config.add_ssl_profile(configure_ssl_profile("orphan", "/p", true));
        config.add_listener(Listener {
            name: "l1".to_string(),
            port: 55671,
            ssl_profile: "used-by-listener".to_string(),
            ..Default::default()
        });
        config.add_connector(Connector {
            name: "c1".to_string(),
            ssl_profile: "used-by-connector".to_string(),
            ..Default::default()
        });
        config.add_tcp_connector(endpoint("db", "5432", "used-by-bridge"));

        let unreferenced = config.unreferenced_ssl_profiles();
        assert_eq!(unreferenced.keys().collect::<Vec<_>>(), vec!["orphan"]);

        assert!(config.remove_unreferenced_ssl_profiles());
        assert_eq!(config.ssl_profiles.len(), 3);
        assert!(!config.remove_unreferenced_ssl_profiles());
    }

    #[test]
    fn set_log_level_normalizes_module_and_level() {
        let mut config = RouterConfig::default();
        assert!(!config.set_log_level("ROUTER", ""));
        assert!(config.set_log_level("", "info"));
        assert_eq!(config.log_config["DEFAULT"].enable, "info+");
        assert!(!config.set_log_level("DEFAULT", "info+"));
        assert!(config.set_log_level("ROUTER_CORE", "trace+"));
        assert_eq!(config.log_config["ROUTER_CORE"].module, "ROUTER_CORE");
    }

    #[test]
    fn set_log_levels_drops_unlisted_modules() {
        let mut config = RouterConfig::default();
        config.set_log_level("ROUTER_CORE", "trace");
        config.set_log_level("", "info");

        let mut levels = BTreeMap::new();
        levels.insert(String::new(), "info".to_string());
        assert!(config.set_log_levels(&levels));
        assert_eq!(config.log_config.len(), 1);
        assert!(config.log_config.contains_key("DEFAULT"));
        assert!(!config.set_log_levels(&levels));
    }

    #[test]
    fn configure_ssl_profile_paths() {
        let profile = configure_ssl_profile("skupper", "/etc/skupper-router-certs", true);
        assert_eq!(profile.ca_cert_file, "/etc/skupper-router-certs/skupper/ca.crt");
        assert_eq!(profile.cert_file, "/etc/skupper-router-certs/skupper/tls.crt");
        assert_eq!(
            profile.private_key_file,
            "/etc/skupper-router-certs/skupper/tls.key"
        );
        assert!(!profile.is_ca_only());

        let ca_only = configure_ssl_profile("peer-profile", "/certs", false);
        assert_eq!(ca_only.ca_cert_file, "/certs/peer-profile/ca.crt");
        assert!(ca_only.is_ca_only());
    }

    #[test]
    fn ssl_profile_name_qualifies_ca_only_use() {
        assert_eq!(ssl_profile_name("db-tls", true), "db-tls");
        assert_eq!(ssl_profile_name("db-tls", false), "db-tls-profile");
    }

    #[test]
    fn protected_listeners_are_filtered() {
        let mut config = RouterConfig::default();
        config.add_health_and_metrics_listener(9090);
        config.add_listener(Listener {
            name: "amqp".to_string(),
            host: "localhost".to_string(),
            port: 5672,
            ..Default::default()
        });
        config.add_listener(Listener {
            name: "my-ra-inter-router".to_string(),
            port: 55671,
            ..Default::default()
        });
        let health = &config.listeners["@9090"];
        assert!(health.healthz && health.metrics && health.http);
        assert_eq!(health.http_root_dir, "disabled");

        let matching = config.matching_listeners(is_not_protected_listener);
        assert_eq!(
            matching.keys().collect::<Vec<_>>(),
            vec!["my-ra-inter-router"]
        );
    }

    #[test]
    fn role_parsing() {
        assert_eq!(Role::parse("edge"), Role::Edge);
        assert_eq!(Role::parse("normal"), Role::Normal);
        assert_eq!(Role::parse("anything"), Role::InterRouter);
        assert!(Role::Edge.is_link());
        assert!(!Role::Normal.is_link());
        assert_eq!(Role::InterRouter.as_str(), "inter-router");
    }
}
