//! Actual-vs-desired differences
//!
//! Each difference compares what the router has against what it should have
//! and lists the entities to delete and add. A changed entity that the
//! router cannot mutate in place shows up in both lists so it can be
//! recreated over the management protocol.
//!
//! Every difference also carries a [`ProfileDelta`]: SSL profile names that
//! became used or unused between the two sides.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use tracing::info;

use interconnect_common::{SERVICE_CERT_PREFIX, SERVICE_CLIENT_SECRET};

use crate::config::{BridgeConfig, Connector, Listener, RouterConfig, SslProfile, TcpEndpoint};

const OBSERVER_AUTO: &str = "auto";

/// SSL profile names that became used or unused
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileDelta {
    /// Profiles used by the desired side only
    pub added: Vec<String>,
    /// Generated profiles no longer used by the desired side
    pub deleted: Vec<String>,
}

/// True for profiles generated for exposed services
///
/// Only these are ever flagged for deletion; user supplied profiles are left
/// alone.
pub fn is_generated_profile(name: &str) -> bool {
    name.starts_with(SERVICE_CERT_PREFIX) && name != SERVICE_CLIENT_SECRET
}

impl ProfileDelta {
    /// Compare the profile usage of two sides
    ///
    /// The shared service client secret is never reported as added. Empty
    /// names are ignored.
    pub fn between<'a, B, D>(before: B, desired: D) -> Self
    where
        B: IntoIterator<Item = &'a str>,
        D: IntoIterator<Item = &'a str>,
    {
        let before: BTreeSet<&str> = before.into_iter().filter(|p| !p.is_empty()).collect();
        let desired: BTreeSet<&str> = desired.into_iter().filter(|p| !p.is_empty()).collect();
        Self {
            added: desired
                .difference(&before)
                .filter(|p| **p != SERVICE_CLIENT_SECRET)
                .map(|p| p.to_string())
                .collect(),
            deleted: before
                .difference(&desired)
                .filter(|p| is_generated_profile(p))
                .map(|p| p.to_string())
                .collect(),
        }
    }

    /// True if no profile usage changed
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty()
    }
}

impl Listener {
    /// Value equivalence against an actual listener
    ///
    /// Zero cost, frame size, session frames and link capacity and an empty
    /// http root dir on the desired side match any actual value. Websockets,
    /// healthz and metrics are not compared.
    pub fn equivalent(&self, actual: &Listener) -> bool {
        fn dont_care<T: Default + PartialEq>(desired: &T, actual: &T) -> bool {
            *desired == T::default() || desired == actual
        }
        self.name == actual.name
            && self.role == actual.role
            && self.host == actual.host
            && self.port == actual.port
            && self.route_container == actual.route_container
            && self.http == actual.http
            && self.ssl_profile == actual.ssl_profile
            && self.sasl_mechanisms == actual.sasl_mechanisms
            && self.authenticate_peer == actual.authenticate_peer
            && dont_care(&self.cost, &actual.cost)
            && dont_care(&self.max_frame_size, &actual.max_frame_size)
            && dont_care(&self.max_session_frames, &actual.max_session_frames)
            && dont_care(&self.link_capacity, &actual.link_capacity)
            && dont_care(&self.http_root_dir, &actual.http_root_dir)
    }
}

impl Connector {
    /// Value equivalence against an actual connector
    pub fn equivalent(&self, actual: &Connector) -> bool {
        self.name == actual.name
            && self.host == actual.host
            && self.port == actual.port
            && self.cost == actual.cost
            && self.ssl_profile == actual.ssl_profile
    }
}

fn is_host_any(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_unspecified())
}

fn equivalent_host(a: &str, b: &str) -> bool {
    if a == b {
        true
    } else if a.is_empty() {
        is_host_any(b)
    } else if b.is_empty() {
        is_host_any(a)
    } else {
        false
    }
}

fn observer(endpoint: &TcpEndpoint) -> &str {
    if endpoint.observer.is_empty() {
        OBSERVER_AUTO
    } else {
        &endpoint.observer
    }
}

impl TcpEndpoint {
    /// Value equivalence
    ///
    /// An unspecified address matches an empty host, unset verify-hostname
    /// matches `true` and an empty observer matches `auto`.
    pub fn equivalent(&self, other: &TcpEndpoint) -> bool {
        equivalent_host(&self.host, &other.host)
            && self.port == other.port
            && self.address == other.address
            && self.site_id == other.site_id
            && self.process_id == other.process_id
            && self.ssl_profile == other.ssl_profile
            && self.verify_hostname.unwrap_or(true) == other.verify_hostname.unwrap_or(true)
            && observer(self) == observer(other)
    }
}

/// Listener changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerDifference {
    /// Listeners to delete (changed ones included)
    pub deleted: Vec<Listener>,
    /// Listeners to add (changed ones included)
    pub added: Vec<Listener>,
    /// Profile usage change
    pub profiles: ProfileDelta,
}

impl ListenerDifference {
    /// True if nothing needs to change
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.added.is_empty()
    }

    /// Log the difference
    pub fn log_summary(&self) {
        info!(
            added = ?names(self.added.iter().map(|l| &l.name)),
            deleted = ?names(self.deleted.iter().map(|l| &l.name)),
            added_profiles = ?self.profiles.added,
            deleted_profiles = ?self.profiles.deleted,
            "Listener difference"
        );
    }
}

fn names<'a>(iter: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    iter.map(String::as_str).collect()
}

/// Compare actual listeners against desired ones
pub fn listeners_difference(
    actual: &BTreeMap<String, Listener>,
    desired: &BTreeMap<String, Listener>,
) -> ListenerDifference {
    let mut result = ListenerDifference::default();
    for (key, wanted) in desired {
        match actual.get(key) {
            Some(existing) if !wanted.equivalent(existing) => {
                info!(listener = %key, "Listener definition does not match");
                result.deleted.push(wanted.clone());
                result.added.push(wanted.clone());
            }
            Some(_) => {}
            None => result.added.push(wanted.clone()),
        }
    }
    for (key, existing) in actual {
        if !desired.contains_key(key) {
            result.deleted.push(existing.clone());
        }
    }
    result.profiles = ProfileDelta::between(
        actual.values().map(|l| l.ssl_profile.as_str()),
        desired.values().map(|l| l.ssl_profile.as_str()),
    );
    result
}

/// Connector changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorDifference {
    /// Connectors to delete
    pub deleted: Vec<Connector>,
    /// Connectors to add
    pub added: Vec<Connector>,
    /// Profiles the added connectors need, taken from the desired config
    pub added_ssl_profiles: BTreeMap<String, SslProfile>,
    /// Profile usage change
    pub profiles: ProfileDelta,
}

impl ConnectorDifference {
    /// True if nothing needs to change
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.added.is_empty()
    }

    /// Log the difference
    pub fn log_summary(&self) {
        info!(
            added = ?names(self.added.iter().map(|c| &c.name)),
            deleted = ?names(self.deleted.iter().map(|c| &c.name)),
            added_profiles = ?self.profiles.added,
            deleted_profiles = ?self.profiles.deleted,
            "Connector difference"
        );
    }
}

/// Compare actual connectors against the desired config
///
/// Changed link connectors are recreated; other connectors are only ever
/// added or removed. Actual connectors whose name starts with
/// `ignore_prefix` are managed elsewhere and never deleted.
pub fn connectors_difference(
    actual: &BTreeMap<String, Connector>,
    desired: &RouterConfig,
    ignore_prefix: Option<&str>,
) -> ConnectorDifference {
    let mut result = ConnectorDifference::default();
    for (key, wanted) in &desired.connectors {
        match actual.get(key) {
            None => {
                result.added.push(wanted.clone());
                if let Some(profile) = desired.ssl_profiles.get(&wanted.ssl_profile) {
                    result
                        .added_ssl_profiles
                        .insert(profile.name.clone(), profile.clone());
                }
            }
            Some(existing) if wanted.is_link_connector() && !wanted.equivalent(existing) => {
                result.deleted.push(wanted.clone());
                result.added.push(wanted.clone());
            }
            Some(_) => {}
        }
    }
    let protected = |name: &str| ignore_prefix.is_some_and(|p| !p.is_empty() && name.starts_with(p));
    for (key, existing) in actual {
        if !desired.connectors.contains_key(key) && !protected(&existing.name) {
            result.deleted.push(existing.clone());
        }
    }
    result.profiles = ProfileDelta::between(
        actual.values().map(|c| c.ssl_profile.as_str()),
        desired.connectors.values().map(|c| c.ssl_profile.as_str()),
    );
    result
}

/// TCP endpoint changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TcpEndpointDifference {
    /// Names of endpoints to delete
    pub deleted: Vec<String>,
    /// Endpoints to add
    pub added: Vec<TcpEndpoint>,
}

impl TcpEndpointDifference {
    /// True if nothing needs to change
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.added.is_empty()
    }
}

/// Compare actual TCP endpoints against desired ones
pub fn tcp_endpoints_difference(
    actual: &BTreeMap<String, TcpEndpoint>,
    desired: &BTreeMap<String, TcpEndpoint>,
) -> TcpEndpointDifference {
    let mut result = TcpEndpointDifference::default();
    for (key, wanted) in desired {
        match actual.get(key) {
            None => result.added.push(wanted.clone()),
            Some(existing) if !wanted.equivalent(existing) => {
                result.deleted.push(wanted.name.clone());
                result.added.push(wanted.clone());
            }
            Some(_) => {}
        }
    }
    for (key, existing) in actual {
        if !desired.contains_key(key) {
            result.deleted.push(existing.name.clone());
        }
    }
    result
}

/// Bridge endpoint changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeConfigDifference {
    /// TCP listener changes
    pub tcp_listeners: TcpEndpointDifference,
    /// TCP connector changes
    pub tcp_connectors: TcpEndpointDifference,
    /// Profile usage change
    pub profiles: ProfileDelta,
}

impl BridgeConfigDifference {
    /// True if no endpoint needs to change
    pub fn is_empty(&self) -> bool {
        self.tcp_listeners.is_empty() && self.tcp_connectors.is_empty()
    }

    /// Log the difference
    pub fn log_summary(&self) {
        info!(
            added = ?names(self.tcp_connectors.added.iter().map(|e| &e.name)),
            deleted = ?self.tcp_connectors.deleted,
            "TcpConnectors"
        );
        info!(
            added = ?names(self.tcp_listeners.added.iter().map(|e| &e.name)),
            deleted = ?self.tcp_listeners.deleted,
            "TcpListeners"
        );
        info!(
            added = ?self.profiles.added,
            deleted = ?self.profiles.deleted,
            "SslProfiles"
        );
    }
}

impl BridgeConfig {
    /// Compare these (actual) bridges against desired ones
    pub fn difference(&self, desired: &BridgeConfig) -> BridgeConfigDifference {
        BridgeConfigDifference {
            tcp_listeners: tcp_endpoints_difference(&self.tcp_listeners, &desired.tcp_listeners),
            tcp_connectors: tcp_endpoints_difference(&self.tcp_connectors, &desired.tcp_connectors),
            profiles: ProfileDelta::between(
                self.ssl_profile_names(),
                desired.ssl_profile_names(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{configure_ssl_profile, Role};

    fn listener(name: &str, port: u16) -> Listener {
        Listener {
            name: name.to_string(),
            role: Some(Role::InterRouter),
            port,
            ssl_profile: "skupper-internal".to_string(),
            ..Default::default()
        }
    }

    fn connector(name: &str, role: Option<Role>, host: &str) -> Connector {
        Connector {
            name: name.to_string(),
            role,
            host: host.to_string(),
            port: "55671".to_string(),
            ..Default::default()
        }
    }

    fn endpoint(name: &str, host: &str, profile: &str) -> TcpEndpoint {
        TcpEndpoint {
            name: name.to_string(),
            host: host.to_string(),
            port: "8080".to_string(),
            address: name.to_string(),
            site_id: "site-1".to_string(),
            ssl_profile: profile.to_string(),
            ..Default::default()
        }
    }

    fn by_name<T: Clone>(items: &[(&str, T)]) -> BTreeMap<String, T> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn identical_listeners_have_no_difference() {
        let listeners = by_name(&[("a", listener("a", 1)), ("b", listener("b", 2))]);
        let diff = listeners_difference(&listeners, &listeners);
        assert!(diff.is_empty());
        assert!(diff.profiles.is_empty());
    }

    #[test]
    fn changed_listener_is_deleted_and_added() {
        let actual = by_name(&[("a", listener("a", 1))]);
        let desired = by_name(&[("a", listener("a", 2))]);
        let diff = listeners_difference(&actual, &desired);
        assert_eq!(diff.deleted, vec![listener("a", 2)]);
        assert_eq!(diff.added, vec![listener("a", 2)]);
    }

    #[test]
    fn renamed_listener_is_one_delete_and_one_add() {
        let actual = by_name(&[("a", listener("a", 1))]);
        let desired = by_name(&[("b", listener("b", 1))]);
        let diff = listeners_difference(&actual, &desired);
        assert_eq!(diff.deleted.len(), 1);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.deleted[0].name, "a");
        assert_eq!(diff.added[0].name, "b");
    }

    #[test]
    fn zero_desired_values_are_dont_care() {
        let mut actual = listener("a", 1);
        actual.cost = 10;
        actual.max_frame_size = 16384;
        actual.max_session_frames = 640;
        actual.link_capacity = 250;
        actual.http_root_dir = "disabled".to_string();
        actual.websockets = true;
        actual.healthz = true;
        actual.metrics = true;
        assert!(listener("a", 1).equivalent(&actual));

        let mut desired = listener("a", 1);
        desired.cost = 5;
        assert!(!desired.equivalent(&actual));
    }

    #[test]
    fn listener_profile_usage_is_tracked() {
        let mut tls = listener("a", 1);
        tls.ssl_profile = "skupper-tls-a".to_string();
        let actual = by_name(&[("a", tls)]);
        let desired = by_name(&[("b", listener("b", 2))]);
        let diff = listeners_difference(&actual, &desired);
        assert_eq!(diff.profiles.deleted, vec!["skupper-tls-a"]);
        assert_eq!(diff.profiles.added, vec!["skupper-internal"]);
    }

    #[test]
    fn link_connectors_are_recreated_normal_ones_are_not() {
        let actual = by_name(&[
            ("link", connector("link", Some(Role::InterRouter), "old")),
            ("plain", connector("plain", Some(Role::Normal), "old")),
        ]);
        let mut desired = RouterConfig::default();
        desired.add_connector(connector("link", Some(Role::InterRouter), "new"));
        desired.add_connector(connector("plain", Some(Role::Normal), "new"));

        let diff = connectors_difference(&actual, &desired, None);
        assert_eq!(diff.deleted.len(), 1);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].host, "new");
        assert_eq!(diff.deleted[0].name, "link");
    }

    #[test]
    fn identical_connectors_have_no_difference() {
        let mut desired = RouterConfig::default();
        desired.add_connector(connector("link", Some(Role::Edge), "host"));
        let diff = connectors_difference(&desired.connectors.clone(), &desired, None);
        assert!(diff.is_empty());
    }

    #[test]
    fn added_connectors_carry_their_profiles() {
        let mut desired = RouterConfig::default();
        desired.add_ssl_profile(configure_ssl_profile("skupper-internal", "/certs", true));
        let mut link = connector("link", Some(Role::InterRouter), "peer");
        link.ssl_profile = "skupper-internal".to_string();
        desired.add_connector(link);

        let diff = connectors_difference(&BTreeMap::new(), &desired, None);
        assert_eq!(diff.added.len(), 1);
        assert!(diff.added_ssl_profiles.contains_key("skupper-internal"));
        assert_eq!(diff.profiles.added, vec!["skupper-internal"]);
    }

    #[test]
    fn ignore_prefix_protects_connectors_from_deletion() {
        let actual = by_name(&[
            ("auto-mesh-1", connector("auto-mesh-1", Some(Role::InterRouter), "a")),
            ("stale", connector("stale", Some(Role::InterRouter), "b")),
        ]);
        let desired = RouterConfig::default();

        let diff = connectors_difference(&actual, &desired, Some("auto-mesh"));
        assert_eq!(diff.deleted.len(), 1);
        assert_eq!(diff.deleted[0].name, "stale");

        let diff = connectors_difference(&actual, &desired, Some(""));
        assert_eq!(diff.deleted.len(), 2);
    }

    #[test]
    fn tcp_endpoint_equivalence_rules() {
        let base = endpoint("echo", "", "");
        assert!(base.equivalent(&endpoint("echo", "0.0.0.0", "")));
        assert!(base.equivalent(&endpoint("echo", "::", "")));
        assert!(!base.equivalent(&endpoint("echo", "10.0.0.1", "")));
        assert!(!endpoint("echo", "a", "").equivalent(&endpoint("echo", "b", "")));

        let verify_true = TcpEndpoint {
            verify_hostname: Some(true),
            ..base.clone()
        };
        let verify_false = TcpEndpoint {
            verify_hostname: Some(false),
            ..base.clone()
        };
        assert!(base.equivalent(&verify_true));
        assert!(verify_true.equivalent(&base));
        assert!(!base.equivalent(&verify_false));
        assert!(!verify_false.equivalent(&base));

        let auto = TcpEndpoint {
            observer: "auto".to_string(),
            ..base.clone()
        };
        let none = TcpEndpoint {
            observer: "none".to_string(),
            ..base.clone()
        };
        assert!(base.equivalent(&auto));
        assert!(!base.equivalent(&none));
    }

    #[test]
    fn tcp_endpoint_changes_are_delete_and_add() {
        let actual = by_name(&[("a", endpoint("a", "h1", "")), ("b", endpoint("b", "h", ""))]);
        let desired = by_name(&[("a", endpoint("a", "h2", "")), ("c", endpoint("c", "h", ""))]);
        let diff = tcp_endpoints_difference(&actual, &desired);
        assert_eq!(diff.deleted, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            diff.added.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "c"]
        );
        assert!(tcp_endpoints_difference(&desired, &desired).is_empty());
    }

    #[test]
    fn bridge_profile_delta_follows_naming_rules() {
        let mut before = BridgeConfig::default();
        before.add_tcp_listener(endpoint("a", "", "skupper-tls-a"));
        before.add_tcp_listener(endpoint("b", "", "user-cert"));

        let mut desired = BridgeConfig::default();
        desired.add_tcp_connector(endpoint("c", "", "skupper-service-client"));
        desired.add_tcp_connector(endpoint("d", "", "skupper-tls-d"));

        let diff = before.difference(&desired);
        assert!(!diff.is_empty());
        assert_eq!(diff.profiles.added, vec!["skupper-tls-d"]);
        assert_eq!(diff.profiles.deleted, vec!["skupper-tls-a"]);
        assert_eq!(diff.tcp_listeners.deleted.len(), 2);
        assert_eq!(diff.tcp_connectors.added.len(), 2);

        let same = desired.difference(&desired);
        assert!(same.is_empty());
        assert!(same.profiles.is_empty());
    }

    #[test]
    fn service_client_secret_is_never_deleted() {
        assert!(is_generated_profile("skupper-tls-backend"));
        assert!(!is_generated_profile("skupper-service-client"));
        assert!(!is_generated_profile("my-cert"));

        let delta = ProfileDelta::between(["skupper-service-client"], std::iter::empty());
        assert!(delta.is_empty());
    }
}
