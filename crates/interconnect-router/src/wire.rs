//! Router configuration wire format
//!
//! The router reads its configuration as a JSON array of `[entityType, fields]`
//! pairs, the same shape its management protocol uses. Encoding is
//! deterministic: entity groups appear in a fixed order and each group is
//! sorted by key, so equal configs always produce identical bytes.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Serializer, Value};
use tracing::trace;

use interconnect_common::{Error, Result};

use crate::config::{
    Address, Connector, Listener, LogConfig, RouterConfig, RouterMetadata, SiteConfig, SslProfile,
    TcpEndpoint,
};

const ROUTER: &str = "router";
const SSL_PROFILE: &str = "sslProfile";
const CONNECTOR: &str = "connector";
const LISTENER: &str = "listener";
const ADDRESS: &str = "address";
const TCP_CONNECTOR: &str = "tcpConnector";
const TCP_LISTENER: &str = "tcpListener";
const LOG: &str = "log";
const SITE: &str = "site";

fn entry<T: Serialize>(kind: &str, value: &T) -> Result<Value> {
    let fields = serde_json::to_value(value)
        .map_err(|e| Error::decode_for_kind(kind, format!("failed to encode {kind}: {e}")))?;
    Ok(Value::Array(vec![Value::String(kind.to_string()), fields]))
}

/// Encode a router configuration as indented tuple-list JSON
pub fn marshal_router_config(config: &RouterConfig) -> Result<String> {
    let mut elements = vec![entry(ROUTER, &config.metadata)?];
    for profile in config.ssl_profiles.values() {
        elements.push(entry(SSL_PROFILE, profile)?);
    }
    for connector in config.connectors.values() {
        elements.push(entry(CONNECTOR, connector)?);
    }
    for listener in config.listeners.values() {
        elements.push(entry(LISTENER, listener)?);
    }
    for address in config.addresses.values() {
        elements.push(entry(ADDRESS, address)?);
    }
    for endpoint in config.bridges.tcp_connectors.values() {
        elements.push(entry(TCP_CONNECTOR, endpoint)?);
    }
    for endpoint in config.bridges.tcp_listeners.values() {
        elements.push(entry(TCP_LISTENER, endpoint)?);
    }
    for log in config.log_config.values() {
        elements.push(entry(LOG, log)?);
    }
    if let Some(site) = config.site_config.as_ref().filter(|s| **s != SiteConfig::default()) {
        elements.push(entry(SITE, site)?);
    }

    let mut buf = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    Value::Array(elements)
        .serialize(&mut serializer)
        .map_err(|e| Error::decode(format!("failed to encode router config: {e}")))?;
    String::from_utf8(buf).map_err(|e| Error::decode(format!("router config is not utf-8: {e}")))
}

/// Decode one entity's fields
///
/// The fields must be a JSON object; serde would otherwise accept a
/// positional array for a struct.
fn fields<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T> {
    if !value.is_object() {
        return Err(Error::decode_for_kind(
            kind,
            format!("invalid {kind} element, expected object got {value}"),
        ));
    }
    serde_json::from_value(value)
        .map_err(|e| Error::decode_for_kind(kind, format!("invalid {kind} element: {e}")))
}

/// Decode tuple-list JSON into a router configuration
///
/// Unknown entity types are skipped.
pub fn unmarshal_router_config(encoded: &str) -> Result<RouterConfig> {
    let parsed: Value = serde_json::from_str(encoded)
        .map_err(|e| Error::decode(format!("invalid JSON for router configuration: {e}")))?;
    let elements = match parsed {
        Value::Array(elements) => elements,
        other => {
            return Err(Error::decode(format!(
                "invalid JSON for router configuration, expected array at top level got {other}"
            )))
        }
    };

    let mut config = RouterConfig::default();
    for element in elements {
        let (kind, value) = match element {
            Value::Array(pair) if pair.len() == 2 => {
                let mut pair = pair.into_iter();
                match (pair.next(), pair.next()) {
                    (Some(Value::String(kind)), Some(value)) => (kind, value),
                    (Some(kind), _) => {
                        return Err(Error::decode(format!(
                            "invalid JSON for router configuration, expected entity type as string got {kind}"
                        )))
                    }
                    _ => return Err(Error::decode("invalid JSON for router configuration")),
                }
            }
            other => {
                return Err(Error::decode(format!(
                    "invalid JSON for router configuration, expected array with type and value got {other}"
                )))
            }
        };

        match kind.as_str() {
            ROUTER => config.metadata = fields::<RouterMetadata>(&kind, value)?,
            SSL_PROFILE => {
                let profile: SslProfile = fields(&kind, value)?;
                config.ssl_profiles.insert(profile.name.clone(), profile);
            }
            CONNECTOR => {
                let connector: Connector = fields(&kind, value)?;
                config.connectors.insert(connector.name.clone(), connector);
            }
            LISTENER => {
                let listener: Listener = fields(&kind, value)?;
                config.listeners.insert(listener.name.clone(), listener);
            }
            ADDRESS => {
                let address: Address = fields(&kind, value)?;
                config.addresses.insert(address.prefix.clone(), address);
            }
            TCP_CONNECTOR => {
                let endpoint: TcpEndpoint = fields(&kind, value)?;
                config
                    .bridges
                    .tcp_connectors
                    .insert(endpoint.name.clone(), endpoint);
            }
            TCP_LISTENER => {
                let endpoint: TcpEndpoint = fields(&kind, value)?;
                config
                    .bridges
                    .tcp_listeners
                    .insert(endpoint.name.clone(), endpoint);
            }
            LOG => {
                let log: LogConfig = fields(&kind, value)?;
                config.log_config.insert(log.module.clone(), log);
            }
            SITE => config.site_config = Some(fields::<SiteConfig>(&kind, value)?),
            other => trace!(entity = other, "Skipping unknown router entity type"),
        }
    }
    Ok(config)
}

/// True if both encodings decode to the same configuration
pub fn router_config_equals(a: &str, b: &str) -> bool {
    match (unmarshal_router_config(a), unmarshal_router_config(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
