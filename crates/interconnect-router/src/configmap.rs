//! Router configuration persisted in a config map
//!
//! The encoded config lives under [`TRANSPORT_CONFIG_FILE`]. Writes compare
//! the decoded existing value first so an unchanged config never causes an
//! API update.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;

use interconnect_common::{Result, TRANSPORT_CONFIG_FILE};

use crate::config::{BridgeConfig, RouterConfig};
use crate::wire::{marshal_router_config, unmarshal_router_config};

/// Config map data holding `config`
pub fn as_config_map_data(config: &RouterConfig) -> Result<BTreeMap<String, String>> {
    let mut data = BTreeMap::new();
    data.insert(TRANSPORT_CONFIG_FILE.to_string(), marshal_router_config(config)?);
    Ok(data)
}

/// Decode the router config held by a config map, if any
pub fn router_config_from_config_map(config_map: &ConfigMap) -> Result<Option<RouterConfig>> {
    match config_map
        .data
        .as_ref()
        .and_then(|data| data.get(TRANSPORT_CONFIG_FILE))
    {
        Some(encoded) => unmarshal_router_config(encoded).map(Some),
        None => Ok(None),
    }
}

/// Store `config` in the config map unless it already holds an equal one
///
/// Returns whether the config map was modified.
pub fn update_config_map(config_map: &mut ConfigMap, config: &RouterConfig) -> Result<bool> {
    // an undecodable existing value is replaced
    if let Ok(Some(existing)) = router_config_from_config_map(config_map) {
        if existing == *config {
            return Ok(false);
        }
    }
    let encoded = marshal_router_config(config)?;
    config_map
        .data
        .get_or_insert_with(BTreeMap::new)
        .insert(TRANSPORT_CONFIG_FILE.to_string(), encoded);
    Ok(true)
}

/// Replace only the bridge endpoints of the config held by a config map
///
/// Returns whether the config map was modified.
pub fn update_bridges_in_config_map(
    config_map: &mut ConfigMap,
    desired: &BridgeConfig,
) -> Result<bool> {
    let mut config = router_config_from_config_map(config_map)?.unwrap_or_default();
    if !config.update_bridge_config(desired.clone()) {
        return Ok(false);
    }
    update_config_map(config_map, &config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TcpEndpoint;

    fn config_map(config: &RouterConfig) -> ConfigMap {
        ConfigMap {
            data: Some(as_config_map_data(config).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn config_round_trips_through_config_map() {
        let config = RouterConfig::initial("router-1", "site-1", "2.0", false, 3);
        let cm = config_map(&config);
        assert!(cm.data.as_ref().unwrap().contains_key("skrouterd.json"));
        assert_eq!(router_config_from_config_map(&cm).unwrap(), Some(config));
    }

    #[test]
    fn missing_key_is_none_and_bad_value_is_error() {
        assert_eq!(router_config_from_config_map(&ConfigMap::default()).unwrap(), None);

        let mut data = BTreeMap::new();
        data.insert(TRANSPORT_CONFIG_FILE.to_string(), "{}".to_string());
        let cm = ConfigMap {
            data: Some(data),
            ..Default::default()
        };
        assert!(router_config_from_config_map(&cm).is_err());
    }

    #[test]
    fn update_writes_only_on_change() {
        let mut config = RouterConfig::initial("router-1", "site-1", "2.0", false, 3);
        let mut cm = ConfigMap::default();
        assert!(update_config_map(&mut cm, &config).unwrap());
        assert!(!update_config_map(&mut cm, &config).unwrap());

        config.set_log_level("", "debug");
        assert!(update_config_map(&mut cm, &config).unwrap());
        let stored = router_config_from_config_map(&cm).unwrap().unwrap();
        assert_eq!(stored.log_config["DEFAULT"].enable, "debug+");
    }

    #[test]
    fn bridges_are_replaced_in_place() {
        let config = RouterConfig::initial("router-1", "site-1", "2.0", false, 3);
        let mut cm = config_map(&config);

        let mut bridges = BridgeConfig::default();
        bridges.add_tcp_listener(TcpEndpoint {
            name: "echo".to_string(),
            port: "1024".to_string(),
            address: "echo".to_string(),
            ..Default::default()
        });
        assert!(update_bridges_in_config_map(&mut cm, &bridges).unwrap());
        assert!(!update_bridges_in_config_map(&mut cm, &bridges).unwrap());

        let stored = router_config_from_config_map(&cm).unwrap().unwrap();
        assert_eq!(stored.metadata.id, "router-1");
        assert_eq!(stored.bridges, bridges);
    }
}
