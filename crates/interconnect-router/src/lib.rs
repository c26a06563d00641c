//! Router configuration for the interconnect control plane
//!
//! Turns declarative intents into the configuration of one message router:
//!
//! - [`config`]: the in-memory [`RouterConfig`] and its entities
//! - [`wire`]: the router's `[entityType, fields]` tuple-list encoding
//! - [`diff`]: actual-vs-desired differences used for idempotent apply
//! - [`ports`]: router port allocation with recovery from a persisted config
//! - [`update`]: the [`ConfigUpdate`] contract and ordered composition
//! - [`bindings`], [`access`]: the updates contributed by service bindings
//!   and router access points
//! - [`configmap`]: persistence of the encoded config in a config map

pub mod access;
pub mod bindings;
pub mod config;
pub mod configmap;
pub mod diff;
pub mod ports;
pub mod update;
pub mod wire;

pub use config::{
    Address, BridgeConfig, Connector, Listener, LogConfig, Mode, Role, RouterConfig,
    RouterMetadata, RouterOptions, SiteConfig, SiteMetadata, SslProfile, TcpEndpoint,
    TcpEndpointMap,
};
pub use ports::{FreePorts, PortMapping};
pub use update::{ConfigUpdate, ConfigUpdates};
pub use wire::{marshal_router_config, router_config_equals, unmarshal_router_config};
