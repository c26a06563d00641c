//! Interconnect controller
//!
//! Wires the router configuration core and the TLS secret tracking to a
//! Kubernetes cluster: one secret watch feeds the ordinal tracker and the
//! content synchronizer, and ordinal changes are persisted to the router's
//! config map.

pub mod config;
pub mod controller;

pub use config::Config;
pub use controller::{ConfigMapClient, Controller, KubeConfigMapClient};
