//! Controller configuration from flags and environment

use std::collections::BTreeMap;

use clap::Parser;
use kube::runtime::watcher;

use interconnect_common::telemetry::LogFormat;
use interconnect_common::{
    DEFAULT_HEALTH_PORT, EDGE_LISTENER_PORT, INTER_ROUTER_LISTENER_PORT, INTER_ROUTER_PROFILE,
    SSL_PROFILE_PATH, TRANSPORT_CONFIG_MAP_NAME,
};
use interconnect_router::access::{AccessRole, RouterAccess, RouterAccessMap};
use interconnect_router::{Role, RouterOptions};
use interconnect_secrets::PriorValidityProvider;

/// Interconnect controller - keeps a router's TLS material and config in step
#[derive(Parser, Debug, Clone)]
#[command(name = "interconnect-controller", version, about, long_about = None)]
pub struct Config {
    /// Namespace holding the router config map and TLS secrets
    #[arg(long, env = "NAMESPACE")]
    pub namespace: String,

    /// Router id
    #[arg(long, env = "ROUTER_ID", default_value = "skupper-router")]
    pub router_id: String,

    /// Site id published in router metadata
    #[arg(long, env = "SITE_ID")]
    pub site_id: String,

    /// Site version published in router metadata
    #[arg(long, env = "SITE_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    pub site_version: String,

    /// Run the router in edge mode
    #[arg(long, env = "EDGE")]
    pub edge: bool,

    /// Router hello max age in seconds
    #[arg(long, env = "HELLO_MAX_AGE", default_value_t = 3)]
    pub hello_max_age: u32,

    /// Config map holding the router configuration
    #[arg(long, env = "ROUTER_CONFIG_MAP", default_value = TRANSPORT_CONFIG_MAP_NAME)]
    pub config_map: String,

    /// Base directory for materialized SSL profiles
    #[arg(long, env = "SSL_PROFILE_PATH", default_value = SSL_PROFILE_PATH)]
    pub profile_path: String,

    /// Trailing certificate generations still accepted during rotation
    #[arg(long, env = "TLS_PRIOR_VALID_REVISIONS", default_value_t = 2)]
    pub tls_prior_valid_revisions: u64,

    /// Label selector restricting the watched secrets
    #[arg(long, env = "SECRET_LABEL_SELECTOR")]
    pub secret_label_selector: Option<String>,

    /// Port of the router's health and metrics listener
    #[arg(long, env = "HEALTH_PORT", default_value_t = DEFAULT_HEALTH_PORT)]
    pub health_port: u16,

    /// Max AMQP frame size on link listeners (0 for router default)
    #[arg(long, env = "MAX_FRAME_SIZE", default_value_t = 0)]
    pub max_frame_size: u32,

    /// Max AMQP session frames on link listeners (0 for router default)
    #[arg(long, env = "MAX_SESSION_FRAMES", default_value_t = 0)]
    pub max_session_frames: u32,

    /// Accept links without client certificates
    #[arg(long, env = "DISABLE_MUTUAL_TLS")]
    pub disable_mutual_tls: bool,

    /// Name of the router access point publishing the link listeners
    #[arg(long, env = "ACCESS_NAME", default_value = "skupper")]
    pub access_name: String,

    /// Host the link listeners bind to
    #[arg(long, env = "ACCESS_BIND_HOST", default_value = "")]
    pub access_bind_host: String,

    /// Secret with the link listeners' server certificate
    #[arg(long, env = "ACCESS_TLS_CREDENTIALS", default_value = INTER_ROUTER_PROFILE)]
    pub access_tls_credentials: String,

    /// Router groups to open automesh connectors to
    #[arg(long = "target-group", env = "TARGET_GROUPS", value_delimiter = ',')]
    pub target_groups: Vec<String>,

    /// Log plain text instead of JSON
    #[arg(long, env = "TEXT_LOGS")]
    pub text_logs: bool,
}

impl Config {
    /// Tunables for the router's link listeners
    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            max_frame_size: self.max_frame_size,
            max_session_frames: self.max_session_frames,
            disable_mutual_tls: self.disable_mutual_tls,
        }
    }

    /// The single access point this controller publishes
    ///
    /// Edge routers only link out, so they publish nothing.
    pub fn router_access(&self) -> RouterAccessMap {
        let mut map = BTreeMap::new();
        if !self.edge {
            map.insert(
                self.access_name.clone(),
                RouterAccess {
                    name: self.access_name.clone(),
                    roles: vec![
                        AccessRole {
                            role: Role::InterRouter,
                            port: INTER_ROUTER_LISTENER_PORT,
                        },
                        AccessRole {
                            role: Role::Edge,
                            port: EDGE_LISTENER_PORT,
                        },
                    ],
                    tls_credentials: self.access_tls_credentials.clone(),
                    bind_host: self.access_bind_host.clone(),
                },
            );
        }
        RouterAccessMap(map)
    }

    /// Watch parameters for the secret watch
    pub fn watcher_config(&self) -> watcher::Config {
        match &self.secret_label_selector {
            Some(selector) => watcher::Config::default().labels(selector),
            None => watcher::Config::default(),
        }
    }

    /// Log line format
    pub fn log_format(&self) -> LogFormat {
        if self.text_logs {
            LogFormat::Text
        } else {
            LogFormat::Json
        }
    }
}

impl PriorValidityProvider for Config {
    fn tls_prior_valid_revisions(&self) -> u64 {
        self.tls_prior_valid_revisions
    }
}
