//! Common types for the interconnect control plane: errors, well-known
//! names and telemetry setup

#![deny(missing_docs)]

pub mod error;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Key under which the encoded router configuration is stored in the
/// router's config map
pub const TRANSPORT_CONFIG_FILE: &str = "skrouterd.json";

/// Default name of the config map holding the router configuration
pub const TRANSPORT_CONFIG_MAP_NAME: &str = "skupper-router";

/// Default base directory for materialized SSL profiles
pub const SSL_PROFILE_PATH: &str = "/etc/skupper-router-certs";

/// SSL profile used by the router's own inter-router and edge links
pub const INTER_ROUTER_PROFILE: &str = "skupper-internal";

/// Secret shared by all TLS-enabled service connectors
pub const SERVICE_CLIENT_SECRET: &str = "skupper-service-client";

/// Prefix of SSL profiles generated for exposed services
pub const SERVICE_CERT_PREFIX: &str = "skupper-tls-";

/// Annotation carrying the JSON list of `{profileName, ordinal}` a secret backs
pub const ANNOTATION_TLS_PROFILE_CONTEXT: &str = "internal.skupper.io/tls-profile-context";

/// Annotation overriding the prior-valid-revisions window for one secret
pub const ANNOTATION_TLS_PRIOR_VALID_REVISIONS: &str = "skupper.io/tls-prior-valid-revisions";

/// Port of the router's inter-router listener
pub const INTER_ROUTER_LISTENER_PORT: u16 = 55671;

/// Port of the router's edge listener
pub const EDGE_LISTENER_PORT: u16 = 45671;

/// Default port of the router's health and metrics listener
pub const DEFAULT_HEALTH_PORT: u16 = 9090;
