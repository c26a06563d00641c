//! TLS secret tracking for the interconnect control plane
//!
//! Two consumers share one secret watch:
//!
//! - [`tracker::ProfilesWatcher`] assigns each SSL profile an ordinal that
//!   advances whenever the backing secret's content changes, and records it
//!   on the secret itself
//! - [`sync::SecretSync`] writes the certificate material of configured
//!   profiles to disk once the secret has caught up with the configuration

#![deny(missing_docs)]

pub mod annotations;
pub mod cache;
pub mod sync;
pub mod tracker;

pub use annotations::ProfileContext;
pub use cache::{secret_key, watch_secrets, KubeSecretsCache, SecretEvent, SecretWatch, SecretsCache};
pub use sync::{Callback, OrdinalDelta, SecretSync, SyncDelta};
pub use tracker::{KubeSecretUpdater, PriorValidityProvider, ProfilesWatcher, SecretUpdater};
