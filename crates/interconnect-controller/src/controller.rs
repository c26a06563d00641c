//! Router config and TLS secret event loop
//!
//! One serialized loop owns the ordinal tracker and the access point
//! contribution. Every secret event goes to the tracker and the
//! synchronizer; when an ordinal moves, the contributions are re-applied to
//! the persisted router config and the synchronizer is told what to expect.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, PostParams};
use kube::ResourceExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use interconnect_common::{Error, Result};
use interconnect_router::access::RouterAccessConfig;
use interconnect_router::configmap::{router_config_from_config_map, update_config_map};
use interconnect_router::{ConfigUpdate, ConfigUpdates, RouterConfig};
use interconnect_secrets::{ProfilesWatcher, SecretEvent, SecretSync};

/// Access to the config map holding the router configuration
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigMapClient: Send + Sync {
    /// Fetch a config map, `None` if it does not exist
    async fn get(&self, name: &str) -> Result<Option<ConfigMap>>;

    /// Replace a config map
    async fn replace(&self, config_map: &ConfigMap) -> Result<()>;
}

/// [`ConfigMapClient`] using the Kubernetes API
pub struct KubeConfigMapClient {
    api: Api<ConfigMap>,
}

impl KubeConfigMapClient {
    /// Client for config maps reachable through `api`
    pub fn new(api: Api<ConfigMap>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ConfigMapClient for KubeConfigMapClient {
    async fn get(&self, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn replace(&self, config_map: &ConfigMap) -> Result<()> {
        self.api
            .replace(&config_map.name_any(), &PostParams::default(), config_map)
            .await?;
        Ok(())
    }
}

/// Keeps one router's persisted config and TLS material in step
pub struct Controller {
    config_map: String,
    client: Arc<dyn ConfigMapClient>,
    initial: RouterConfig,
    tracker: ProfilesWatcher,
    sync: Arc<SecretSync>,
    access: RouterAccessConfig,
}

impl Controller {
    /// Controller for the router config stored in config map `config_map`
    ///
    /// `initial` is used when the config map does not hold a config yet.
    pub fn new(
        config_map: &str,
        client: Arc<dyn ConfigMapClient>,
        initial: RouterConfig,
        tracker: ProfilesWatcher,
        sync: Arc<SecretSync>,
        access: RouterAccessConfig,
    ) -> Self {
        Self {
            config_map: config_map.to_string(),
            client,
            initial,
            tracker,
            sync,
            access,
        }
    }

    /// Replay cached secrets and bring the persisted config up to date
    pub async fn start(&mut self) -> Result<()> {
        self.sync.recover();
        self.reconcile().await?;
        Ok(())
    }

    /// Apply every contribution to the persisted router config
    ///
    /// Returns whether the config map was written.
    pub async fn reconcile(&mut self) -> Result<bool> {
        let mut config_map = self.client.get(&self.config_map).await?.ok_or_else(|| {
            Error::internal_with_context(
                "controller",
                format!("config map {} not found", self.config_map),
            )
        })?;
        let mut config = match router_config_from_config_map(&config_map)? {
            Some(config) => config,
            None => {
                info!(config_map = %self.config_map, "Initializing router config");
                self.initial.clone()
            }
        };

        self.tracker.use_profiles(&config.ssl_profiles).await;
        let mut changed = ConfigUpdates::new()
            .push(&mut self.access)
            .push(&mut self.tracker)
            .apply(&mut config);
        if config.remove_unreferenced_ssl_profiles() {
            changed = true;
        }
        // profiles the access point just added, minus the pruned ones
        if self.tracker.use_profiles(&config.ssl_profiles).await && self.tracker.apply(&mut config) {
            changed = true;
        }
        debug!(changed, "Applied router config updates");

        let written = update_config_map(&mut config_map, &config)?;
        if written {
            self.client.replace(&config_map).await?;
            info!(config_map = %self.config_map, "Updated router config");
        }

        let delta = self.sync.expect(&config.ssl_profiles);
        if !delta.is_empty() {
            info!(
                missing = delta.missing.len(),
                pending = delta.pending_ordinals.len(),
                errors = delta.errors.len(),
                summary = %delta,
                "TLS material not yet synchronized"
            );
        }
        Ok(written)
    }

    /// Handle one secret event
    pub async fn handle_event(&mut self, event: SecretEvent) -> Result<()> {
        let secret = event.secret.as_deref();
        let tracked = self.tracker.handle_secret(&event.key, secret).await;
        if let Err(e) = self.sync.handle(&event.key, secret) {
            warn!(secret = %event.key, error = %e, "Failed to synchronize secret content");
        }
        if tracked? {
            self.reconcile().await?;
        }
        Ok(())
    }

    /// Process secret events until `stop` fires or the channel closes
    pub async fn run(mut self, mut events: mpsc::Receiver<SecretEvent>, stop: CancellationToken) {
        info!("Controller started");
        loop {
            let event = tokio::select! {
                _ = stop.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            let key = event.key.clone();
            if let Err(e) = self.handle_event(event).await {
                warn!(
                    secret = %key,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Failed to handle secret event"
                );
            }
        }
        self.tracker.stop();
        self.sync.stop();
        info!("Controller stopped");
    }
}
