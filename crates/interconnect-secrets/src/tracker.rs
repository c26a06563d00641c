//! Certificate ordinal tracker
//!
//! Tracks the SSL profiles the router configuration uses, binds each one to
//! the secret that backs it, and advances the profile's ordinal whenever
//! that secret's content changes. The resulting `{profileName, ordinal}` set
//! is written back onto the secret so a restarted controller resumes at the
//! same generation.
//!
//! The tracker is driven from the controller's single event loop and needs
//! no locking.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, PostParams};
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use interconnect_common::{Error, Result};
use interconnect_router::{ConfigUpdate, RouterConfig, SslProfile};

use crate::annotations::{
    prior_valid_revisions, profile_secrets, secret_profiles, update_checksum,
    update_secret_annotation, Checksum, ProfileContext,
};
use crate::cache::SecretsCache;

/// Source of the default prior-valid-revisions window
pub trait PriorValidityProvider: Send + Sync {
    /// Trailing generations still accepted during a rotation
    fn tls_prior_valid_revisions(&self) -> u64;
}

/// Writes modified secrets back to the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretUpdater: Send + Sync {
    /// Replace the stored secret with `secret`
    async fn update_secret(&self, secret: &Secret) -> Result<()>;
}

/// [`SecretUpdater`] replacing secrets through the Kubernetes API
pub struct KubeSecretUpdater {
    api: Api<Secret>,
}

impl KubeSecretUpdater {
    /// Updater for secrets reachable through `api`
    pub fn new(api: Api<Secret>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SecretUpdater for KubeSecretUpdater {
    async fn update_secret(&self, secret: &Secret) -> Result<()> {
        self.api
            .replace(&secret.name_any(), &PostParams::default(), secret)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct ProfileState {
    ordinal: u64,
    oldest_valid_ordinal: u64,
    secret_key: Option<String>,
    checksum: Option<Checksum>,
}

/// Assigns ordinals to the SSL profiles in use
pub struct ProfilesWatcher {
    namespace: String,
    cache: Arc<dyn SecretsCache>,
    updater: Arc<dyn SecretUpdater>,
    validity: Arc<dyn PriorValidityProvider>,
    state: BTreeMap<String, ProfileState>,
    stop: CancellationToken,
}

impl ProfilesWatcher {
    /// Tracker for secrets in `namespace`
    ///
    /// `stop` is the token of the watch feeding this tracker.
    pub fn new(
        namespace: &str,
        cache: Arc<dyn SecretsCache>,
        updater: Arc<dyn SecretUpdater>,
        validity: Arc<dyn PriorValidityProvider>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            cache,
            updater,
            validity,
            state: BTreeMap::new(),
            stop,
        }
    }

    /// Stop the watch feeding this tracker; later calls do nothing
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Tracked `(ordinal, oldest_valid_ordinal)` of a profile
    pub fn ordinals(&self, profile_name: &str) -> Option<(u64, u64)> {
        self.state
            .get(profile_name)
            .map(|s| (s.ordinal, s.oldest_valid_ordinal))
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.namespace, name)
    }

    /// Process the latest content of a secret
    ///
    /// Returns true when a tracked ordinal changed and the router config
    /// needs the tracker applied.
    pub async fn handle_secret(&mut self, key: &str, secret: Option<&Secret>) -> Result<bool> {
        let Some(secret) = secret else {
            return Ok(false);
        };
        let secret_name = secret.name_any();
        let window = prior_valid_revisions(secret, self.validity.tls_prior_valid_revisions());

        let mut changed = false;
        let mut staged = Vec::new();
        let mut contexts = Vec::new();
        for profile_name in secret_profiles(&secret_name) {
            let Some(current) = self.state.get(&profile_name) else {
                continue;
            };
            let mut state = current.clone();
            match &state.secret_key {
                None => {
                    debug!(profile = %profile_name, secret = %key, "Binding profile to secret");
                    state.secret_key = Some(key.to_string());
                    // a recovered generation is the baseline for this content
                    if state.ordinal > 0 {
                        update_checksum(secret, &mut state.checksum);
                    }
                }
                Some(bound) if bound != key => {
                    warn!(
                        profile = %profile_name,
                        bound = %bound,
                        secret = %key,
                        "Ignoring secret for profile bound to a different secret"
                    );
                    continue;
                }
                Some(_) => {}
            }
            if update_checksum(secret, &mut state.checksum) {
                state.ordinal += 1;
                changed = true;
            }
            let next_oldest = state.ordinal.saturating_sub(window);
            if next_oldest > state.oldest_valid_ordinal {
                state.oldest_valid_ordinal = next_oldest;
                changed = true;
            }
            contexts.push(ProfileContext::new(profile_name.clone(), state.ordinal));
            staged.push((profile_name, state));
        }

        let mut updated = secret.clone();
        if update_secret_annotation(&mut updated, &contexts)? {
            debug!(secret = %key, context = ?contexts, "Updating ssl-profile-ordinal secret");
            self.updater.update_secret(&updated).await.map_err(|e| {
                Error::annotation(key, format!("error updating sslProfile secret annotations: {e}"))
            })?;
        }
        // ordinals only move once the secret carries them, so a redelivery
        // after a failed write recomputes the same change
        self.state.extend(staged);
        if changed {
            info!(secret = %key, context = ?contexts, "SslProfile secret changed");
        }
        Ok(changed)
    }

    /// Track exactly `profiles`
    ///
    /// Newly tracked profiles start from the ordinals in `profiles` and are
    /// matched against cached secrets right away. Dropped profiles have their
    /// secret re-checked so its annotation no longer lists them. Returns
    /// true when a tracked ordinal changed.
    pub async fn use_profiles(&mut self, profiles: &BTreeMap<String, SslProfile>) -> bool {
        let mut changed = false;
        for (profile_name, profile) in profiles {
            let state = self
                .state
                .entry(profile_name.clone())
                .or_insert_with(|| ProfileState {
                    ordinal: profile.ordinal,
                    oldest_valid_ordinal: profile.oldest_valid_ordinal,
                    ..Default::default()
                });
            if state.secret_key.is_some() {
                continue;
            }
            for secret_name in profile_secrets(profile_name) {
                let key = self.key(&secret_name);
                let Some(secret) = self.cache.get(&key) else {
                    continue;
                };
                if self.recheck(&key, &secret).await {
                    changed = true;
                }
            }
        }

        let dropped: Vec<(String, ProfileState)> = self
            .state
            .iter()
            .filter(|(name, _)| !profiles.contains_key(*name))
            .map(|(name, state)| (name.clone(), state.clone()))
            .collect();
        for (profile_name, state) in dropped {
            self.state.remove(&profile_name);
            debug!(profile = %profile_name, "Profile no longer used");
            let Some(key) = state.secret_key else {
                continue;
            };
            if let Some(secret) = self.cache.get(&key) {
                if self.recheck(&key, &secret).await {
                    changed = true;
                }
            }
        }
        changed
    }

    async fn recheck(&mut self, key: &str, secret: &Secret) -> bool {
        match self.handle_secret(key, Some(secret)).await {
            Ok(changed) => changed,
            Err(e) => {
                warn!(secret = %key, error = %e, "Failed to handle cached secret");
                false
            }
        }
    }
}

impl ConfigUpdate for ProfilesWatcher {
    fn apply(&mut self, config: &mut RouterConfig) -> bool {
        let mut changed = false;
        for (profile_name, configured) in config.ssl_profiles.iter_mut() {
            let Some(state) = self.state.get(profile_name) else {
                continue;
            };
            if configured.ordinal != state.ordinal {
                configured.ordinal = state.ordinal;
                changed = true;
            }
            if configured.oldest_valid_ordinal != state.oldest_valid_ordinal {
                configured.oldest_valid_ordinal = state.oldest_valid_ordinal;
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use parking_lot::Mutex;

    use interconnect_common::ANNOTATION_TLS_PROFILE_CONTEXT;
    use interconnect_router::config::configure_ssl_profile;

    use super::*;
    use crate::annotations::profile_contexts_from_secret;
    use crate::cache::testing::StubSecretsCache;

    struct Window(u64);

    impl PriorValidityProvider for Window {
        fn tls_prior_valid_revisions(&self) -> u64 {
            self.0
        }
    }

    fn tls_secret(name: &str, content: &str) -> Secret {
        let data = ["ca.crt", "tls.crt", "tls.key"]
            .iter()
            .map(|k| (k.to_string(), ByteString(format!("{k} - {content}").into_bytes())))
            .collect::<BTreeMap<_, _>>();
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("testing".to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    fn profiles(names: &[(&str, u64)]) -> BTreeMap<String, SslProfile> {
        names
            .iter()
            .map(|(name, ordinal)| {
                let mut profile = configure_ssl_profile(name, "/certs", true);
                profile.ordinal = *ordinal;
                (name.to_string(), profile)
            })
            .collect()
    }

    /// Updater recording every written secret
    fn recording_updater() -> (MockSecretUpdater, Arc<Mutex<Vec<Secret>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = written.clone();
        let mut updater = MockSecretUpdater::new();
        updater.expect_update_secret().returning(move |secret| {
            sink.lock().push(secret.clone());
            Ok(())
        });
        (updater, written)
    }

    fn watcher(
        cache: Arc<StubSecretsCache>,
        updater: MockSecretUpdater,
        window: u64,
    ) -> ProfilesWatcher {
        ProfilesWatcher::new(
            "testing",
            cache,
            Arc::new(updater),
            Arc::new(Window(window)),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn ordinal_advances_only_on_content_change() {
        let cache = Arc::new(StubSecretsCache::default());
        let (updater, written) = recording_updater();
        let mut w = watcher(cache.clone(), updater, 10);
        w.use_profiles(&profiles(&[("test-tls", 0)])).await;

        let first = tls_secret("test-tls", "v1");
        assert!(w.handle_secret("testing/test-tls", Some(&first)).await.unwrap());
        assert_eq!(w.ordinals("test-tls"), Some((1, 0)));
        assert_eq!(written.lock().len(), 1);
        let annotated = written.lock()[0].clone();
        assert_eq!(
            profile_contexts_from_secret(&annotated).unwrap().unwrap(),
            vec![ProfileContext::new("test-tls", 1)]
        );

        // the write-back echoes through the watch with identical data
        assert!(!w.handle_secret("testing/test-tls", Some(&annotated)).await.unwrap());
        assert_eq!(w.ordinals("test-tls"), Some((1, 0)));
        assert_eq!(written.lock().len(), 1);

        let mut rotated = tls_secret("test-tls", "v2");
        rotated.metadata.annotations = annotated.metadata.annotations.clone();
        assert!(w.handle_secret("testing/test-tls", Some(&rotated)).await.unwrap());
        assert_eq!(w.ordinals("test-tls"), Some((2, 0)));
        assert_eq!(written.lock().len(), 2);
    }

    #[tokio::test]
    async fn oldest_valid_ordinal_follows_window() {
        let cache = Arc::new(StubSecretsCache::default());
        let (updater, _) = recording_updater();
        let mut w = watcher(cache, updater, 1);
        w.use_profiles(&profiles(&[("test-tls", 0)])).await;

        w.handle_secret("testing/test-tls", Some(&tls_secret("test-tls", "v1")))
            .await
            .unwrap();
        assert_eq!(w.ordinals("test-tls"), Some((1, 0)));
        w.handle_secret("testing/test-tls", Some(&tls_secret("test-tls", "v2")))
            .await
            .unwrap();
        assert_eq!(w.ordinals("test-tls"), Some((2, 1)));
    }

    #[tokio::test]
    async fn recovered_ordinal_is_kept_as_baseline() {
        let cache = Arc::new(StubSecretsCache::default());
        let (updater, _) = recording_updater();
        let mut w = watcher(cache, updater, 10);
        w.use_profiles(&profiles(&[("test-tls", 4)])).await;

        let changed = w
            .handle_secret("testing/test-tls", Some(&tls_secret("test-tls", "v1")))
            .await
            .unwrap();
        assert!(!changed);
        assert_eq!(w.ordinals("test-tls"), Some((4, 0)));
    }

    #[tokio::test]
    async fn profile_is_not_rebound_to_another_secret() {
        let cache = Arc::new(StubSecretsCache::default());
        let (updater, _) = recording_updater();
        let mut w = watcher(cache, updater, 10);
        w.use_profiles(&profiles(&[("test-tls", 0)])).await;

        w.handle_secret("testing/test-tls", Some(&tls_secret("test-tls", "v1")))
            .await
            .unwrap();
        let changed = w
            .handle_secret("other/test-tls", Some(&tls_secret("test-tls", "v2")))
            .await
            .unwrap();
        assert!(!changed);
        assert_eq!(w.ordinals("test-tls"), Some((1, 0)));
    }

    #[tokio::test]
    async fn untracked_and_deleted_secrets_are_ignored() {
        let cache = Arc::new(StubSecretsCache::default());
        let mut updater = MockSecretUpdater::new();
        updater.expect_update_secret().times(0);
        let mut w = watcher(cache, updater, 10);

        assert!(!w
            .handle_secret("testing/unrelated", Some(&tls_secret("unrelated", "v1")))
            .await
            .unwrap());
        assert!(!w.handle_secret("testing/unrelated", None).await.unwrap());
    }

    #[tokio::test]
    async fn new_profiles_probe_cached_secrets() {
        let cache = Arc::new(StubSecretsCache::default());
        cache.insert(tls_secret("db-tls", "v1"));
        let (updater, written) = recording_updater();
        let mut w = watcher(cache, updater, 10);

        assert!(w.use_profiles(&profiles(&[("db-tls-profile", 0)])).await);
        assert_eq!(w.ordinals("db-tls-profile"), Some((1, 0)));
        let annotated = written.lock()[0].clone();
        assert_eq!(
            profile_contexts_from_secret(&annotated).unwrap().unwrap(),
            vec![ProfileContext::new("db-tls-profile", 1)]
        );
    }

    #[tokio::test]
    async fn dropped_profiles_are_cleared_from_annotation() {
        let cache = Arc::new(StubSecretsCache::default());
        let (updater, written) = recording_updater();
        let mut w = watcher(cache.clone(), updater, 10);
        w.use_profiles(&profiles(&[("test-tls", 0)])).await;

        w.handle_secret("testing/test-tls", Some(&tls_secret("test-tls", "v1")))
            .await
            .unwrap();
        let annotated = written.lock()[0].clone();
        cache.insert(annotated);

        w.use_profiles(&BTreeMap::new()).await;
        assert_eq!(w.ordinals("test-tls"), None);
        let cleared = written.lock().last().cloned().unwrap();
        assert!(!cleared
            .metadata
            .annotations
            .unwrap_or_default()
            .contains_key(ANNOTATION_TLS_PROFILE_CONTEXT));
    }

    #[tokio::test]
    async fn apply_copies_ordinals_into_config() {
        let cache = Arc::new(StubSecretsCache::default());
        let (updater, _) = recording_updater();
        let mut w = watcher(cache, updater, 1);
        w.use_profiles(&profiles(&[("test-tls", 0)])).await;
        w.handle_secret("testing/test-tls", Some(&tls_secret("test-tls", "v1")))
            .await
            .unwrap();
        w.handle_secret("testing/test-tls", Some(&tls_secret("test-tls", "v2")))
            .await
            .unwrap();

        let mut config = RouterConfig::default();
        config.add_ssl_profile(configure_ssl_profile("test-tls", "/certs", true));
        config.add_ssl_profile(configure_ssl_profile("other", "/certs", true));
        assert!(w.apply(&mut config));
        assert_eq!(config.ssl_profiles["test-tls"].ordinal, 2);
        assert_eq!(config.ssl_profiles["test-tls"].oldest_valid_ordinal, 1);
        assert_eq!(config.ssl_profiles["other"].ordinal, 0);
        assert!(!w.apply(&mut config));
    }

    #[tokio::test]
    async fn annotation_write_failure_is_reported() {
        let cache = Arc::new(StubSecretsCache::default());
        let mut updater = MockSecretUpdater::new();
        updater
            .expect_update_secret()
            .returning(|_| Err(Error::internal("conflict")));
        let mut w = watcher(cache, updater, 10);
        w.use_profiles(&profiles(&[("test-tls", 0)])).await;

        let err = w
            .handle_secret("testing/test-tls", Some(&tls_secret("test-tls", "v1")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("testing/test-tls"));
    }

    #[tokio::test]
    async fn failed_annotation_write_is_retried_on_redelivery() {
        let cache = Arc::new(StubSecretsCache::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut updater = MockSecretUpdater::new();
        updater.expect_update_secret().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                Err(Error::internal("conflict"))
            } else {
                Ok(())
            }
        });
        let mut w = watcher(cache, updater, 10);
        w.use_profiles(&profiles(&[("test-tls", 0)])).await;

        w.handle_secret("testing/test-tls", Some(&tls_secret("test-tls", "v1")))
            .await
            .unwrap();
        assert_eq!(w.ordinals("test-tls"), Some((1, 0)));

        let rotated = tls_secret("test-tls", "v2");
        assert!(w.handle_secret("testing/test-tls", Some(&rotated)).await.is_err());
        assert_eq!(w.ordinals("test-tls"), Some((1, 0)));

        assert!(w.handle_secret("testing/test-tls", Some(&rotated)).await.unwrap());
        assert_eq!(w.ordinals("test-tls"), Some((2, 0)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stop_is_idempotent() {
        let cache = Arc::new(StubSecretsCache::default());
        let token = CancellationToken::new();
        let w = ProfilesWatcher::new(
            "testing",
            cache,
            Arc::new(MockSecretUpdater::new()),
            Arc::new(Window(1)),
            token.clone(),
        );
        w.stop();
        w.stop();
        assert!(token.is_cancelled());
    }
}
