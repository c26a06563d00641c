//! Secret cache and watch
//!
//! A kube-runtime reflector keeps an in-memory copy of the namespace's
//! secrets; a forwarding task turns watch events into [`SecretEvent`]s on a
//! bounded channel. Delivery is at-least-once and ordered per key.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::ResourceExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use interconnect_common::{Error, Result};

/// Capacity of the secret event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// `namespace/name` key of a secret
pub fn secret_key(secret: &Secret) -> String {
    format!("{}/{}", secret.namespace().unwrap_or_default(), secret.name_any())
}

/// Read access to the latest known secrets
pub trait SecretsCache: Send + Sync {
    /// Secret by `namespace/name` key
    fn get(&self, key: &str) -> Option<Arc<Secret>>;

    /// Every cached secret
    fn list(&self) -> Vec<Arc<Secret>>;
}

/// A secret changed (`Some`) or was deleted (`None`)
#[derive(Debug, Clone)]
pub struct SecretEvent {
    /// `namespace/name` key
    pub key: String,
    /// Latest content, `None` once deleted
    pub secret: Option<Arc<Secret>>,
}

/// [`SecretsCache`] backed by a reflector store
#[derive(Clone)]
pub struct KubeSecretsCache {
    store: Store<Secret>,
}

impl KubeSecretsCache {
    /// Wait until the initial list has been loaded
    pub async fn ready(&self) -> Result<()> {
        self.store
            .wait_until_ready()
            .await
            .map_err(|e| Error::internal_with_context("cache", e.to_string()))
    }
}

impl SecretsCache for KubeSecretsCache {
    fn get(&self, key: &str) -> Option<Arc<Secret>> {
        let (namespace, name) = key.split_once('/')?;
        self.store
            .get(&ObjectRef::new(name).within(namespace))
    }

    fn list(&self) -> Vec<Arc<Secret>> {
        self.store.state()
    }
}

/// A running secret watch
pub struct SecretWatch {
    /// Cache fed by the watch
    pub cache: KubeSecretsCache,
    /// Change events
    pub events: mpsc::Receiver<SecretEvent>,
    /// Forwarding task, ends when `stop` fires or the receiver is dropped
    pub task: JoinHandle<()>,
}

/// Watch secrets through `api` until `stop` is cancelled
pub fn watch_secrets(api: Api<Secret>, config: watcher::Config, stop: CancellationToken) -> SecretWatch {
    let (reader, writer) = reflector::store();
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let stream = reflector::reflector(writer, watcher::watcher(api, config)).default_backoff();

    let task = tokio::spawn(async move {
        let mut stream = std::pin::pin!(stream);
        info!("Starting secret watch");
        loop {
            let event = tokio::select! {
                _ = stop.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        warn!(error = %e, "Secret watch error");
                        continue;
                    }
                    None => break,
                },
            };
            let forwarded = match event {
                Event::Apply(secret) | Event::InitApply(secret) => SecretEvent {
                    key: secret_key(&secret),
                    secret: Some(Arc::new(secret)),
                },
                Event::Delete(secret) => SecretEvent {
                    key: secret_key(&secret),
                    secret: None,
                },
                Event::Init | Event::InitDone => continue,
            };
            debug!(secret = %forwarded.key, deleted = forwarded.secret.is_none(), "Secret event");
            if tx.send(forwarded).await.is_err() {
                debug!("Secret event channel closed, stopping watch");
                break;
            }
        }
        info!("Secret watch stopped");
    });

    SecretWatch {
        cache: KubeSecretsCache { store: reader },
        events: rx,
        task,
    }
}
