//! Secret content synchronizer
//!
//! Materializes the certificate material of every configured SSL profile
//! onto the local filesystem. Secrets announce the profiles they back (and
//! the generation they back them at) through the profile-context
//! annotation; [`SecretSync::expect`] reports how far the files on disk are
//! from what the router configuration asks for.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use interconnect_common::{Error, Result};
use interconnect_router::SslProfile;

use crate::annotations::{profile_contexts_from_secret, update_checksum, Checksum, ProfileContext};
use crate::cache::{secret_key, SecretsCache};

const DIR_MODE: u32 = 0o755;
const CERT_MODE: u32 = 0o644;
const KEY_MODE: u32 = 0o600;

/// Invoked with a profile name whenever that profile's material changed
pub type Callback = Box<dyn Fn(&str) + Send + Sync>;

/// Last secret content seen for a profile
#[derive(Debug, Clone, Default)]
struct SyncContext {
    ordinal: u64,
    secret_key: String,
    checksum: Option<Checksum>,
}

#[derive(Debug, Default)]
struct SyncState {
    configured: BTreeMap<String, SslProfile>,
    profiles: BTreeMap<String, SyncContext>,
}

impl SyncState {
    /// Returns true when the profile now holds material at or beyond the
    /// configured ordinal and something actually moved.
    fn handle_profile(&mut self, key: &str, secret: &Secret, pctx: &ProfileContext) -> Result<bool> {
        let name = &pctx.profile_name;
        let prev = self.profiles.get(name).cloned();
        if let Some(prev) = &prev {
            if pctx.ordinal < prev.ordinal {
                info!(
                    profile = %name,
                    secret = %key,
                    want_ordinal = prev.ordinal,
                    have_ordinal = pctx.ordinal,
                    "Ignoring secret update downgrading ordinal"
                );
                return Ok(false);
            }
        }

        let Some(configured) = self.configured.get(name) else {
            self.profiles.insert(
                name.clone(),
                SyncContext {
                    ordinal: pctx.ordinal,
                    secret_key: key.to_string(),
                    checksum: None,
                },
            );
            return Ok(false);
        };

        let prev_ordinal = prev.as_ref().map_or(0, |p| p.ordinal);
        let mut checksum = prev.as_ref().and_then(|p| p.checksum);
        let sum_changed = update_checksum(secret, &mut checksum);

        let mut wrote = false;
        if prev.is_none() || sum_changed {
            write_ssl_profile(key, secret, configured)?;
            info!(
                profile = %name,
                secret = %key,
                prev_ordinal,
                has_ordinal = pctx.ordinal,
                wants_ordinal = configured.ordinal,
                "Wrote SslProfile contents"
            );
            wrote = true;
        }
        let advanced = prev_ordinal < pctx.ordinal;
        if !wrote && advanced {
            info!(
                profile = %name,
                secret = %key,
                prev_ordinal,
                has_ordinal = pctx.ordinal,
                wants_ordinal = configured.ordinal,
                "SslProfile secret ordinal advanced"
            );
        }
        let viable = configured.ordinal <= pctx.ordinal && (wrote || advanced);

        self.profiles.insert(
            name.clone(),
            SyncContext {
                ordinal: pctx.ordinal,
                secret_key: key.to_string(),
                checksum,
            },
        );
        Ok(viable)
    }
}

/// Keeps profile material on disk in step with the router configuration
pub struct SecretSync {
    cache: Arc<dyn SecretsCache>,
    callback: Option<Callback>,
    state: Mutex<SyncState>,
    stop: CancellationToken,
}

impl SecretSync {
    /// Synchronizer reading secrets from `cache`
    ///
    /// `stop` is the token of the watch feeding this synchronizer.
    pub fn new(cache: Arc<dyn SecretsCache>, callback: Option<Callback>, stop: CancellationToken) -> Self {
        Self {
            cache,
            callback,
            state: Mutex::new(SyncState::default()),
            stop,
        }
    }

    /// Stop the watch feeding this synchronizer; later calls do nothing
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Replay every cached secret
    pub fn recover(&self) {
        for secret in self.cache.list() {
            let key = secret_key(&secret);
            if let Err(e) = self.handle(&key, Some(&*secret)) {
                error!(secret = %key, error = %e, "Recovery error");
            }
        }
    }

    /// Process the latest content of a secret
    ///
    /// The callback fires for every listed profile that became viable, after
    /// the state lock is released.
    pub fn handle(&self, key: &str, secret: Option<&Secret>) -> Result<()> {
        let Some(secret) = secret else {
            return Ok(());
        };
        let Some(contexts) = profile_contexts_from_secret(secret)
            .map_err(|e| Error::annotation(key, format!("failed to decode secret metadata: {e}")))?
        else {
            return Ok(());
        };

        let mut updated = Vec::new();
        let mut result = Ok(());
        {
            let mut state = self.state.lock();
            for pctx in &contexts {
                match state.handle_profile(key, secret, pctx) {
                    Ok(true) => updated.push(pctx.profile_name.clone()),
                    Ok(false) => {}
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
        }
        for profile_name in &updated {
            self.notify(profile_name);
        }
        result
    }

    /// Make `profiles` the configured set and report what is not yet on disk
    ///
    /// Profiles whose secret is current get their cached content
    /// re-materialized, which writes nothing unless the content changed.
    /// The callback fires for every profile this brought up to date.
    pub fn expect(&self, profiles: &BTreeMap<String, SslProfile>) -> SyncDelta {
        let mut delta = SyncDelta::default();
        let mut updated = Vec::new();
        {
            let mut state = self.state.lock();
            state.configured = profiles.clone();

            for (profile_name, profile) in profiles {
                let Some(context) = state.profiles.get(profile_name).cloned() else {
                    delta.missing.push(profile_name.clone());
                    continue;
                };
                if context.ordinal < profile.ordinal {
                    delta.pending_ordinals.insert(
                        profile_name.clone(),
                        OrdinalDelta {
                            secret_name: context.secret_key,
                            expect: profile.ordinal,
                            current: context.ordinal,
                        },
                    );
                    continue;
                }
                let Some(secret) = self.cache.get(&context.secret_key) else {
                    continue;
                };
                let pctx = ProfileContext::new(profile_name.clone(), context.ordinal);
                match state.handle_profile(&context.secret_key, &secret, &pctx) {
                    Ok(true) => updated.push(profile_name.clone()),
                    Ok(false) => {}
                    Err(e) => delta.errors.push(e),
                }
            }
        }
        for profile_name in &updated {
            self.notify(profile_name);
        }
        if !delta.is_empty() {
            debug!(summary = %delta, "Secrets not yet synchronized");
        }
        delta
    }

    fn notify(&self, profile_name: &str) {
        if let Some(callback) = &self.callback {
            callback(profile_name);
        }
    }
}

/// Generation gap between a profile's configuration and its secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrdinalDelta {
    /// Key of the backing secret
    pub secret_name: String,
    /// Configured ordinal
    pub expect: u64,
    /// Ordinal the secret last announced
    pub current: u64,
}

/// Outcome of [`SecretSync::expect`]
#[derive(Debug, Default)]
pub struct SyncDelta {
    /// Configured profiles no secret has registered for
    pub missing: Vec<String>,
    /// Profiles whose secret is behind the configuration
    pub pending_ordinals: BTreeMap<String, OrdinalDelta>,
    /// Failed re-materializations
    pub errors: Vec<Error>,
}

impl SyncDelta {
    /// Everything configured is on disk
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.pending_ordinals.is_empty() && self.errors.is_empty()
    }

    /// Summary error, `None` when empty
    pub fn error(&self) -> Option<Error> {
        if self.is_empty() {
            return None;
        }
        Some(Error::internal_with_context("sync", self.to_string()))
    }
}

impl fmt::Display for SyncDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| e.to_string())
            .chain(
                self.missing
                    .iter()
                    .map(|name| format!("missing secret for profile {name:?}")),
            )
            .chain(self.pending_ordinals.iter().map(|(name, d)| {
                format!(
                    "profile {name:?} configured with ordinal {}, but secret {:?} has {}",
                    d.expect, d.secret_name, d.current
                )
            }))
            .collect();
        write!(f, "secrets not synchronized with router config: {}", parts.join(", "))
    }
}

/// Write a profile's files from the secret content
///
/// Empty target paths are skipped, so a CA-only profile gets `ca.crt` only.
fn write_ssl_profile(key: &str, secret: &Secret, profile: &SslProfile) -> Result<()> {
    let fail = |msg: String| Error::profile_write(&profile.name, key, msg);
    if profile.ca_cert_file.is_empty() {
        return Err(fail("profile has no CA file".to_string()));
    }
    if let Some(dir) = Path::new(&profile.ca_cert_file).parent() {
        DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(dir)
            .map_err(|e| fail(format!("error making certificates directory {}: {e}", dir.display())))?;
    }

    let files = [
        (profile.ca_cert_file.as_str(), "ca.crt", CERT_MODE),
        (profile.cert_file.as_str(), "tls.crt", CERT_MODE),
        (profile.private_key_file.as_str(), "tls.key", KEY_MODE),
    ];
    for (path, data_key, mode) in files {
        if path.is_empty() {
            continue;
        }
        let data = secret
            .data
            .as_ref()
            .and_then(|d| d.get(data_key))
            .ok_or_else(|| fail(format!("secret has no {data_key}")))?;
        write_file(Path::new(path), &data.0, mode)
            .map_err(|e| fail(format!("error writing {data_key}: {e}")))?;
    }
    Ok(())
}

fn write_file(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .map_err(|e| Error::io(path, e))?;
    file.write_all(data).map_err(|e| Error::io(path, e))?;
    // mode only applies on create
    fs::set_permissions(path, Permissions::from_mode(mode)).map_err(|e| Error::io(path, e))
}
