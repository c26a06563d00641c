//! Secret annotations and content checksums
//!
//! A secret backing SSL profiles carries the JSON list of
//! `{profileName, ordinal}` it was last seen with, so the ordinal of every
//! profile survives a controller restart.

use aws_lc_rs::digest::{Context, SHA256};
use k8s_openapi::api::core::v1::Secret;
use serde::{Deserialize, Serialize};
use tracing::warn;

use interconnect_common::{
    Error, Result, ANNOTATION_TLS_PRIOR_VALID_REVISIONS, ANNOTATION_TLS_PROFILE_CONTEXT,
};
use interconnect_router::config::CA_ONLY_PROFILE_SUFFIX;

use crate::cache::secret_key;

/// SHA-256 over a secret's data
pub type Checksum = [u8; 32];

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// A profile a secret backs, and the generation it backs it at
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileContext {
    /// SSL profile name
    pub profile_name: String,
    /// Generation of the secret content for this profile
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ordinal: u64,
}

impl ProfileContext {
    /// Context for `profile_name` at `ordinal`
    pub fn new(profile_name: impl Into<String>, ordinal: u64) -> Self {
        Self {
            profile_name: profile_name.into(),
            ordinal,
        }
    }
}

/// Decode the profile contexts stored on a secret
///
/// `None` when the secret carries no annotation.
pub fn profile_contexts_from_secret(secret: &Secret) -> Result<Option<Vec<ProfileContext>>> {
    let Some(raw) = secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_TLS_PROFILE_CONTEXT))
    else {
        return Ok(None);
    };
    serde_json::from_str(raw)
        .map(Some)
        .map_err(|e| Error::annotation(secret_key(secret), format!("invalid profile context: {e}")))
}

/// Store `contexts` on the secret unless it already carries the same set
///
/// Order does not matter. An empty set removes the annotation. Returns
/// whether the secret was modified and needs writing back.
pub fn update_secret_annotation(secret: &mut Secret, contexts: &[ProfileContext]) -> Result<bool> {
    let mut desired = contexts.to_vec();
    desired.sort();

    match profile_contexts_from_secret(secret) {
        Ok(existing) => {
            let mut existing = existing.unwrap_or_default();
            existing.sort();
            if existing == desired {
                return Ok(false);
            }
        }
        Err(e) => warn!(error = %e, "Replacing invalid profile context annotation"),
    }

    let encoded = if desired.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&desired).map_err(|e| {
            Error::annotation(secret_key(secret), format!("failed to encode profile context: {e}"))
        })?)
    };
    let annotations = secret.metadata.annotations.get_or_insert_with(Default::default);
    match encoded {
        Some(encoded) => {
            annotations.insert(ANNOTATION_TLS_PROFILE_CONTEXT.to_string(), encoded);
        }
        None => {
            annotations.remove(ANNOTATION_TLS_PROFILE_CONTEXT);
        }
    }
    Ok(true)
}

/// Checksum of a secret's data
///
/// Keys are visited in sorted order with each key and value length
/// prefixed, so moving bytes between entries changes the sum.
pub fn content_checksum(secret: &Secret) -> Checksum {
    let mut context = Context::new(&SHA256);
    if let Some(data) = &secret.data {
        for (key, value) in data {
            context.update(&(key.len() as u64).to_be_bytes());
            context.update(key.as_bytes());
            context.update(&(value.0.len() as u64).to_be_bytes());
            context.update(&value.0);
        }
    }
    let mut sum = [0u8; 32];
    sum.copy_from_slice(context.finish().as_ref());
    sum
}

/// Refresh a stored checksum, returning true if it changed
pub fn update_checksum(secret: &Secret, stored: &mut Option<Checksum>) -> bool {
    let sum = content_checksum(secret);
    if *stored == Some(sum) {
        return false;
    }
    *stored = Some(sum);
    true
}

/// Secret names that may back a profile
pub fn profile_secrets(profile_name: &str) -> Vec<String> {
    let mut names = vec![profile_name.to_string()];
    if let Some(base) = profile_name.strip_suffix(CA_ONLY_PROFILE_SUFFIX) {
        names.push(base.to_string());
    }
    names
}

/// Profile names a secret may back
pub fn secret_profiles(secret_name: &str) -> Vec<String> {
    let paired = match secret_name.strip_suffix(CA_ONLY_PROFILE_SUFFIX) {
        Some(base) => base.to_string(),
        None => format!("{secret_name}{CA_ONLY_PROFILE_SUFFIX}"),
    };
    vec![secret_name.to_string(), paired]
}

/// Prior-valid-revisions window for a secret
///
/// The secret's annotation overrides `default`; an unparsable value is
/// logged and ignored.
pub fn prior_valid_revisions(secret: &Secret, default: u64) -> u64 {
    let Some(raw) = secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_TLS_PRIOR_VALID_REVISIONS))
    else {
        return default;
    };
    match raw.parse::<u64>() {
        Ok(window) => window,
        Err(e) => {
            warn!(
                secret = %secret_key(secret),
                value = %raw,
                error = %e,
                "Using default tls-prior-valid-revisions for secret with invalid annotation"
            );
            default
        }
    }
}
