//! The support profile: people to reach out to and what helps.
//!
//! Stored under its own `lifeops:` key, so backups pick it up with the rest
//! of the app data.

use crate::backend::StorageBackend;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const SUPPORT_PROFILE_KEY: &str = "lifeops:support:profile";

/// Someone to contact when things get hard.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustedPerson {
    pub name: String,
    /// How to reach them: call, text, in person.
    pub method: String,
    pub notes: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SupportProfile {
    pub trusted_people: Vec<TrustedPerson>,
    pub early_warning_signs: String,
    pub what_helps: String,
    pub grounding_kit: String,
}

impl SupportProfile {
    /// True if nothing has been filled in.
    pub fn is_empty(&self) -> bool {
        self == &SupportProfile::default()
    }
}

/// Read the support profile. A missing or corrupt value reads as the
/// default profile; missing fields take their defaults.
pub fn get_support_profile<B: StorageBackend + ?Sized>(backend: &B) -> SupportProfile {
    let Some(raw) = backend.get_item(SUPPORT_PROFILE_KEY) else {
        return SupportProfile::default();
    };
    serde_json::from_str(&raw).unwrap_or_else(|err| {
        warn!(%err, "support profile is corrupt, using defaults");
        SupportProfile::default()
    })
}

/// Overwrite the support profile.
pub fn set_support_profile<B: StorageBackend + ?Sized>(
    backend: &B,
    profile: &SupportProfile,
) -> Result<()> {
    backend.set_item(SUPPORT_PROFILE_KEY, &serde_json::to_string(profile)?)
}
