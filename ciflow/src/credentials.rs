//! Credential sets and the gate that turns them into capability decisions.
//!
//! Environment lookup happens once, in [`RunCredentials::from_env`]. Everything
//! downstream receives the snapshot explicitly, so [`CredentialGate::evaluate`]
//! stays a pure function.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// Names of the secret keys each gated resource requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialKeys {
    /// Key holding the fixture host.
    pub host: String,
    /// Key holding the fixture host user.
    pub username: String,
    /// Key holding the fixture host password.
    pub password: String,
    /// Key holding the coverage reporter identifier.
    pub reporter_id: String,
}

impl Default for CredentialKeys {
    fn default() -> Self {
        Self {
            host: "HOST".to_string(),
            username: "USERNAME".to_string(),
            password: "PASSWORD".to_string(),
            reporter_id: "REPORTER_ID".to_string(),
        }
    }
}

impl CredentialKeys {
    /// Keys required by the remote fixture gate.
    #[must_use]
    pub fn remote_access(&self) -> Vec<String> {
        vec![self.host.clone(), self.username.clone(), self.password.clone()]
    }

    /// Keys required by the publish gate.
    #[must_use]
    pub fn publish(&self) -> Vec<String> {
        vec![self.reporter_id.clone()]
    }

    /// Key names required by both gates. Must be empty for the gates to be
    /// independent.
    #[must_use]
    pub fn shared(&self) -> Vec<String> {
        let publish = self.publish();
        self.remote_access()
            .into_iter()
            .filter(|key| publish.contains(key))
            .collect()
    }
}

/// Name of the set that opens remote fixture access.
pub const REMOTE_ACCESS_SET: &str = "remote-access";

/// Name of the set that opens coverage publishing.
pub const PUBLISH_SET: &str = "publish";

/// The two credential snapshots a run is gated on.
///
/// Each gate only ever sees its own set, so a secret in one can never open
/// the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCredentials {
    /// Secrets for the fixture host.
    pub remote_access: CredentialSet,
    /// Secrets for the coverage service.
    pub publish: CredentialSet,
}

impl Default for RunCredentials {
    fn default() -> Self {
        Self::new(CredentialSet::new(REMOTE_ACCESS_SET), CredentialSet::new(PUBLISH_SET))
    }
}

impl RunCredentials {
    /// Pairs two existing sets.
    #[must_use]
    pub fn new(remote_access: CredentialSet, publish: CredentialSet) -> Self {
        Self {
            remote_access,
            publish,
        }
    }

    /// Builds both sets through `lookup`, each from its own keys only.
    pub fn from_lookup<F>(keys: &CredentialKeys, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            remote_access: CredentialSet::from_lookup(
                REMOTE_ACCESS_SET,
                &keys.remote_access(),
                &lookup,
            ),
            publish: CredentialSet::from_lookup(PUBLISH_SET, &keys.publish(), &lookup),
        }
    }

    /// Snapshots both sets from the process environment.
    #[must_use]
    pub fn from_env(keys: &CredentialKeys) -> Self {
        Self::from_lookup(keys, |key| std::env::var(key).ok())
    }
}

/// A named snapshot of secret values.
///
/// A key may be absent, present but empty, or present with a value. Only the
/// last counts towards completeness.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    name: String,
    values: BTreeMap<String, Option<String>>,
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present: BTreeMap<&str, bool> = self
            .values
            .keys()
            .map(|k| (k.as_str(), self.get(k).is_some()))
            .collect();
        f.debug_struct("CredentialSet")
            .field("name", &self.name)
            .field("present", &present)
            .finish()
    }
}

impl CredentialSet {
    /// Creates an empty credential set.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    /// Builds a set by looking up each key through `lookup`.
    pub fn from_lookup<F>(name: impl Into<String>, keys: &[String], lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut set = Self::new(name);
        for key in keys {
            set.values.insert(key.clone(), lookup(key));
        }
        set
    }

    /// Sets a value.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), Some(value.into()));
        self
    }

    /// Records a key as known but unset.
    #[must_use]
    pub fn with_missing(mut self, key: impl Into<String>) -> Self {
        self.values.insert(key.into(), None);
        self
    }

    /// Returns the set name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a value if it is present and not blank.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(Option::as_deref)
            .filter(|v| !v.trim().is_empty())
    }

    /// Returns the required keys that are absent or blank.
    #[must_use]
    pub fn missing_keys<S: AsRef<str>>(&self, required: &[S]) -> Vec<String> {
        let mut missing = Vec::new();
        for key in required {
            let key: &str = key.as_ref();
            if self.get(key).is_none() {
                missing.push(key.to_string());
            }
        }
        missing
    }

    /// Returns true if every required key has a non-empty value.
    #[must_use]
    pub fn is_complete<S: AsRef<str>>(&self, required: &[S]) -> bool {
        self.missing_keys(required).is_empty()
    }
}

/// Capability flag computed from one credential set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// All required credentials are present.
    Granted,
    /// At least one required credential is missing.
    Denied,
}

impl GateDecision {
    /// Returns true if the gate is open.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => write!(f, "granted"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

/// Evaluates credential completeness.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialGate;

impl CredentialGate {
    /// Returns `Granted` iff every key in `required_keys` has a non-empty value.
    pub fn evaluate<S: AsRef<str>>(required_keys: &[S], provided: &CredentialSet) -> GateDecision {
        let missing = provided.missing_keys(required_keys);
        if missing.is_empty() {
            info!(credential_set = %provided.name(), "Credentials found");
            GateDecision::Granted
        } else {
            warn!(
                credential_set = %provided.name(),
                missing = ?missing,
                "Credentials missing"
            );
            GateDecision::Denied
        }
    }
}

/// Login material for the fixture host.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionCredentials {
    /// Remote host name.
    pub host: String,
    /// Remote user.
    pub username: String,
    /// Password for the remote user.
    pub password: String,
}

impl fmt::Debug for ConnectionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCredentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ConnectionCredentials {
    /// Extracts connection credentials from a complete set.
    #[must_use]
    pub fn from_set(set: &CredentialSet, keys: &CredentialKeys) -> Option<Self> {
        Some(Self {
            host: set.get(&keys.host)?.to_string(),
            username: set.get(&keys.username)?.to_string(),
            password: set.get(&keys.password)?.to_string(),
        })
    }
}

/// Credentials for the coverage reporting service.
#[derive(Clone, PartialEq, Eq)]
pub struct PublishCredentials {
    /// Reporter identifier (project token).
    pub reporter_id: String,
}

impl fmt::Debug for PublishCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishCredentials")
            .field("reporter_id", &"<redacted>")
            .finish()
    }
}

impl PublishCredentials {
    /// Extracts publish credentials from a set, if complete.
    #[must_use]
    pub fn from_set(set: &CredentialSet, keys: &CredentialKeys) -> Option<Self> {
        set.get(&keys.reporter_id).map(|id| Self {
            reporter_id: id.to_string(),
        })
    }
}
