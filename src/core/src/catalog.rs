//! Declarative catalog records and their observed status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};

/// Condition type reporting whether the last sync attempt converged.
pub const TYPE_PROGRESSING: &str = "Progressing";
/// Condition type reporting whether content is served locally.
pub const TYPE_SERVING: &str = "Serving";

/// Condition reasons.
pub mod reasons {
    pub const SUCCEEDED: &str = "Succeeded";
    pub const RETRYING: &str = "Retrying";
    pub const BLOCKED: &str = "Blocked";
    pub const AVAILABLE: &str = "Available";
    pub const USER_SPECIFIED_UNAVAILABLE: &str = "UserSpecifiedUnavailable";
}

/// Kind of remote a catalog is fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Image,
    Web,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Image => write!(f, "image"),
            SourceType::Web => write!(f, "web"),
        }
    }
}

/// Where a catalog's content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceDescriptor {
    Image {
        reference: String,
        #[serde(default, rename = "pollIntervalMinutes", skip_serializing_if = "Option::is_none")]
        poll_interval_minutes: Option<u32>,
    },
    Web {
        url: String,
        #[serde(default, rename = "pollIntervalMinutes", skip_serializing_if = "Option::is_none")]
        poll_interval_minutes: Option<u32>,
    },
}

impl SourceDescriptor {
    pub fn source_type(&self) -> SourceType {
        match self {
            SourceDescriptor::Image { .. } => SourceType::Image,
            SourceDescriptor::Web { .. } => SourceType::Web,
        }
    }

    pub fn poll_interval(&self) -> Option<chrono::Duration> {
        let minutes = match self {
            SourceDescriptor::Image {
                poll_interval_minutes,
                ..
            }
            | SourceDescriptor::Web {
                poll_interval_minutes,
                ..
            } => *poll_interval_minutes,
        };
        minutes
            .filter(|m| *m > 0)
            .map(|m| chrono::Duration::minutes(i64::from(m)))
    }

    /// The reference or URL as declared.
    pub fn location(&self) -> &str {
        match self {
            SourceDescriptor::Image { reference, .. } => reference,
            SourceDescriptor::Web { url, .. } => url,
        }
    }
}

/// Whether a catalog should be served at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    #[default]
    Available,
    Unavailable,
}

/// Immutable content identity: `<algorithm>:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey(String);

impl ContentKey {
    pub fn parse(value: &str) -> Result<Self> {
        let (algorithm, hex) = value.split_once(':').ok_or_else(|| {
            CatalogError::InvalidReference(format!(
                "Invalid digest '{}': expected algorithm:hex",
                value
            ))
        })?;
        let algorithm_ok = !algorithm.is_empty()
            && algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c));
        let hex_ok = !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
        if !algorithm_ok || !hex_ok {
            return Err(CatalogError::InvalidReference(format!(
                "Invalid digest '{}': expected algorithm:hex",
                value
            )));
        }
        Ok(Self(value.to_string()))
    }

    /// Key for a sha256 digest given as lowercase hex.
    pub fn sha256(hex: &str) -> Self {
        Self(format!("sha256:{}", hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(a, _)| a).unwrap_or("")
    }

    pub fn hex(&self) -> &str {
        self.0.split_once(':').map(|(_, h)| h).unwrap_or(&self.0)
    }

    /// Filesystem-safe directory name for this key.
    pub fn dir_name(&self) -> String {
        self.0.replace(':', "_")
    }

    /// Short identifier for display and progress subjects.
    pub fn short(&self) -> &str {
        let hex = self.hex();
        &hex[..hex.len().min(12)]
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContentKey {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ContentKey> for String {
    fn from(key: ContentKey) -> Self {
        key.0
    }
}

/// The immutable version a fetch resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResolvedSource {
    /// Canonical `name@digest` reference.
    Image { reference: String },
    Web { url: String, digest: ContentKey },
}

impl ResolvedSource {
    pub fn source_type(&self) -> SourceType {
        match self {
            ResolvedSource::Image { .. } => SourceType::Image,
            ResolvedSource::Web { .. } => SourceType::Web,
        }
    }

    pub fn content_key(&self) -> Result<ContentKey> {
        match self {
            ResolvedSource::Image { reference } => {
                let (_, digest) = reference.rsplit_once('@').ok_or_else(|| {
                    CatalogError::InvalidReference(format!(
                        "Resolved reference '{}' is not canonical",
                        reference
                    ))
                })?;
                ContentKey::parse(digest)
            }
            ResolvedSource::Web { digest, .. } => Ok(digest.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A typed observation about a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub observed_generation: i64,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
        observed_generation: i64,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            observed_generation,
            last_transition_time: Utc::now(),
        }
    }
}

/// Insert or update a condition by type.
///
/// The transition time is only moved when the status actually changes.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status != condition.status {
                existing.status = condition.status;
                existing.last_transition_time = condition.last_transition_time;
            }
            existing.reason = condition.reason;
            existing.message = condition.message;
            existing.observed_generation = condition.observed_generation;
        }
        None => conditions.push(condition),
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Drop every condition whose type this system does not own.
pub fn retain_known_conditions(conditions: &mut Vec<Condition>) {
    conditions.retain(|c| c.type_ == TYPE_PROGRESSING || c.type_ == TYPE_SERVING);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_unpacked: Option<DateTime<Utc>>,
    /// When the source was last fetched successfully, changed or not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_poll_attempt: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_source: Option<ResolvedSource>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl CatalogStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        find_condition(&self.conditions, type_)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSpec {
    pub source: SourceDescriptor,
    #[serde(default)]
    pub availability: Availability,
}

/// A declared catalog source and the status last observed for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub name: String,
    /// Bumped by the owner to force a fresh sync.
    #[serde(default = "default_generation")]
    pub generation: i64,
    pub spec: CatalogSpec,
    #[serde(default)]
    pub status: CatalogStatus,
}

fn default_generation() -> i64 {
    1
}

impl Catalog {
    pub fn new(name: impl Into<String>, source: SourceDescriptor) -> Self {
        Self {
            name: name.into(),
            generation: default_generation(),
            spec: CatalogSpec {
                source,
                availability: Availability::Available,
            },
            status: CatalogStatus::default(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.spec.availability == Availability::Unavailable
    }

    /// Set a condition stamped with the current generation.
    pub fn set_condition(&mut self, type_: &str, status: ConditionStatus, reason: &str, message: impl Into<String>) {
        let condition = Condition::new(type_, status, reason, message, self.generation);
        set_condition(&mut self.status.conditions, condition);
    }
}
