//! Core data structures
//!
//! The application record is written by the external consumer; this crate
//! only reads it. Event payloads are what the consumer receives.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Timestamp layout written by the deploy handler (no colons in the time)
const COMPACT_DATE_FORMAT: &str = "%Y-%m-%dT%H%M%S%.f";

/// Standard ISO-8601 layout, also accepted on read
const ISO_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

// ============================================================================
// Application Record
// ============================================================================

/// Topology and deploy metadata of one service, stored under `app/...`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    #[serde(alias = "repo-url")]
    pub repo_url: String,

    pub branch: String,

    /// Node hosting the active instance
    pub master: String,

    /// Node hosting the standby instance, if replicated
    #[serde(default)]
    pub slave: Option<String>,

    #[serde(
        alias = "deploy-date",
        serialize_with = "serialize_deploy_date",
        deserialize_with = "deserialize_deploy_date"
    )]
    pub deploy_date: NaiveDateTime,

    #[serde(alias = "deploy-id")]
    pub deploy_id: String,

    #[serde(default, alias = "previous-deploy-id")]
    pub previous_deploy_id: Option<String>,
}

impl ApplicationRecord {
    /// Decode the JSON document stored at `key`
    pub fn decode(key: &str, raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|source| Error::Decode {
            key: key.to_string(),
            source,
        })
    }

    /// Encode back to the stored JSON form
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn serialize_deploy_date<S>(date: &NaiveDateTime, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&date.format(COMPACT_DATE_FORMAT).to_string())
}

fn deserialize_deploy_date<'de, D>(deserializer: D) -> std::result::Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_deploy_date(&raw).map_err(serde::de::Error::custom)
}

/// Parse a deploy date in either the compact or the ISO layout
pub fn parse_deploy_date(raw: &str) -> std::result::Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(raw, COMPACT_DATE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, ISO_DATE_FORMAT))
        .map_err(|e| format!("invalid deploy_date '{raw}': {e}"))
}

// ============================================================================
// Events
// ============================================================================

/// Events understood by the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Deploy,
    Migrate,
}

impl EventKind {
    /// Event name as fired on the bus
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Migrate => "migrate",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named event with its JSON payload
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn deploy(payload: &DeployPayload) -> Result<Self> {
        Ok(Self {
            kind: EventKind::Deploy,
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn migrate(payload: &MigratePayload) -> Result<Self> {
        Ok(Self {
            kind: EventKind::Migrate,
            payload: serde_json::to_value(payload)?,
        })
    }
}

/// Payload of the `deploy` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployPayload {
    pub repo: String,
    pub branch: String,
    pub master: String,
    pub slave: Option<String>,
}

/// Payload of the `migrate` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratePayload {
    pub repo: String,
    pub branch: String,
    pub target: MigrateTarget,
    pub update: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateTarget {
    pub repo: String,
    pub branch: String,
}

// ============================================================================
// Health checks
// ============================================================================

/// One entry of `/v1/health/state/<state>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    pub node: String,
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
    #[serde(default)]
    pub service_name: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub output: String,
}
