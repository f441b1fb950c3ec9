use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use orz_storage::Account;
use serde::{Deserialize, Deserializer, Serialize};

/// Lifecycle phase of a remote instance as reported by the control plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "running")]
    Running,
    #[serde(alias = "succeeded")]
    Succeeded,
    #[serde(alias = "failed")]
    Failed,
    #[serde(alias = "terminating")]
    Terminating,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Pending => "Pending",
            InstanceStatus::Running => "Running",
            InstanceStatus::Succeeded => "Succeeded",
            InstanceStatus::Failed => "Failed",
            InstanceStatus::Terminating => "Terminating",
            InstanceStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Server-side state of one instance at the moment it was fetched.
///
/// The list endpoint serialises the provider's struct directly, so the
/// capitalised Go field names are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteInstance {
    #[serde(alias = "ID")]
    pub id: String,
    #[serde(default, alias = "Status")]
    pub status: InstanceStatus,
    #[serde(default, alias = "Tier")]
    pub tier: String,
    #[serde(default, alias = "CreatedAt")]
    pub created_at: Option<DateTime<Utc>>,
    /// Single-use endpoint with an embedded token. Only present on create/get.
    #[serde(default, alias = "AttachURL", skip_serializing_if = "Option::is_none")]
    pub attach_url: Option<String>,
}

/// `GET /v1/instances` answers either a bare array or `{"instances": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum InstanceList {
    Bare(Vec<RemoteInstance>),
    Wrapped {
        // Required key; only an explicit null means "none".
        #[serde(deserialize_with = "null_as_empty")]
        instances: Vec<RemoteInstance>,
    },
}

impl InstanceList {
    pub(crate) fn into_vec(self) -> Vec<RemoteInstance> {
        match self {
            InstanceList::Bare(instances) | InstanceList::Wrapped { instances } => instances,
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<RemoteInstance>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<RemoteInstance>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateInstanceRequest<'a> {
    pub tier: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExchangeRequest<'a> {
    pub github_token: &'a str,
}

/// `POST /v1/auth/exchange` answer: the API token plus the account it belongs to.
#[derive(Debug, Deserialize)]
pub(crate) struct ExchangeResponse {
    pub token: String,
    #[serde(default)]
    pub user: Account,
}
