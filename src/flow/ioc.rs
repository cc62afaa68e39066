use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stripped-down projection of a record, emitted whenever a public
/// endpoint is observed. The address is the original one, before
/// pseudonymization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ioc {
    #[serde(rename = "AgentID")]
    pub agent_id: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "IPVersion")]
    pub ip_version: u8,
    #[serde(rename = "DateTimeStart")]
    pub start: DateTime<Utc>,
    #[serde(rename = "DateTimeEnd")]
    pub end: DateTime<Utc>,
}
