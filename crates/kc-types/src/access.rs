//! Temporary SSH access rules.

use serde::{Deserialize, Serialize};

/// Body of the request that opens SSH access to a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAccessGrantRequest {
    /// Base64 of the operator's `authorized_keys` line.
    pub public_key: String,
    /// Operator's public IP; the firewall rule only admits this source.
    pub source_ip: String,
}

/// Server-side access rule created for one SSH session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    #[serde(alias = "accessRuleId")]
    pub id: String,
}
