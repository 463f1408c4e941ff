//! Cluster and node records as returned by the management API.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Cloud provider hosting a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cloud {
    Aws,
    Gcp,
    Azure,
    #[serde(rename = "do")]
    DigitalOcean,
    /// Provider the client does not know about yet.
    #[default]
    #[serde(other)]
    Unknown,
}

impl Cloud {
    /// Login user baked into the node images of this provider.
    pub fn default_ssh_user(self) -> &'static str {
        match self {
            Cloud::DigitalOcean => "root",
            Cloud::Aws | Cloud::Gcp | Cloud::Azure | Cloud::Unknown => "ubuntu",
        }
    }
}

impl fmt::Display for Cloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cloud::Aws => "aws",
            Cloud::Gcp => "gcp",
            Cloud::Azure => "azure",
            Cloud::DigitalOcean => "do",
            Cloud::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Addresses assigned to a node. Both are empty until provisioning finishes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetwork {
    #[serde(default)]
    pub public_ip: String,
    #[serde(default)]
    pub private_ip: String,
}

/// A single cluster node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cloud: Cloud,
    #[serde(default)]
    pub network: Option<NodeNetwork>,
}

impl Node {
    /// Public IP when the node has both a public and a private address.
    ///
    /// A node that only has one of the two is still being provisioned and
    /// cannot be reached over SSH yet.
    pub fn reachable_ip(&self) -> Option<&str> {
        let network = self.network.as_ref()?;
        if network.public_ip.is_empty() || network.private_ip.is_empty() {
            return None;
        }
        Some(network.public_ip.as_str())
    }
}

/// A managed cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
}

/// Envelope of list endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_decodes_camel_case_network() {
        let raw = r#"{"id":"n-1","name":"worker-a","cloud":"do","network":{"publicIp":"203.0.113.9","privateIp":"10.0.0.4"}}"#;
        let node: Node = serde_json::from_str(raw).unwrap();
        assert_eq!(node.cloud, Cloud::DigitalOcean);
        assert_eq!(node.reachable_ip(), Some("203.0.113.9"));
    }

    #[test]
    fn list_envelope_tolerates_missing_items() {
        let list: ItemList<Cluster> = serde_json::from_str("{}").unwrap();
        assert!(list.items.is_empty());
        let list: ItemList<Cluster> = serde_json::from_str(r#"{"items":[{"id":"c-1","name":"prod"}]}"#).unwrap();
        assert_eq!(list.items[0].name, "prod");
    }

    #[test]
    fn unknown_cloud_falls_back() {
        let node: Node = serde_json::from_str(r#"{"id":"n","cloud":"hetzner"}"#).unwrap();
        assert_eq!(node.cloud, Cloud::Unknown);
        assert_eq!(node.cloud.default_ssh_user(), "ubuntu");
    }

    #[test]
    fn node_without_both_addresses_is_not_reachable() {
        let mut node = Node {
            id: "n".into(),
            name: "n".into(),
            cloud: Cloud::Aws,
            network: None,
        };
        assert_eq!(node.reachable_ip(), None);

        node.network = Some(NodeNetwork {
            public_ip: String::new(),
            private_ip: "10.0.0.1".into(),
        });
        assert_eq!(node.reachable_ip(), None);

        node.network = Some(NodeNetwork {
            public_ip: "198.51.100.2".into(),
            private_ip: String::new(),
        });
        assert_eq!(node.reachable_ip(), None);
    }
}
