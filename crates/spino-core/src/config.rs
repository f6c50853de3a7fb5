//! spino.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default name of the distributed map holding location facts.
pub const DEFAULT_SERVICES_MAP: &str = "spino-services";

/// Default cluster group name.
pub const DEFAULT_GROUP: &str = "SPINO";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpinoConfig {
    pub cluster: ClusterConfig,
    pub notify: NotifyConfig,
    pub simulate: Option<SimulateConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    pub group: String,
    pub services_map: String,
    /// Known members to join through. Empty means multicast discovery.
    pub seeds: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_string(),
            services_map: DEFAULT_SERVICES_MAP.to_string(),
            seeds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotifyConfig {
    /// Queue size for channel subscriptions.
    pub channel_capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

/// In-process cluster layout used by the `spinod` simulator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulateConfig {
    pub members: Vec<MemberConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberConfig {
    pub id: String,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    /// Left unparsed here; validated when the member activates it.
    pub address: String,
}

impl SpinoConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SpinoConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config with a two-member simulation.
    pub fn scaffold() -> Self {
        SpinoConfig {
            cluster: ClusterConfig::default(),
            notify: NotifyConfig::default(),
            simulate: Some(SimulateConfig {
                members: vec![
                    MemberConfig {
                        id: "member-1".to_string(),
                        services: vec![ServiceConfig {
                            name: "some-service".to_string(),
                            address: "http://db-01:8001".to_string(),
                        }],
                    },
                    MemberConfig {
                        id: "member-2".to_string(),
                        services: vec![ServiceConfig {
                            name: "some-service".to_string(),
                            address: "http://db-02:8001".to_string(),
                        }],
                    },
                ],
            }),
        }
    }
}
