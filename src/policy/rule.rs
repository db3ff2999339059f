//! Typed policy rules.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::auth::agent::Agent;
use crate::error::ErrorData;

/// One rule of a policy. A rule with `disable = true` never blocks.
///
/// ```toml
/// [[policies.rules]]
/// type = "location"
/// values = ["US", "CA_QC"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
    OperatingSystem {
        #[serde(default)]
        disable: bool,
        values: Vec<String>,
    },
    Browser {
        #[serde(default)]
        disable: bool,
        values: Vec<String>,
    },
    /// Country codes, or `CC_REGION` pairs.
    Location {
        #[serde(default)]
        disable: bool,
        values: Vec<String>,
    },
    /// Source address must be inside one of the networks.
    #[serde(alias = "cidr")]
    WhitelistNetworks {
        #[serde(default)]
        disable: bool,
        values: Vec<IpNet>,
    },
    /// Source address must be outside every network.
    BlacklistNetworks {
        #[serde(default)]
        disable: bool,
        values: Vec<IpNet>,
    },
}

impl Rule {
    pub fn is_disabled(&self) -> bool {
        match self {
            Rule::OperatingSystem { disable, .. }
            | Rule::Browser { disable, .. }
            | Rule::Location { disable, .. }
            | Rule::WhitelistNetworks { disable, .. }
            | Rule::BlacklistNetworks { disable, .. } => *disable,
        }
    }

    /// Whether this rule looks at device or location details that only
    /// interactive clients present.
    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            Rule::OperatingSystem { .. } | Rule::Browser { .. } | Rule::Location { .. }
        )
    }

    /// Check the rule against a request. Returns the violation, if any.
    pub fn evaluate(&self, agent: &Agent, client_ip: IpAddr) -> Option<ErrorData> {
        if self.is_disabled() {
            return None;
        }

        match self {
            Rule::OperatingSystem { values, .. } => (!values.contains(&agent.operating_system))
                .then(|| ErrorData::new("operating_system_policy", "Operating system not permitted")),
            Rule::Browser { values, .. } => (!values.contains(&agent.browser))
                .then(|| ErrorData::new("browser_policy", "Browser not permitted")),
            Rule::Location { values, .. } => {
                let region = agent.region_key();
                let matched = values.iter().any(|v| {
                    (!agent.country_code.is_empty() && *v == agent.country_code)
                        || (!region.is_empty() && *v == region)
                });
                (!matched).then(|| ErrorData::new("location_policy", "Location not permitted"))
            }
            Rule::WhitelistNetworks { values, .. } => (!values.iter().any(|n| n.contains(&client_ip)))
                .then(|| ErrorData::new("whitelist_networks_policy", "Network not permitted")),
            Rule::BlacklistNetworks { values, .. } => values
                .iter()
                .any(|n| n.contains(&client_ip))
                .then(|| ErrorData::new("blacklist_networks_policy", "Network not permitted")),
        }
    }

    /// Canonicalize network values by dropping host bits.
    pub fn normalize(&mut self) {
        match self {
            Rule::WhitelistNetworks { values, .. } | Rule::BlacklistNetworks { values, .. } => {
                for net in values.iter_mut() {
                    *net = net.trunc();
                }
            }
            _ => {}
        }
    }
}
