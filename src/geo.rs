//! Geo-IP lookup seam.
//!
//! The real resolver is an external service. `StaticGeoResolver` answers from
//! the `[[geo]]` table in the config file and backs tests.

use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::error::GatewayResult;

/// Location details for a client address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GeoInfo {
    pub isp: String,
    pub country_code: String,
    pub country: String,
    pub region_code: String,
    pub region: String,
    pub city: String,
}

#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> GatewayResult<GeoInfo>;
}

/// A `[[geo]]` config entry mapping a network to a location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GeoEntry {
    pub network: IpNet,
    #[serde(flatten)]
    pub info: GeoInfo,
}

/// Resolver answering from a fixed table. First matching network wins.
#[derive(Debug, Clone, Default)]
pub struct StaticGeoResolver {
    entries: Vec<GeoEntry>,
}

impl StaticGeoResolver {
    pub fn new(entries: Vec<GeoEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl GeoResolver for StaticGeoResolver {
    async fn lookup(&self, ip: IpAddr) -> GatewayResult<GeoInfo> {
        Ok(self
            .entries
            .iter()
            .find(|e| e.network.contains(&ip))
            .map(|e| e.info.clone())
            .unwrap_or_default())
    }
}
