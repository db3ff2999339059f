//! Client fingerprint captured on sessions and checked by policy rules.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::geo::GeoResolver;

pub const LINUX: &str = "linux";
pub const MACOS: &str = "macos";
pub const WINDOWS: &str = "windows";
pub const CHROME_OS: &str = "chrome_os";
pub const IOS: &str = "ios";
pub const ANDROID: &str = "android";

pub const CHROME: &str = "chrome";
pub const CHROME_MOBILE: &str = "chrome_mobile";
pub const SAFARI: &str = "safari";
pub const SAFARI_MOBILE: &str = "safari_mobile";
pub const FIREFOX: &str = "firefox";
pub const FIREFOX_MOBILE: &str = "firefox_mobile";
pub const EDGE: &str = "edge";
pub const INTERNET_EXPLORER: &str = "internet_explorer";
pub const OPERA: &str = "opera";

/// Device and network fingerprint of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Agent {
    pub operating_system: String,
    pub browser: String,
    pub ip: String,
    pub isp: String,
    pub country_code: String,
    pub country: String,
    pub region_code: String,
    pub region: String,
    pub city: String,
}

impl Agent {
    /// Build the fingerprint for a client. Geo failures leave geo fields empty.
    pub async fn resolve(geo: &dyn GeoResolver, ip: IpAddr, user_agent: &str) -> Self {
        let mut agent = Agent {
            operating_system: classify_operating_system(user_agent).to_string(),
            browser: classify_browser(user_agent).to_string(),
            ip: ip.to_string(),
            ..Default::default()
        };

        match geo.lookup(ip).await {
            Ok(info) => {
                agent.isp = info.isp;
                agent.country_code = info.country_code;
                agent.country = info.country;
                agent.region_code = info.region_code;
                agent.region = info.region;
                agent.city = info.city;
            }
            Err(e) => {
                tracing::warn!(client_ip = %ip, error = %e, "Geo lookup failed");
            }
        }

        agent
    }

    /// True if any fingerprint field differs.
    pub fn diff(&self, other: &Agent) -> bool {
        self != other
    }

    /// Location key in `CC_REGION` form, empty without a region.
    pub fn region_key(&self) -> String {
        if self.country_code.is_empty() || self.region_code.is_empty() {
            return String::new();
        }
        format!("{}_{}", self.country_code, self.region_code)
    }
}

/// Operating system family of a user agent string. Empty when unknown.
pub fn classify_operating_system(user_agent: &str) -> &'static str {
    let ua = user_agent.to_ascii_lowercase();
    if ua.contains("android") {
        ANDROID
    } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ipod") {
        IOS
    } else if ua.contains("cros") {
        CHROME_OS
    } else if ua.contains("windows") {
        WINDOWS
    } else if ua.contains("mac os x") || ua.contains("macintosh") {
        MACOS
    } else if ua.contains("linux") || ua.contains("x11") {
        LINUX
    } else {
        ""
    }
}

/// Browser family of a user agent string. Empty when unknown.
pub fn classify_browser(user_agent: &str) -> &'static str {
    let ua = user_agent.to_ascii_lowercase();
    let mobile = ua.contains("mobile");
    if ua.contains("edg/") || ua.contains("edge/") {
        EDGE
    } else if ua.contains("opr/") || ua.contains("opera") {
        OPERA
    } else if ua.contains("firefox/") || ua.contains("fxios/") {
        if mobile || ua.contains("fxios/") {
            FIREFOX_MOBILE
        } else {
            FIREFOX
        }
    } else if ua.contains("chrome/") || ua.contains("crios/") {
        if mobile || ua.contains("crios/") {
            CHROME_MOBILE
        } else {
            CHROME
        }
    } else if ua.contains("safari/") {
        if mobile {
            SAFARI_MOBILE
        } else {
            SAFARI
        }
    } else if ua.contains("msie") || ua.contains("trident/") {
        INTERNET_EXPLORER
    } else {
        ""
    }
}
