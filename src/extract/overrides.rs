//! Hosts that only serve content with specific request headers.

use std::time::Duration;

use crate::http_client::{DESKTOP_CHROME_UA, MOBILE_SAFARI_UA};

#[derive(Debug, PartialEq, Eq)]
pub struct DomainOverride {
    pub host: &'static str,
    pub user_agent: &'static str,
    pub referer: Option<&'static str>,
    pub no_cache: bool,
    pub timeout: Option<Duration>,
}

pub const DOMAIN_OVERRIDES: &[DomainOverride] = &[
    DomainOverride {
        host: "media.defense.gov",
        user_agent: MOBILE_SAFARI_UA,
        referer: Some("https://www.defense.gov/"),
        no_cache: false,
        timeout: None,
    },
    DomainOverride {
        host: "apps.dtic.mil",
        user_agent: DESKTOP_CHROME_UA,
        referer: Some("https://discover.dtic.mil/"),
        no_cache: false,
        timeout: None,
    },
    DomainOverride {
        host: "www.marines.mil",
        user_agent: DESKTOP_CHROME_UA,
        referer: Some("https://www.marines.mil/"),
        no_cache: false,
        timeout: None,
    },
    DomainOverride {
        host: "info.fldoe.org",
        user_agent: MOBILE_SAFARI_UA,
        referer: None,
        no_cache: true,
        timeout: Some(Duration::from_secs(120)),
    },
];

/// Override registered for `host`, if any.
pub fn lookup(host: &str) -> Option<&'static DomainOverride> {
    let host = host.to_lowercase();
    DOMAIN_OVERRIDES.iter().find(|o| o.host == host)
}

impl DomainOverride {
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("User-Agent", self.user_agent.to_string()),
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
            ),
            ("Accept-Language", "en-US,en;q=0.9".to_string()),
            ("Sec-Fetch-Dest", "document".to_string()),
            ("Sec-Fetch-Mode", "navigate".to_string()),
            ("Sec-Fetch-Site", "same-site".to_string()),
            ("Upgrade-Insecure-Requests", "1".to_string()),
        ];
        if let Some(referer) = self.referer {
            headers.push(("Referer", referer.to_string()));
        }
        if self.no_cache {
            headers.push(("Cache-Control", "no-cache".to_string()));
            headers.push(("Pragma", "no-cache".to_string()));
        }
        headers
    }
}
