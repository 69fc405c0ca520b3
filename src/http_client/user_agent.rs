//! User agent strings for outbound requests.

use rand::seq::IndexedRandom;

pub const USER_AGENT: &str = "docsift/0.3 (document research)";

/// Current desktop browser user agents rotated across pages and requests.
pub const IMPERSONATE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
];

/// Some hosts only serve documents to mobile browsers.
pub const MOBILE_SAFARI_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Mobile/15E148 Safari/604.1";

pub const DESKTOP_CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

pub fn random_user_agent() -> &'static str {
    IMPERSONATE_USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(DESKTOP_CHROME_UA)
}

/// Resolve a configured user agent.
/// - None => a random browser user agent
/// - "docsift" => the crate's own identifying agent
/// - other => used verbatim
pub fn resolve_user_agent(config: Option<&str>) -> String {
    match config {
        None | Some("impersonate") => random_user_agent().to_string(),
        Some("docsift") => USER_AGENT.to_string(),
        Some(custom) => custom.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_user_agent_default_impersonates() {
        let ua = resolve_user_agent(None);
        assert!(ua.contains("Mozilla"));
        assert!(IMPERSONATE_USER_AGENTS.contains(&ua.as_str()));
    }

    #[test]
    fn test_resolve_user_agent_named() {
        assert_eq!(resolve_user_agent(Some("docsift")), USER_AGENT);
        assert_eq!(resolve_user_agent(Some("MyBot/1.0")), "MyBot/1.0");
    }

    #[test]
    fn test_mobile_agent_is_mobile() {
        assert!(MOBILE_SAFARI_UA.contains("Mobile"));
        assert!(!DESKTOP_CHROME_UA.contains("Mobile"));
    }
}
